use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use bus_demo::config::Config;
use bus_demo::lifecycle::Controller;
use bus_demo::telemetry;
use topic_channel::MemoryChannel;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env(std::env::args().skip(1))?;
    let provider = telemetry::init(config.service_name());

    info!(
        sending = config.enable_sender,
        receiving = config.enable_receiver,
        strategy = ?config.strategy,
        "starting"
    );

    let channel = MemoryChannel::connect(&config.endpoint)?;
    info!(
        endpoint = channel.endpoint(),
        topic = %config.topic,
        subscription = %config.subscription,
        "channel connected"
    );

    let controller = Arc::new(Controller::new());
    let handler = controller.clone();
    ctrlc::set_handler(move || handler.cancel())
        .context("failed to install interrupt handler")?;

    let result = controller.run(&config, &channel).await;

    if let Err(err) = provider.shutdown() {
        warn!(error = %err, "failed to shut down trace exporter");
    }
    result
}
