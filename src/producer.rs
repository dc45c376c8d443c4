//! Producer loop: bursts of sequenced messages, then a pause, until cancelled.

use anyhow::{Context, Result};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use topic_channel::Sender;

use crate::config::ProducerConfig;
use crate::message::DemoMessage;

/// Sends `burst_size` messages back to back, sleeps `send_interval`, and
/// repeats until `cancel` fires. Message ids increase strictly across the
/// whole run. A send failure terminates the loop; retry is the channel's job.
pub async fn run_producer<S: Sender + ?Sized>(
    sender: &S,
    config: &ProducerConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut sequence: u32 = 0;
    loop {
        for _ in 0..config.burst_size {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let message = DemoMessage::new(sequence);
            let body = serde_json::to_string(&message).context("failed to encode message")?;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = sender.send(body) => sent.context("failed to send message")?,
            }
            tracing::info!(id = message.id, content = %message.content, "sent");
            sequence += 1;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep(config.send_interval) => {}
        }
    }
}
