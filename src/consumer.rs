//! Consumer side of the demo: one entry point, two consumption strategies.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use topic_channel::processor::{ErrorHandler, MessageHandler};
use topic_channel::{Processor, ProcessorOptions, Receiver};

use crate::config::ConsumerConfig;

/// How messages are consumed from the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStrategy {
    /// Poll for batches and complete each message in turn.
    Pull,
    /// Register handlers with a processor that delivers messages as they
    /// arrive, serialized one invocation at a time.
    Push,
}

/// Runs the selected consumption strategy until `cancel` fires.
pub async fn run_consumer<R: Receiver + 'static>(
    receiver: Arc<R>,
    strategy: ConsumerStrategy,
    config: &ConsumerConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    match strategy {
        ConsumerStrategy::Pull => run_pull(receiver.as_ref(), config, cancel).await,
        ConsumerStrategy::Push => run_push(receiver, config, cancel).await,
    }
}

/// Pull loop: receive a batch, complete each delivery before touching the
/// next, sleep, repeat. An empty batch is normal. A receive failure ends the
/// loop; a failed completion is logged and the rest of the batch goes on.
async fn run_pull<R: Receiver + ?Sized>(
    receiver: &R,
    config: &ConsumerConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let batch = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = receiver.receive(config.batch_size, config.max_wait) => {
                received.context("failed to receive messages")?
            }
        };
        for delivery in batch {
            tracing::info!(id = %delivery.id, body = %delivery.body, "received");
            if let Err(err) = receiver.complete(delivery.id).await {
                tracing::warn!(id = %delivery.id, error = %err, "failed to complete message");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep(config.poll_interval) => {}
        }
    }
}

/// Push variant: wire both handlers, start the processor, park until
/// cancelled, then stop it and wait for any in-flight invocation to drain.
async fn run_push<R: Receiver + 'static>(
    receiver: Arc<R>,
    config: &ConsumerConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut processor = Processor::new(
        receiver.clone(),
        ProcessorOptions {
            max_concurrent: 1,
            poll_wait: config.max_wait,
        },
    );

    let completer = receiver.clone();
    let on_message: MessageHandler = Arc::new(move |delivery| {
        let completer = completer.clone();
        async move {
            tracing::info!(id = %delivery.id, body = %delivery.body, "received");
            completer
                .complete(delivery.id)
                .await
                .context("failed to complete message")?;
            Ok(())
        }
        .boxed()
    });
    let on_error: ErrorHandler = Arc::new(|fault| {
        tracing::warn!(id = ?fault.message_id, error = %fault.source, "processor fault");
    });

    processor.on_message(on_message).on_error(on_error);
    processor.start().context("failed to start processor")?;

    cancel.cancelled().await;
    processor.stop().await;
    Ok(())
}
