//! Push-style delivery: a pump task pulls from a [`Receiver`] and invokes
//! registered handlers, bounded by a configured concurrency limit.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Delivery, MessageId, Receiver};

/// Handler invoked once per delivered message. The handler owns explicit
/// completion; the processor never auto-completes on its behalf.
pub type MessageHandler =
    Arc<dyn Fn(Delivery) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handler invoked for every receive or processing fault. Must not fail;
/// recording the fault is its whole job.
pub type ErrorHandler = Arc<dyn Fn(ProcessorFault) + Send + Sync>;

/// A fault surfaced to the error handler.
#[derive(Debug)]
pub struct ProcessorFault {
    /// Set when the fault came from handling a specific delivery; `None` for
    /// receive-level failures.
    pub message_id: Option<MessageId>,
    pub source: anyhow::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor requires a message handler before start")]
    MissingMessageHandler,
    #[error("processor requires an error handler before start")]
    MissingErrorHandler,
    #[error("processor is already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
    /// Maximum concurrent handler invocations. 1 means strictly serialized.
    pub max_concurrent: usize,
    /// How long each internal receive waits before polling again.
    pub poll_wait: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            poll_wait: Duration::from_millis(500),
        }
    }
}

/// Owns the pump task that turns a pull [`Receiver`] into push delivery.
///
/// Both handlers must be registered before [`start`](Self::start).
/// [`stop`](Self::stop) cancels the pump and waits for any in-flight handler
/// invocation to finish before returning.
pub struct Processor<R> {
    receiver: Arc<R>,
    options: ProcessorOptions,
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
    running: Option<Running>,
}

struct Running {
    token: CancellationToken,
    pump: JoinHandle<()>,
}

impl<R: Receiver + 'static> Processor<R> {
    pub fn new(receiver: Arc<R>, options: ProcessorOptions) -> Self {
        Self {
            receiver,
            options,
            on_message: None,
            on_error: None,
            running: None,
        }
    }

    pub fn on_message(&mut self, handler: MessageHandler) -> &mut Self {
        self.on_message = Some(handler);
        self
    }

    pub fn on_error(&mut self, handler: ErrorHandler) -> &mut Self {
        self.on_error = Some(handler);
        self
    }

    /// Spawns the pump task. Fails if a handler is missing or the processor
    /// is already running.
    pub fn start(&mut self) -> Result<(), ProcessorError> {
        if self.running.is_some() {
            return Err(ProcessorError::AlreadyStarted);
        }
        let on_message = self
            .on_message
            .clone()
            .ok_or(ProcessorError::MissingMessageHandler)?;
        let on_error = self
            .on_error
            .clone()
            .ok_or(ProcessorError::MissingErrorHandler)?;
        let token = CancellationToken::new();
        let pump = tokio::spawn(pump(
            self.receiver.clone(),
            self.options,
            on_message,
            on_error,
            token.clone(),
        ));
        self.running = Some(Running { token, pump });
        tracing::debug!("processor started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Stops the pump and waits for it to drain. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.token.cancel();
            let _ = running.pump.await;
            tracing::debug!("processor stopped");
        }
    }
}

async fn pump<R: Receiver>(
    receiver: Arc<R>,
    options: ProcessorOptions,
    on_message: MessageHandler,
    on_error: ErrorHandler,
    token: CancellationToken,
) {
    let limit = options.max_concurrent.max(1);
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = receiver.receive(limit, options.poll_wait) => received,
        };
        match received {
            Ok(batch) => {
                // Cancellation is only observed between batches, so a handler
                // invocation already in flight always runs to completion.
                futures::stream::iter(batch)
                    .for_each_concurrent(limit, |delivery| {
                        let on_message = on_message.clone();
                        let on_error = on_error.clone();
                        async move {
                            let id = delivery.id;
                            if let Err(source) = on_message(delivery).await {
                                on_error(ProcessorFault {
                                    message_id: Some(id),
                                    source,
                                });
                            }
                        }
                    })
                    .await;
            }
            Err(err) => {
                on_error(ProcessorFault {
                    message_id: None,
                    source: err.into(),
                });
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(options.poll_wait) => {}
                }
            }
        }
    }
}
