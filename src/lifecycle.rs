//! Starts the enabled loops, relays the interrupt to them, and tears the
//! channel down once they have all returned.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use topic_channel::MemoryChannel;

use crate::config::Config;
use crate::consumer::run_consumer;
use crate::producer::run_producer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Cancelling,
    Stopped,
}

/// Owns the shared cancellation token and the `Idle → Running → Cancelling →
/// Stopped` progression of a single demo run.
pub struct Controller {
    cancel: CancellationToken,
    state: Mutex<LifecycleState>,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            state: Mutex::new(LifecycleState::Idle),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests graceful shutdown. Safe to call from the signal handler
    /// thread; calling it more than once has no further effect.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == LifecycleState::Running {
            *state = LifecycleState::Cancelling;
        }
        self.cancel.cancel();
    }

    /// Spawns the loops enabled by `config`, waits for all of them, then
    /// closes the channel. The teardown runs no matter how the loops ended;
    /// a loop failure surfaces as an error only after it.
    pub async fn run(&self, config: &Config, channel: &MemoryChannel) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == LifecycleState::Idle {
                *state = LifecycleState::Running;
            }
        }

        let mut tasks: Vec<(&'static str, JoinHandle<Result<()>>)> = Vec::new();
        if config.enable_sender {
            let sender = channel.sender(&config.topic);
            let producer = config.producer.clone();
            let cancel = self.cancel.clone();
            tasks.push((
                "producer",
                tokio::spawn(async move { run_producer(&sender, &producer, &cancel).await }),
            ));
        }
        if config.enable_receiver {
            let receiver = Arc::new(channel.receiver(&config.topic, &config.subscription));
            let consumer = config.consumer.clone();
            let strategy = config.strategy;
            let cancel = self.cancel.clone();
            tasks.push((
                "consumer",
                tokio::spawn(
                    async move { run_consumer(receiver, strategy, &consumer, &cancel).await },
                ),
            ));
        }

        let mut failed = false;
        for (name, task) in tasks {
            match task.await {
                Ok(Ok(())) => tracing::debug!(task = name, "loop finished"),
                Ok(Err(err)) => {
                    failed = true;
                    tracing::error!(task = name, error = ?err, "loop terminated with error");
                }
                Err(err) => {
                    failed = true;
                    tracing::error!(task = name, error = %err, "loop panicked");
                }
            }
        }

        // Teardown happens regardless of how the loops fared.
        channel.close();
        *self.state.lock().unwrap() = LifecycleState::Stopped;

        if failed {
            bail!("one or more loops terminated abnormally");
        }
        Ok(())
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerStrategy;
    use std::time::Duration;

    fn config(args: &[&str]) -> Config {
        let mut config = Config::build(
            "memory://demo".to_string(),
            "demotopic".to_string(),
            "demosub".to_string(),
            None,
            args.iter().map(|s| s.to_string()),
        )
        .unwrap();
        // Tight intervals so tests spin quickly under paused time.
        config.producer.send_interval = Duration::from_millis(50);
        config.consumer.max_wait = Duration::from_millis(50);
        config.consumer.poll_interval = Duration::from_millis(10);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn runs_both_loops_and_stops_on_cancel() {
        let channel = MemoryChannel::connect("memory://demo").unwrap();
        let controller = Arc::new(Controller::new());
        assert_eq!(controller.state(), LifecycleState::Idle);

        let task = {
            let controller = controller.clone();
            let config = config(&[]);
            let channel = channel.clone();
            tokio::spawn(async move { controller.run(&config, &channel).await })
        };

        // Let the loops get going, then interrupt.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(channel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn send_only_run_never_touches_the_subscription() {
        let channel = MemoryChannel::connect("memory://demo").unwrap();
        // A probe subscription created up front sees everything the producer
        // sends; the controller must not create or poll any other consumer.
        let probe = channel.receiver("demotopic", "probe");
        let controller = Arc::new(Controller::new());

        let task = {
            let controller = controller.clone();
            let config = config(&["send"]);
            let channel = channel.clone();
            tokio::spawn(async move { controller.run(&config, &channel).await })
        };

        while probe.pending() < 10 {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_only_run_sends_nothing() {
        let channel = MemoryChannel::connect("memory://demo").unwrap();
        let probe = channel.receiver("demotopic", "probe");
        let controller = Arc::new(Controller::new());

        let task = {
            let controller = controller.clone();
            let config = config(&["receive"]);
            let channel = channel.clone();
            tokio::spawn(async move { controller.run(&config, &channel).await })
        };

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(probe.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_from_producer_to_pull_consumer() {
        let channel = MemoryChannel::connect("memory://demo").unwrap();
        // The probe subscription accumulates a copy of every sent message.
        let probe = channel.receiver("demotopic", "probe");
        let controller = Arc::new(Controller::new());

        let task = {
            let controller = controller.clone();
            let config = config(&[]);
            let channel = channel.clone();
            tokio::spawn(async move { controller.run(&config, &channel).await })
        };

        while probe.pending() == 0 {
            tokio::task::yield_now().await;
        }
        // Let the consumer pull at least one batch before interrupting.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        task.await.unwrap().unwrap();

        // Messages flowed, and everything the consumer pulled it completed.
        assert!(probe.pending() > 0);
        let observer = channel.receiver("demotopic", "demosub");
        assert_eq!(observer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_strategy_run_completes_cleanly() {
        let channel = MemoryChannel::connect("memory://demo").unwrap();
        let controller = Arc::new(Controller::new());

        let task = {
            let controller = controller.clone();
            let mut config = config(&[]);
            config.strategy = ConsumerStrategy::Push;
            let channel = channel.clone();
            tokio::spawn(async move { controller.run(&config, &channel).await })
        };

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_repeatedly_is_harmless() {
        let channel = MemoryChannel::connect("memory://demo").unwrap();
        let controller = Arc::new(Controller::new());

        let task = {
            let controller = controller.clone();
            let config = config(&[]);
            let channel = channel.clone();
            tokio::spawn(async move { controller.run(&config, &channel).await })
        };

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        controller.cancel();
        controller.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }
}
