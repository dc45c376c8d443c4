//! Startup configuration: environment variables plus positional CLI tokens.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::consumer::ConsumerStrategy;

/// Producer loop settings. Fixed at startup.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Messages sent back to back before the loop sleeps.
    pub burst_size: u32,
    /// Pause between bursts.
    pub send_interval: Duration,
}

/// Consumer loop settings. Fixed at startup.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Upper bound on messages pulled per receive call.
    pub batch_size: usize,
    /// How long a receive call waits for the first message.
    pub max_wait: Duration,
    /// Pause between polls after a batch has been handled.
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub topic: String,
    pub subscription: String,
    pub enable_sender: bool,
    pub enable_receiver: bool,
    pub strategy: ConsumerStrategy,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Reads `DEMO_CONNECTION` (required), `DEMO_TOPIC`, `DEMO_SUB` and
    /// `DEMO_CONSUMER` from the environment and the `send`/`receive`
    /// enablement tokens from the command line.
    pub fn from_env(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let endpoint = std::env::var("DEMO_CONNECTION")
            .context("DEMO_CONNECTION environment variable not set")?;
        let topic = std::env::var("DEMO_TOPIC").unwrap_or_else(|_| "demotopic".to_string());
        let subscription = std::env::var("DEMO_SUB").unwrap_or_else(|_| "demosub".to_string());
        let strategy = std::env::var("DEMO_CONSUMER").ok();
        Self::build(endpoint, topic, subscription, strategy.as_deref(), args)
    }

    pub fn build(
        endpoint: String,
        topic: String,
        subscription: String,
        strategy: Option<&str>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let tokens: Vec<String> = args.into_iter().collect();
        // No tokens at all means both loops run.
        let enable_sender = tokens.is_empty() || tokens.iter().any(|t| t == "send");
        let enable_receiver = tokens.is_empty() || tokens.iter().any(|t| t == "receive");

        let strategy = match strategy {
            None => ConsumerStrategy::Pull,
            Some(s) if s.eq_ignore_ascii_case("pull") => ConsumerStrategy::Pull,
            Some(s) if s.eq_ignore_ascii_case("push") => ConsumerStrategy::Push,
            Some(other) => {
                bail!("invalid DEMO_CONSUMER value {other:?}, expected \"pull\" or \"push\"")
            }
        };

        Ok(Self {
            endpoint,
            topic,
            subscription,
            enable_sender,
            enable_receiver,
            strategy,
            producer: ProducerConfig {
                burst_size: 10,
                send_interval: Duration::from_secs(5),
            },
            consumer: ConsumerConfig {
                batch_size: 10,
                max_wait: Duration::from_secs(5),
                poll_interval: Duration::from_secs(1),
            },
        })
    }

    /// Service name reported to the trace exporter, derived from which loops
    /// are enabled.
    pub fn service_name(&self) -> &'static str {
        match (self.enable_sender, self.enable_receiver) {
            (true, false) => "BusSender",
            (false, true) => "BusReceiver",
            _ => "BusDemo",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(strategy: Option<&str>, args: &[&str]) -> Result<Config> {
        Config::build(
            "memory://demo".to_string(),
            "demotopic".to_string(),
            "demosub".to_string(),
            strategy,
            args.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn no_tokens_enables_both_loops() {
        let config = build(None, &[]).unwrap();
        assert!(config.enable_sender);
        assert!(config.enable_receiver);
        assert_eq!(config.service_name(), "BusDemo");
    }

    #[test]
    fn send_token_enables_only_the_producer() {
        let config = build(None, &["send"]).unwrap();
        assert!(config.enable_sender);
        assert!(!config.enable_receiver);
        assert_eq!(config.service_name(), "BusSender");
    }

    #[test]
    fn receive_token_enables_only_the_consumer() {
        let config = build(None, &["receive"]).unwrap();
        assert!(!config.enable_sender);
        assert!(config.enable_receiver);
        assert_eq!(config.service_name(), "BusReceiver");
    }

    #[test]
    fn both_tokens_enable_both_loops() {
        let config = build(None, &["send", "receive"]).unwrap();
        assert!(config.enable_sender);
        assert!(config.enable_receiver);
        assert_eq!(config.service_name(), "BusDemo");
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let config = build(None, &["noise"]).unwrap();
        assert!(!config.enable_sender);
        assert!(!config.enable_receiver);
    }

    #[test]
    fn strategy_defaults_to_pull_and_parses_case_insensitively() {
        assert_eq!(build(None, &[]).unwrap().strategy, ConsumerStrategy::Pull);
        assert_eq!(
            build(Some("Push"), &[]).unwrap().strategy,
            ConsumerStrategy::Push
        );
        assert!(build(Some("bogus"), &[]).is_err());
    }
}
