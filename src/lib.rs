//! Topic/subscription messaging demo: a producer loop that sends bursts of
//! timestamped messages and a consumer that drains them either by polling
//! (pull) or through a push processor, all under one cooperative cancellation
//! signal and torn down in order by the lifecycle controller.

pub mod config;
pub mod consumer;
pub mod lifecycle;
pub mod message;
pub mod producer;
pub mod telemetry;
