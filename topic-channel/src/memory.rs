//! In-process channel implementation backed by per-subscription queues.
//!
//! A topic fans each sent message out to every subscription that exists at
//! send time; each subscription keeps its own pending queue and in-flight set,
//! so two subscriptions consume independent copies of the stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

use crate::{ChannelError, Delivery, MessageId, Receiver, Sender};

/// Connection to an in-process topic/subscription channel.
///
/// Cloneable and internally thread-safe; senders and receivers created from
/// it share the connection and stop working once [`close`](Self::close) is
/// called.
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    endpoint: String,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

struct Topic {
    subscriptions: Mutex<HashMap<String, Arc<SubscriptionQueue>>>,
}

struct SubscriptionQueue {
    pending: Mutex<VecDeque<Delivery>>,
    in_flight: Mutex<HashMap<MessageId, Delivery>>,
    notify: Notify,
}

impl MemoryChannel {
    /// Validates the endpoint and opens a connection. The endpoint must look
    /// like `scheme://rest`; anything else fails fast.
    pub fn connect(endpoint: &str) -> Result<Self, ChannelError> {
        let trimmed = endpoint.trim();
        let well_formed = trimmed
            .split_once("://")
            .map(|(scheme, rest)| !scheme.is_empty() && !rest.is_empty())
            .unwrap_or(false);
        if !well_formed {
            return Err(ChannelError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self {
            inner: Arc::new(ChannelInner {
                endpoint: trimmed.to_string(),
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Creates a sender for `topic`, creating the topic if needed.
    pub fn sender(&self, topic: &str) -> MemorySender {
        self.inner.ensure_topic(topic);
        MemorySender {
            inner: self.inner.clone(),
            topic: topic.to_string(),
        }
    }

    /// Creates a receiver for `subscription` on `topic`, creating both if
    /// needed. The subscription only sees messages sent after it exists.
    pub fn receiver(&self, topic: &str, subscription: &str) -> MemoryReceiver {
        let queue = self.inner.ensure_subscription(topic, subscription);
        MemoryReceiver {
            inner: self.inner.clone(),
            queue,
        }
    }

    /// Closes the channel: subsequent sends fail and blocked receives return
    /// whatever is already pending. Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let topics = self.inner.topics.lock().unwrap();
        for topic in topics.values() {
            let subscriptions = topic.subscriptions.lock().unwrap();
            for queue in subscriptions.values() {
                queue.notify.notify_waiters();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl ChannelInner {
    fn ensure_topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Topic {
                    subscriptions: Mutex::new(HashMap::new()),
                })
            })
            .clone()
    }

    fn ensure_subscription(&self, topic: &str, subscription: &str) -> Arc<SubscriptionQueue> {
        let topic = self.ensure_topic(topic);
        let mut subscriptions = topic.subscriptions.lock().unwrap();
        subscriptions
            .entry(subscription.to_string())
            .or_insert_with(|| {
                Arc::new(SubscriptionQueue {
                    pending: Mutex::new(VecDeque::new()),
                    in_flight: Mutex::new(HashMap::new()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.lock().unwrap().get(name).cloned()
    }
}

impl SubscriptionQueue {
    /// Moves up to `max` pending deliveries into the in-flight set.
    fn take_batch(&self, max: usize) -> Vec<Delivery> {
        let mut pending = self.pending.lock().unwrap();
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = max.min(pending.len());
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let delivery = pending.pop_front().unwrap();
            in_flight.insert(delivery.id, delivery.clone());
            batch.push(delivery);
        }
        batch
    }
}

/// Sends messages to one topic of a [`MemoryChannel`].
#[derive(Clone)]
pub struct MemorySender {
    inner: Arc<ChannelInner>,
    topic: String,
}

#[async_trait]
impl Sender for MemorySender {
    async fn send(&self, body: String) -> Result<(), ChannelError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let topic = self
            .inner
            .topic(&self.topic)
            .ok_or_else(|| ChannelError::UnknownTopic(self.topic.clone()))?;
        let delivery = Delivery {
            id: MessageId(self.inner.next_id.fetch_add(1, Ordering::SeqCst)),
            body,
            enqueued_at: Utc::now(),
        };
        let subscriptions = topic.subscriptions.lock().unwrap();
        for queue in subscriptions.values() {
            queue.pending.lock().unwrap().push_back(delivery.clone());
            queue.notify.notify_waiters();
        }
        Ok(())
    }
}

/// Pull consumer for one subscription of a [`MemoryChannel`].
#[derive(Clone)]
pub struct MemoryReceiver {
    inner: Arc<ChannelInner>,
    queue: Arc<SubscriptionQueue>,
}

impl MemoryReceiver {
    /// Number of messages waiting to be received.
    pub fn pending(&self) -> usize {
        self.queue.pending.lock().unwrap().len()
    }

    /// Number of received but not yet completed messages.
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight.lock().unwrap().len()
    }
}

#[async_trait]
impl Receiver for MemoryReceiver {
    async fn receive(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<Delivery>, ChannelError> {
        let deadline = Instant::now() + max_wait;
        loop {
            // `enable` registers the waiter up front; a send that lands on
            // another thread between the queue check and the await still
            // completes the notification instead of being lost.
            let mut notified = std::pin::pin!(self.queue.notify.notified());
            notified.as_mut().enable();
            let batch = self.queue.take_batch(max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn complete(&self, id: MessageId) -> Result<(), ChannelError> {
        let mut in_flight = self.queue.in_flight.lock().unwrap();
        in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or(ChannelError::UnknownDelivery(id))
    }
}
