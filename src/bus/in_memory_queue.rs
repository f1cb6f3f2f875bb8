//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides a thread-safe in-memory broker that implements the
//! [`Broker`] trait, useful for:
//! - Unit and integration testing without external dependencies
//! - Single-process applications
//! - Development and prototyping

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Broker, BrokerError, BrokerSubscription, Message};

#[derive(Default)]
struct QueueState {
    /// Every published message, in publish order
    log: Vec<(String, Message)>,
    /// Live subscriptions per topic
    subscribers: HashMap<String, Vec<(u64, Sender<Message>)>>,
    acked: Vec<String>,
    nacked: Vec<(String, String)>,
    /// Pending injected publish failures
    reject_publishes: usize,
}

/// In-memory broker.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Fan-out: every subscription of a topic receives every message
/// - Messages are kept in an append-only log and replayed to new
///   subscriptions, so a late subscriber still sees earlier messages
/// - Records acks and nacks for assertions
///
/// ## Example
///
/// ```
/// use txpublish::bus::{Broker, InMemoryQueue, Message};
/// use std::time::Duration;
///
/// let queue = InMemoryQueue::new();
/// queue.publish("orders", Message::with_uuid("m-1", b"{}".to_vec())).unwrap();
///
/// let subscription = queue.subscribe("orders").unwrap();
/// let message = subscription.receiver.recv_timeout(Duration::from_millis(100)).unwrap();
/// assert_eq!(message.uuid, "m-1");
/// ```
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    next_subscription: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl InMemoryQueue {
    /// Create a new in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, operation: &'static str) -> Result<MutexGuard<'_, QueueState>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Poisoned(operation))
    }

    /// Make the next `count` publishes fail with [`BrokerError::Rejected`].
    pub fn reject_next_publishes(&self, count: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_publishes = count;
        }
    }

    /// Get all published messages with their topics.
    pub fn published(&self) -> Vec<(String, Message)> {
        self.state
            .lock()
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    /// Get the messages published to one topic.
    pub fn published_on(&self, topic: &str) -> Vec<Message> {
        self.state
            .lock()
            .map(|s| {
                s.log
                    .iter()
                    .filter(|(t, _)| t == topic)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get the total number of published messages.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.log.len()).unwrap_or_default()
    }

    /// Check if nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get acknowledged message ids.
    pub fn acknowledged(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.acked.clone())
            .unwrap_or_default()
    }

    /// Get rejected message ids with their reasons.
    pub fn nacked(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .map(|s| s.nacked.clone())
            .unwrap_or_default()
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.subscribers.get(topic).map_or(0, Vec::len))
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Clear the log and the ack/nack records (useful for test cleanup).
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.log.clear();
            state.acked.clear();
            state.nacked.clear();
        }
    }
}

impl Broker for InMemoryQueue {
    fn publish(&self, topic: &str, message: Message) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let mut state = self.state("publish")?;
        if state.reject_publishes > 0 {
            state.reject_publishes -= 1;
            return Err(BrokerError::Rejected(format!(
                "injected failure for {}",
                topic
            )));
        }

        if let Some(subscribers) = state.subscribers.get_mut(topic) {
            // Receivers that went away are pruned on the way.
            subscribers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        }
        state.log.push((topic.to_string(), message));
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<BrokerSubscription, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let mut state = self.state("subscribe")?;
        let (tx, rx) = channel();

        for (_, message) in state.log.iter().filter(|(t, _)| t == topic) {
            // The receiver is alive in this scope.
            let _ = tx.send(message.clone());
        }

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));

        Ok(BrokerSubscription { id, receiver: rx })
    }

    fn unsubscribe(&self, topic: &str, subscription_id: u64) -> Result<(), BrokerError> {
        let mut state = self.state("unsubscribe")?;
        if let Some(subscribers) = state.subscribers.get_mut(topic) {
            subscribers.retain(|(id, _)| *id != subscription_id);
        }
        Ok(())
    }

    fn ack(&self, _topic: &str, message_id: &str) -> Result<(), BrokerError> {
        self.state("ack")?.acked.push(message_id.to_string());
        Ok(())
    }

    fn nack(&self, _topic: &str, message_id: &str, reason: &str) -> Result<(), BrokerError> {
        // No redelivery in memory; the record is enough for tests.
        self.state("nack")?
            .nacked
            .push((message_id.to_string(), reason.to_string()));
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the senders disconnects every receiver.
        self.state("close")?.subscribers.clear();
        Ok(())
    }
}
