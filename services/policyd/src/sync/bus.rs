//! Pub/sub seam for policy sync plus the in-process implementation.
use super::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Default per-channel buffer for [`MemoryBus`].
pub const DEFAULT_MEMORY_CAPACITY: usize = 1024;

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError>;
    fn backend_name(&self) -> &'static str;
}

/// One subscriber session on a channel.
///
/// `recv` must be cancel safe: the watcher wraps it in a poll timeout.
#[async_trait]
pub trait Subscription: Send {
    /// Next payload, or `Ok(None)` once the bus has gone away.
    async fn recv(&mut self) -> Result<Option<String>, BusError>;
    async fn close(&mut self);
}

/// In-process bus built on `tokio::sync::broadcast`, one sender per channel.
///
/// Every subscriber, including the publisher's own, receives every payload.
/// A subscriber that falls more than `capacity` messages behind observes
/// [`BusError::Lagged`] and continues from the oldest retained payload.
#[derive(Debug)]
pub struct MemoryBus {
    capacity: usize,
    payload_limit: Option<usize>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            payload_limit: None,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Reject payloads longer than `limit` bytes, like a NOTIFY-backed bus.
    pub fn with_payload_limit(mut self, limit: usize) -> Self {
        self.payload_limit = Some(limit);
        self
    }

    /// Drop every channel; open subscriptions then observe end of stream.
    pub fn shutdown(&self) {
        self.channels.lock().clear();
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl PubSub for MemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        if let Some(limit) = self.payload_limit {
            if payload.len() > limit {
                return Err(BusError::PayloadTooLarge {
                    size: payload.len(),
                    limit,
                });
            }
        }
        // No subscribers is not an error for a broadcast bus.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError> {
        Ok(Box::new(MemorySubscription {
            receiver: Some(self.sender(channel).subscribe()),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemorySubscription {
    receiver: Option<broadcast::Receiver<String>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Option<String>, BusError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(BusError::Closed);
        };
        match receiver.recv().await {
            Ok(payload) => Ok(Some(payload)),
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(BusError::Lagged(skipped)),
        }
    }

    async fn close(&mut self) {
        self.receiver = None;
    }
}
