//! Policy sync watcher: origin identity, guard, publisher and subscriber loop.
//!
//! # Purpose
//! Broadcasts local policy mutations and feeds remote ones to a registered
//! [`SyncHandler`].
//!
//! # Key invariants
//! - `origin_id` is a random v4 UUID generated once per watcher; messages
//!   carrying it are dropped by this watcher's loop.
//! - One async mutex guards the handler. Registration, publishing through a
//!   [`SyncPermit`] and remote apply all hold it, so a remote message is never
//!   applied halfway through a local mutation.
//! - The loop polls with a bounded timeout and checks the stop flag between
//!   polls. Per-message failures are logged and never end the loop.
//! - When the bus ends the subscription the loop resubscribes with
//!   exponential backoff until it succeeds or the watcher stops. Messages
//!   published while no subscription is open are missed.
//!
//! # Example
//! ```rust
//! use policyd::sync::{MemoryBus, SyncEvent, Watcher, WatcherConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), policyd::sync::SyncError> {
//! let watcher = Watcher::start(Arc::new(MemoryBus::default()), WatcherConfig::default()).await?;
//! watcher.publish_update().await?;
//! watcher.close().await;
//! # Ok(())
//! # }
//! ```
use super::bus::{PubSub, Subscription};
use super::message::{Decoded, SyncEvent, SyncMessage};
use super::SyncError;
use crate::config::{DEFAULT_POLL_TIMEOUT_MS, DEFAULT_SYNC_CHANNEL};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use warden_authz::{FieldMatch, Section};

/// Receives remote sync messages. Called with the watcher guard held.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn apply(&self, message: SyncMessage) -> anyhow::Result<()>;
}

/// Placeholder handler used until the decision engine registers itself.
#[derive(Debug, Default)]
pub struct LogOnlyHandler;

#[async_trait]
impl SyncHandler for LogOnlyHandler {
    async fn apply(&self, message: SyncMessage) -> anyhow::Result<()> {
        tracing::info!(
            method = message.method(),
            origin_id = %message.origin_id,
            "policy sync message received without handler"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub channel: String,
    pub poll_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_SYNC_CHANNEL.to_string(),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

type SharedHandler = Arc<Mutex<Arc<dyn SyncHandler>>>;

const RESUBSCRIBE_BASE_DELAY: Duration = Duration::from_millis(50);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(5);

pub struct Watcher {
    origin_id: String,
    channel: String,
    bus: Arc<dyn PubSub>,
    handler: SharedHandler,
    stop: Arc<AtomicBool>,
    closed: AtomicBool,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("origin_id", &self.origin_id)
            .field("channel", &self.channel)
            .field("bus", &self.bus.backend_name())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Exclusive right to mutate policy state and publish the matching message.
pub struct SyncPermit<'a> {
    watcher: &'a Watcher,
    _guard: MutexGuard<'a, Arc<dyn SyncHandler>>,
}

impl SyncPermit<'_> {
    pub async fn publish(&self, event: SyncEvent) -> Result<(), SyncError> {
        self.watcher.send(event).await
    }
}

impl Watcher {
    /// Subscribe to the channel and start the subscriber loop.
    ///
    /// The subscription is established before this returns, so any message
    /// published afterwards is observed.
    pub async fn start(bus: Arc<dyn PubSub>, config: WatcherConfig) -> Result<Self, SyncError> {
        let origin_id = uuid::Uuid::new_v4().to_string();
        let subscription = bus.subscribe(&config.channel).await?;
        let handler: SharedHandler = Arc::new(Mutex::new(Arc::new(LogOnlyHandler)));
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(
            SubscriberLoop {
                origin_id: origin_id.clone(),
                bus: Arc::clone(&bus),
                channel: config.channel.clone(),
                handler: Arc::clone(&handler),
                stop: Arc::clone(&stop),
                poll_timeout: config.poll_timeout,
            }
            .run(subscription),
        );
        tracing::info!(
            %origin_id,
            channel = %config.channel,
            bus = bus.backend_name(),
            "policy sync watcher started"
        );
        Ok(Self {
            origin_id,
            channel: config.channel,
            bus,
            handler,
            stop,
            closed: AtomicBool::new(false),
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Replace the handler receiving remote messages.
    pub async fn set_handler(&self, handler: Arc<dyn SyncHandler>) {
        *self.handler.lock().await = handler;
    }

    /// Take the guard for a local mutation.
    pub async fn lock(&self) -> SyncPermit<'_> {
        SyncPermit {
            watcher: self,
            _guard: self.handler.lock().await,
        }
    }

    pub async fn publish_update(&self) -> Result<(), SyncError> {
        self.lock().await.publish(SyncEvent::FullReload).await
    }

    pub async fn publish_add(
        &self,
        sec: Section,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), SyncError> {
        let event = SyncEvent::AddOne {
            sec,
            ptype: ptype.to_string(),
            rule: rule.to_vec(),
        };
        self.lock().await.publish(event).await
    }

    pub async fn publish_remove(
        &self,
        sec: Section,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), SyncError> {
        let event = SyncEvent::RemoveOne {
            sec,
            ptype: ptype.to_string(),
            rule: rule.to_vec(),
        };
        self.lock().await.publish(event).await
    }

    pub async fn publish_remove_filtered(
        &self,
        sec: Section,
        ptype: &str,
        field_index: usize,
        values: &[FieldMatch],
    ) -> Result<(), SyncError> {
        let event = SyncEvent::RemoveFiltered {
            sec,
            ptype: ptype.to_string(),
            field_index,
            values: values.to_vec(),
        };
        self.lock().await.publish(event).await
    }

    pub async fn publish_save(&self, model_text: &str) -> Result<(), SyncError> {
        let event = SyncEvent::SaveModel {
            model_text: model_text.to_string(),
        };
        self.lock().await.publish(event).await
    }

    pub async fn publish_add_many(
        &self,
        sec: Section,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<(), SyncError> {
        let event = SyncEvent::AddMany {
            sec,
            ptype: ptype.to_string(),
            rules: rules.to_vec(),
        };
        self.lock().await.publish(event).await
    }

    pub async fn publish_remove_many(
        &self,
        sec: Section,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> Result<(), SyncError> {
        let event = SyncEvent::RemoveMany {
            sec,
            ptype: ptype.to_string(),
            rules: rules.to_vec(),
        };
        self.lock().await.publish(event).await
    }

    /// Stop the loop, wait for it to close its subscription, and reject
    /// further publishes.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.store(true, Ordering::Release);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "policy sync loop ended abnormally");
            }
        }
        tracing::info!(origin_id = %self.origin_id, "policy sync watcher closed");
    }

    async fn send(&self, event: SyncEvent) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let message = SyncMessage::new(self.origin_id.clone(), event);
        let method = message.method();
        let payload = message.encode()?;
        self.bus.publish(&self.channel, payload).await?;
        metrics::counter!("warden_sync_publish_total", "method" => method).increment(1);
        tracing::debug!(method, channel = %self.channel, "policy sync message published");
        Ok(())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // The loop notices within one poll timeout.
        self.stop.store(true, Ordering::Release);
    }
}

struct SubscriberLoop {
    origin_id: String,
    bus: Arc<dyn PubSub>,
    channel: String,
    handler: SharedHandler,
    stop: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl SubscriberLoop {
    async fn run(self, subscription: Box<dyn Subscription>) {
        let mut current = Some(subscription);
        while !self.stop.load(Ordering::Acquire) {
            let Some(subscription) = current.as_mut() else {
                current = self.resubscribe().await;
                continue;
            };
            match tokio::time::timeout(self.poll_timeout, subscription.recv()).await {
                Err(_) => continue,
                Ok(Ok(Some(payload))) => self.dispatch(&payload).await,
                Ok(Ok(None)) => {
                    tracing::warn!(channel = %self.channel, "policy sync bus closed, resubscribing");
                    subscription.close().await;
                    current = None;
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "policy sync receive failed");
                }
            }
        }
        if let Some(mut subscription) = current {
            subscription.close().await;
        }
    }

    /// Retry `subscribe` with backoff. Returns `None` once the watcher stops.
    async fn resubscribe(&self) -> Option<Box<dyn Subscription>> {
        let mut attempt = 0;
        while !self.stop.load(Ordering::Acquire) {
            tokio::time::sleep(resubscribe_delay(attempt).min(self.poll_timeout)).await;
            attempt += 1;
            match self.bus.subscribe(&self.channel).await {
                Ok(subscription) => {
                    metrics::counter!("warden_sync_resubscribe_total", "outcome" => "ok")
                        .increment(1);
                    tracing::info!(channel = %self.channel, attempt, "policy sync resubscribed");
                    return Some(subscription);
                }
                Err(err) => {
                    metrics::counter!("warden_sync_resubscribe_total", "outcome" => "failed")
                        .increment(1);
                    tracing::warn!(error = %err, attempt, "policy sync resubscribe failed");
                }
            }
        }
        None
    }

    async fn dispatch(&self, payload: &str) {
        let message = match SyncMessage::decode(payload) {
            Ok(Decoded::Known(message)) => message,
            Ok(Decoded::Unknown { method, origin_id }) => {
                if origin_id != self.origin_id {
                    tracing::warn!(%method, %origin_id, "ignoring unknown policy sync method");
                }
                record(method, "unknown");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed policy sync message");
                record("malformed".to_string(), "malformed");
                return;
            }
        };
        let method = message.method();
        if message.origin_id == self.origin_id {
            tracing::debug!(method, "skipping own policy sync message");
            record(method.to_string(), "own");
            return;
        }
        let origin_id = message.origin_id.clone();
        let handler = self.handler.lock().await;
        match handler.apply(message).await {
            Ok(()) => {
                tracing::debug!(method, %origin_id, "policy sync message applied");
                record(method.to_string(), "applied");
            }
            Err(err) => {
                tracing::warn!(error = %err, method, %origin_id, "policy sync message failed");
                record(method.to_string(), "failed");
            }
        }
    }
}

/// Exponential backoff capped at [`RESUBSCRIBE_MAX_DELAY`].
fn resubscribe_delay(attempt: u32) -> Duration {
    RESUBSCRIBE_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RESUBSCRIBE_MAX_DELAY)
}

fn record(method: String, outcome: &'static str) {
    metrics::counter!("warden_sync_messages_total", "method" => method, "outcome" => outcome)
        .increment(1);
}
