//! Cross-instance policy synchronization.
//!
//! # Purpose
//! Mirrors every local policy mutation to the other replicas over a shared
//! pub/sub channel and replays their mutations locally.
//!
//! # How it fits
//! - [`message`] is the wire codec (`SyncMessage` / `SyncEvent`).
//! - [`bus`] defines the [`PubSub`] seam and the in-process [`MemoryBus`].
//! - [`postgres`] implements the bus over `LISTEN/NOTIFY`.
//! - [`watcher`] owns the origin identity, the guard and the subscriber loop.
//!
//! # Key invariants
//! - A replica never applies its own broadcast (matched by `origin_id`).
//! - Registration, publish and remote apply are serialized by one guard.
//! - Delivery is at most once and unordered across origins; replicas
//!   converge eventually, not linearizably.
use thiserror::Error;

pub mod bus;
pub mod message;
pub mod postgres;
pub mod watcher;

pub use bus::{MemoryBus, PubSub, Subscription};
pub use message::{Decoded, SyncEvent, SyncMessage};
pub use postgres::PgNotifyBus;
pub use watcher::{LogOnlyHandler, SyncHandler, SyncPermit, Watcher, WatcherConfig};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus closed")]
    Closed,
    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("watcher closed")]
    Closed,
    #[error("malformed sync message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl SyncError {
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, SyncError::Bus(BusError::PayloadTooLarge { .. }))
    }
}
