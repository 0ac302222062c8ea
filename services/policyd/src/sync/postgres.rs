//! Postgres `LISTEN/NOTIFY` implementation of the sync bus.
//!
//! # Key invariants
//! - Publishing uses `pg_notify` over the shared pool; a notification is
//!   delivered only if the publishing transaction commits, which for a bare
//!   `SELECT` is immediate.
//! - Each subscription owns a dedicated `PgListener` connection. A forwarding
//!   task drains it into a channel so `recv` stays cancel safe under the
//!   watcher's poll timeout.
//! - NOTIFY payloads must be shorter than 8000 bytes; larger payloads are
//!   rejected up front with [`BusError::PayloadTooLarge`].
use super::BusError;
use super::bus::{PubSub, Subscription};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest payload Postgres accepts in a NOTIFY.
pub const NOTIFY_PAYLOAD_LIMIT: usize = 7_999;

const LISTENER_BUFFER: usize = 256;
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PgNotifyBus {
    pool: PgPool,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PubSub for PgNotifyBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        if payload.len() > NOTIFY_PAYLOAD_LIMIT {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                limit: NOTIFY_PAYLOAD_LIMIT,
            });
        }
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BusError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;
        let (sender, receiver) = mpsc::channel(LISTENER_BUFFER);
        let channel = channel.to_string();
        let task = tokio::spawn(forward(listener, sender, channel));
        Ok(Box::new(PgSubscription {
            receiver,
            task: Some(task),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

async fn forward(
    mut listener: PgListener,
    sender: mpsc::Sender<Result<String, BusError>>,
    channel: String,
) {
    loop {
        let item = match listener.recv().await {
            Ok(notification) => Ok(notification.payload().to_string()),
            Err(err) => {
                // PgListener reconnects and re-listens on the next recv.
                tracing::warn!(error = %err, %channel, "policy sync listener error");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                Err(BusError::Database(err))
            }
        };
        if sender.send(item).await.is_err() {
            break;
        }
    }
    if let Err(err) = listener.unlisten(&channel).await {
        tracing::debug!(error = %err, %channel, "unlisten failed");
    }
}

struct PgSubscription {
    receiver: mpsc::Receiver<Result<String, BusError>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn recv(&mut self) -> Result<Option<String>, BusError> {
        match self.receiver.recv().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.receiver.close();
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for PgSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_io() {
        // Lazy pool: no connection is attempted unless a query runs.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost:1/unused")
            .expect("lazy pool");
        let bus = PgNotifyBus::new(pool);
        let err = bus
            .publish("casbin", "x".repeat(NOTIFY_PAYLOAD_LIMIT + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::PayloadTooLarge { limit: NOTIFY_PAYLOAD_LIMIT, .. }));
        assert_eq!(bus.backend_name(), "postgres");
    }
}
