//! # Purpose
//! Demonstrate two policy replicas converging over a shared bus.
//!
//! # What this demo proves
//! - A grant made on replica A becomes visible to replica B's `enforce`
//!   without B reading the policy store.
//! - Each replica skips the echo of its own broadcasts.
//! - Bulk and filtered removals replay on the peer.
//!
//! # High-level flow
//! 1. Build one in-memory store and one in-memory bus.
//! 2. Start replicas A and B over them.
//! 3. Grant `role::1` access to `/menu` on A and assign `user::1` to it.
//! 4. Wait for B to allow `user::1`.
//! 5. Remove every `role::1` permission on A with a filtered removal.
//! 6. Wait for B to deny again, then shut both replicas down.
//!
//! Set `RUST_LOG=debug` to see the watcher dispatch each message.
use anyhow::{Result, bail};
use policyd::app::{AppState, build_replica};
use policyd::observability::init_observability;
use policyd::store::PolicyStore;
use policyd::store::memory::InMemoryStore;
use policyd::sync::{MemoryBus, PubSub, WatcherConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use warden_authz::field_matches;

const SUBJECT: &str = "user::1";
const OBJECT: &str = "/menu";
const ACTION: &str = "GET";

#[tokio::main]
async fn main() -> Result<()> {
    let _metrics = init_observability("replica-sync-demo");

    let store: Arc<dyn PolicyStore> = Arc::new(InMemoryStore::new());
    let bus: Arc<dyn PubSub> = Arc::new(MemoryBus::default());
    let config = WatcherConfig {
        channel: "casbin".to_string(),
        poll_timeout: Duration::from_millis(50),
    };
    let a = build_replica(Arc::clone(&store), Arc::clone(&bus), config.clone()).await?;
    let b = build_replica(store, bus, config).await?;
    tracing::info!(
        a = a.enforcer.origin_id().unwrap_or_default(),
        b = b.enforcer.origin_id().unwrap_or_default(),
        "replicas started"
    );

    report("before grant", &a, &b);
    a.enforcer
        .add_permission_for_user("role::1", OBJECT, ACTION)
        .await?;
    a.enforcer.add_role_for_user(SUBJECT, "role::1").await?;
    wait_for(&b, true).await?;
    report("after grant on A", &a, &b);

    a.enforcer
        .remove_filtered_policy("p", 0, &field_matches(&["role::1"]))
        .await?;
    wait_for(&b, false).await?;
    report("after filtered removal on A", &a, &b);

    a.shutdown().await;
    b.shutdown().await;
    Ok(())
}

fn report(stage: &str, a: &AppState, b: &AppState) {
    println!(
        "{stage:<30} A: {:<5} B: {:<5} (rules A={} B={})",
        a.enforcer.enforce(SUBJECT, OBJECT, ACTION),
        b.enforcer.enforce(SUBJECT, OBJECT, ACTION),
        a.enforcer.policy_len(),
        b.enforcer.policy_len(),
    );
}

async fn wait_for(replica: &AppState, expected: bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while replica.enforcer.enforce(SUBJECT, OBJECT, ACTION) != expected {
        if Instant::now() >= deadline {
            bail!("replica never converged to allow={expected}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
