//! Policy daemon entry point.
//!
//! # Purpose
//! Loads configuration, builds one policy replica (store, sync watcher and
//! decision engine), and serves Prometheus metrics until shutdown.
//!
//! # Notes
//! `run_with_shutdown` keeps the lifecycle testable without signals.
use policyd::app::build_state;
use policyd::config::PolicydConfig;
use policyd::observability;
use std::future::Future;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PolicydConfig::from_env_or_yaml()?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: PolicydConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("warden-policyd");
    let state = build_state(&config).await?;
    let metrics_addr = config.metrics_bind;
    tracing::info!(%metrics_addr, "metrics listening");
    let mut metrics_task =
        tokio::spawn(observability::serve_metrics(metrics_handle, metrics_addr));

    tokio::pin!(shutdown);
    let metrics_stopped = tokio::select! {
        result = &mut metrics_task => {
            // The metrics endpoint is not essential to serving decisions.
            match result {
                Ok(Err(err)) => tracing::warn!(error = %err, "metrics server stopped"),
                Err(err) => tracing::warn!(error = %err, "metrics task failed"),
                Ok(Ok(())) => {}
            }
            true
        }
        _ = &mut shutdown => false,
    };
    if metrics_stopped {
        shutdown.await;
    } else {
        metrics_task.abort();
        let _ = metrics_task.await;
    }

    tracing::info!("shutting down policy replica");
    state.shutdown().await;
    Ok(())
}
