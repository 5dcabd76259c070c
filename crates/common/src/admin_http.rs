//! Lightweight admin HTTP server spawner
//!
//! Exposes `/healthz` and `/metrics` endpoints, with metrics provided by caller.
//! The admin listener is separate from the multiplexed listener so that
//! content-based routing never sees operational traffic.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Renders the metrics exposition; supplied by the crate that owns the registry.
pub type MetricsFn = fn() -> (StatusCode, String);

async fn healthz() -> &'static str {
    "OK"
}

fn admin_router(metrics_fn: MetricsFn) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(move || async move { metrics_fn() }))
}

/// Bind the admin listener and serve it on a background task until `shutdown`
/// is cancelled. Returns the resolved address (useful with port 0).
pub async fn spawn_admin_server(
    addr: &str,
    metrics_fn: MetricsFn,
    shutdown: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("cannot bind admin listener {addr}: {e}"))?;
    let local = listener.local_addr()?;
    info!(service = "admin", event = "listen", %local, "admin server listening");

    let handle = tokio::spawn(async move {
        let router = admin_router(metrics_fn);
        let stop = async move { shutdown.cancelled().await };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(stop).await {
            warn!(service = "admin", event = "serve_failed", error = %e, "admin server exited with error");
        }
        info!(service = "admin", event = "stop", "admin server stopped");
    });

    Ok((local, handle))
}

/// Wait for the admin task to finish. A panicked or aborted task is logged
/// and reported as `false`.
pub async fn join_admin_server(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!(service = "admin", event = "admin_join_failed", error = %e, "admin server task failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_metrics() -> (StatusCode, String) {
        (StatusCode::OK, "fake_metric 1\n".to_string())
    }

    #[tokio::test]
    async fn admin_server_serves_health_and_metrics_until_cancelled() -> anyhow::Result<()> {
        let token = CancellationToken::new();
        let (addr, handle) = spawn_admin_server("127.0.0.1:0", fake_metrics, token.clone()).await?;

        let health = reqwest::get(format!("http://{addr}/healthz")).await?;
        assert_eq!(health.status(), reqwest::StatusCode::OK);
        assert_eq!(health.text().await?, "OK");

        let metrics = reqwest::get(format!("http://{addr}/metrics")).await?.text().await?;
        assert!(metrics.contains("fake_metric 1"));

        token.cancel();
        assert!(join_admin_server(handle).await);
        Ok(())
    }

    #[tokio::test]
    async fn failed_admin_task_is_reported() {
        let handle = tokio::spawn(async { panic!("admin task blew up") });
        assert!(!join_admin_server(handle).await);
    }
}
