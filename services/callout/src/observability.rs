//! Tracing and metrics setup for the callout service.
//! Logs go to a formatted stdout layer filtered by `RUST_LOG` (default `info`).
//! A Prometheus recorder backs the `metrics` macros, and a small `axum` server
//! exposes `/metrics`, `/live`, and `/ready`.
//! Readiness follows the service state: only a listening service is ready.
//! In tests, the recorder is installed once and the handle cached.

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
#[cfg(test)]
use std::sync::OnceLock;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::service::ServiceState;

#[cfg(test)]
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes logging and installs the Prometheus recorder.
///
/// Returns the handle used to render `/metrics`.
pub fn init_observability(service_name: &str) -> Result<PrometheusHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();
    init_subscriber(tracing_subscriber::registry().with(filter).with(fmt_layer))?;

    let handle = install_metrics_recorder()?;
    tracing::debug!(service = service_name, "observability initialized");
    Ok(handle)
}

/// Routes for metrics and probes.
pub fn router(handle: PrometheusHandle, state: watch::Receiver<ServiceState>) -> Router {
    Router::new()
        .route("/metrics", get(move || async move { handle.render() }))
        .route("/live", get(|| async { "ok" }))
        .route(
            "/ready",
            get(move || {
                let state = *state.borrow();
                async move {
                    match state {
                        ServiceState::Listening => (StatusCode::OK, "ok"),
                        _ => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                    }
                }
            }),
        )
}

/// Serves metrics and probes on `addr` until the server fails.
pub async fn serve_metrics(
    handle: PrometheusHandle,
    addr: SocketAddr,
    state: watch::Receiver<ServiceState>,
) -> std::io::Result<()> {
    let app = router(handle, state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await
}

fn install_metrics_recorder() -> Result<PrometheusHandle> {
    #[cfg(test)]
    {
        if let Some(handle) = METRICS_HANDLE.get() {
            return Ok(handle.clone());
        }
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("install metrics recorder")?;
        let _ = METRICS_HANDLE.set(handle.clone());
        Ok(handle)
    }
    #[cfg(not(test))]
    {
        PrometheusBuilder::new()
            .install_recorder()
            .context("install metrics recorder")
    }
}

// In tests the subscriber may already be set by another test.
fn init_subscriber<S>(subscriber: S) -> Result<()>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    #[cfg(test)]
    {
        let _ = subscriber.try_init();
        Ok(())
    }
    #[cfg(not(test))]
    {
        subscriber.try_init().context("install tracing subscriber")
    }
}
