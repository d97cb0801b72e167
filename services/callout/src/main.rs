// Callout service main entry point.
use anyhow::Result;
use callout::bootstrap::{self, Bootstrap};
use callout::{config, observability};
use callout_authz::{ServerOptions, StrategyRegistry};
use callout_bus::InProcessBus;
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    run_with_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = config::CalloutConfig::from_env_or_yaml()?;
    let metrics_handle = observability::init_observability("callout")?;

    let (bootstrap, _server) = build(&config)?;
    let service = bootstrap.service;

    // Expose Prometheus metrics and probes on the configured bind address.
    let metrics_bind = config.metrics_bind;
    let state = service.state_receiver();
    tokio::spawn(async move {
        if let Err(err) = observability::serve_metrics(metrics_handle, metrics_bind, state).await {
            tracing::warn!(error = %err, "metrics server exited");
        }
    });

    // Standalone runs have no server connection; the in-process bus stands in
    // for it and sees no traffic unless an embedder publishes on it.
    let bus = InProcessBus::new();
    service.start(Arc::new(bus.clone())).await?;

    // Block until SIGINT so the process stays alive.
    shutdown.await;
    service.stop().await;
    bus.close();
    tracing::info!("callout stopped");
    Ok(())
}

/// Build the service and the server options it expects the server to run with.
fn build(config: &config::CalloutConfig) -> Result<(Bootstrap, ServerOptions)> {
    let mut server = config.server.clone();
    let registry = StrategyRegistry::default();
    let bootstrap = bootstrap::build_service(config, &mut server, &registry)?;
    report_server_options(&server);
    Ok((bootstrap, server))
}

fn report_server_options(server: &ServerOptions) {
    let accounts = server.accounts.as_ref().map_or(0, Vec::len);
    let callout = server
        .authorization
        .as_ref()
        .and_then(|auth| auth.auth_callout.as_ref());
    match callout {
        Some(callout) => tracing::info!(
            accounts,
            issuer = %callout.issuer,
            account = %callout.account,
            user = server.callout_credentials().map(|user| user.user).unwrap_or_default(),
            "server options carry an auth callout"
        ),
        None => tracing::info!(accounts, "server options carry no auth callout"),
    }
}
