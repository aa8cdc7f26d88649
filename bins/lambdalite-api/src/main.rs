mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use lambdalite_engine::{EngineConfig, Orchestrator};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("LambdaLite API booting...");

    metrics::init_metrics();
    info!("Metrics registry initialized");

    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;
    info!(
        pool_size = config.pool_size,
        memory_mb = config.memory_limit_mb,
        cpu_limit = config.cpu_limit,
        standard = %config.standard_runtime,
        sandboxed = %config.sandboxed_runtime,
        "Engine configuration loaded"
    );

    // Docker must be reachable before anything else happens
    let orchestrator = Orchestrator::connect(config).await.map_err(|e| {
        error!(error = %e, "Container runtime unavailable");
        e
    })?;

    let started = orchestrator
        .warm_up()
        .await
        .context("Failed to provision execution images")?;
    if started == 0 {
        warn!("No warm containers started; every invocation will cold-start");
    }

    let orchestrator = Arc::new(orchestrator);
    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
    });

    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept invocations");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let drained = orchestrator.shutdown().await;
    info!(drained, "LambdaLite API stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining warm pool..."),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
