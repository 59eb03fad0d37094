//! Standalone entry point; the harness normally embeds the router instead.

use anyhow::Context;
use reqbench_app::{build_router, mint_token, AppConfig, AppState};
use reqbench_core::HarnessConfig;
use reqbench_db::{DatabaseBackend, Provisioner};
use reqbench_reliability::ReliabilityManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HarnessConfig::load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let reliability = Arc::new(ReliabilityManager::from_config(&config.reliability));
    let backend = DatabaseBackend::from_config(&config.database)?;
    let db = Provisioner::new(config.database.clone(), reliability)
        .provision(&backend)
        .await?;

    let token = mint_token(&config.auth, db.system_user, "system")?;
    let app = build_router(AppState::new(Arc::clone(&db.store)), &AppConfig::from_harness(&config));

    let addr = std::env::var("REQBENCH_APP_ADDR").unwrap_or_else(|_| format!("{}:8080", config.server.host));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, backend = %db.backend, "reqbench-app listening");
    info!(%token, "bearer token for the system user");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    db.store.close().await;
    db.teardown.teardown().await?;
    info!("reqbench-app shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("received Ctrl-C, shutting down");
}
