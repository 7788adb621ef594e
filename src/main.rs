//! Settlement ingestion and exposure-control engine — entry point.
//!
//! Thin entry point that delegates to the library's modular components
//! (teacher's `src/main.rs` idiom).

use std::net::SocketAddr;

use anyhow::Result;
use settlement_exposure_engine::{config::Config, router, startup};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("starting settlement-exposure-engine");

    let config = Config::from_env()?;
    info!(environment = %config.environment, "configuration loaded");

    let (app_state, shutdown_tx) = startup::initialize_app(&config).await?;
    startup::spawn_background_tasks(&app_state, &shutdown_tx.subscribe());

    let http_port = config.http_port;
    let app = router::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            startup::shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
