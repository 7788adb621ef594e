//! Application startup and initialization logic (teacher's `src/startup.rs`
//! idiom: one function that wires every service into an `AppState`, a
//! second that spawns the background refresh/dispatch loops, a third that
//! waits for the shutdown signal).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::info;

use crate::app_state::AppState;
use crate::config::Config;
use crate::database;
use crate::services::{
    ApprovalWorkflow, FxConverter, IngestionCoordinator, NotificationDispatcher, QueryService,
    RuleRegistry, RunningTotalEngine, StatusResolver,
};
use crate::store::PgSettlementStore;

/// Builds every service and returns the shared [`AppState`], plus the
/// shutdown sender background tasks listen on.
pub async fn initialize_app(config: &Config) -> Result<(AppState, watch::Sender<bool>)> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    info!("Prometheus metrics initialized");

    let db_pool = database::setup_database(&config.database_url, config.db_max_connections).await?;
    database::run_migrations(&db_pool).await?;

    let store = Arc::new(PgSettlementStore::new(db_pool.clone()));

    let default_limit = Decimal::from_str(&config.default_exposure_limit_usd)
        .map_err(|e| anyhow::anyhow!("invalid default_exposure_limit_usd: {e}"))?;

    let fx = Arc::new(FxConverter::new(config.fx_rate_source_url.clone()));
    let rule_registry = Arc::new(RuleRegistry::new(default_limit, config.rule_registry_source_url.clone()));
    fx.refresh().await;
    rule_registry.refresh().await;

    let running_total = Arc::new(RunningTotalEngine::new(
        store.clone(),
        fx.clone(),
        rule_registry.clone(),
    ));
    let ingestion = IngestionCoordinator::new(store.clone(), running_total.clone());
    let status_resolver = Arc::new(StatusResolver::new(store.clone(), rule_registry.clone(), fx.clone()));
    let notifications = Arc::new(NotificationDispatcher::new(
        store.clone(),
        config.notification_endpoint_url.clone(),
        config.notification_max_retries,
    ));
    let workflow = ApprovalWorkflow::new(store.clone(), status_resolver.clone(), notifications.clone());
    let query = QueryService::new(store.clone(), status_resolver.clone());

    let (shutdown_tx, _) = watch::channel(false);

    let app_state = AppState {
        db: db_pool,
        config: config.clone(),
        store,
        fx,
        rule_registry,
        running_total,
        ingestion,
        status_resolver,
        workflow,
        notifications,
        query,
        metrics_handle,
    };

    info!("application state initialized");
    Ok((app_state, shutdown_tx))
}

/// Spawns the FX refresh, rule/limit refresh and notification dispatch
/// loops. Each listens on its own clone of `shutdown_rx` and exits when the
/// sender fires.
pub fn spawn_background_tasks(app_state: &AppState, shutdown_rx: &watch::Receiver<bool>) {
    let fx = app_state.fx.clone();
    let period = Duration::from_secs(app_state.config.rate_refresh_seconds);
    let rx = shutdown_rx.clone();
    tokio::spawn(async move { fx.run_refresh_loop(period, rx).await });
    info!("FX refresh loop spawned");

    let registry = app_state.rule_registry.clone();
    let period = Duration::from_secs(app_state.config.rule_refresh_seconds);
    let rx = shutdown_rx.clone();
    tokio::spawn(async move { registry.run_refresh_loop(period, rx).await });
    info!("rule registry refresh loop spawned");

    let notifications = app_state.notifications.clone();
    let rx = shutdown_rx.clone();
    tokio::spawn(async move { notifications.run_dispatch_loop(Duration::from_secs(30), rx).await });
    info!("notification dispatch loop spawned");
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
