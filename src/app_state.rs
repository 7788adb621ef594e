//! Application state shared across all handlers (teacher's
//! `src/app_state.rs` idiom, trimmed to this system's components).

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::services::{
    ApprovalWorkflow, FxConverter, IngestionCoordinator, NotificationDispatcher, QueryService,
    RuleRegistry, RunningTotalEngine, StatusResolver,
};
use crate::store::SettlementStore;

#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL connection pool, used directly only by the health check.
    pub db: PgPool,
    pub config: Config,
    pub store: Arc<dyn SettlementStore>,
    pub fx: Arc<FxConverter>,
    pub rule_registry: Arc<RuleRegistry>,
    pub running_total: Arc<RunningTotalEngine>,
    pub ingestion: IngestionCoordinator,
    pub status_resolver: Arc<StatusResolver>,
    pub workflow: ApprovalWorkflow,
    pub notifications: Arc<NotificationDispatcher>,
    pub query: QueryService,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
