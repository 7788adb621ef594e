//! Storage abstraction (C3 Settlement Store, C10 Query/Search) plus the
//! workflow/activity/notification tables that share the same transactional
//! substrate. Expressed as a capability trait so the Postgres adapter can be
//! swapped for an in-memory double in tests (spec.md §9 "port-adapter
//! organization ... express component boundaries as interface
//! abstractions").

pub mod mock;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{
    ActionType, Activity, CalculationRule, DeadLetterEvent, GroupKey, NotificationFailure,
    NotificationQueueEntry, RunningTotal, Settlement, WorkflowState,
};

pub use mock::MockSettlementStore;
pub use postgres::PgSettlementStore;

/// Search criteria for C10 (`GET /api/settlements`).
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub pts: Option<String>,
    pub processing_entity: Option<String>,
    pub counterparty_id: Option<String>,
    pub value_date_from: Option<NaiveDate>,
    pub value_date_to: Option<NaiveDate>,
    pub direction: Option<String>,
    pub business_status: Option<String>,
}

/// All persistence operations needed by C5 (ingestion), C6 (running-total),
/// C7 (status resolution), C8 (workflow) and C10 (query/search). Every
/// method that spec.md places "within a caller-supplied transaction" takes
/// `&self` and manages its own transaction internally here: callers that
/// need several of these calls to commit atomically use the
/// `*_in_transaction`-suffixed variants or `begin`/`commit` directly against
/// the pool the concrete adapter wraps.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// C3 `save` + `mark_old_versions` + `find_previous_counterparty`,
    /// performed atomically in one transaction up through commit (spec.md
    /// §4.5 steps 2-5). Idempotent: ingesting the same
    /// `(settlement_id, pts, processing_entity, settlement_version)` twice
    /// returns the same `ref_id` and performs no further writes (P4).
    async fn ingest_settlement(&self, settlement: &NewSettlement) -> Result<IngestOutcome>;

    /// C3 `find_latest_version`: the row with the maximum `ref_id` for the
    /// natural key.
    async fn find_latest_version(
        &self,
        settlement_id: &str,
        pts: &str,
        processing_entity: &str,
    ) -> Result<Option<Settlement>>;

    /// C3 `find_by_group_filtered`: rows in group where `ref_id <= max_ref_id`,
    /// `is_old = false`, `direction = PAY`, `business_status != CANCELLED`.
    async fn find_by_group_filtered(
        &self,
        group: &GroupKey,
        max_ref_id: i64,
    ) -> Result<Vec<Settlement>>;

    /// C10 `search`.
    async fn search(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Settlement>>;

    /// C10 `find_by_id`: latest version by business settlement id.
    async fn find_by_id(&self, settlement_id: &str) -> Result<Option<Settlement>>;

    /// C7/C8 lookup by the exact natural key `(settlement_id, settlement_version)`,
    /// used when a caller (status query, workflow transition) names a
    /// specific version rather than "whatever is latest".
    async fn find_by_settlement_version(
        &self,
        settlement_id: &str,
        settlement_version: i64,
    ) -> Result<Option<Settlement>>;

    /// C10 `get_distinct_groups`.
    async fn get_distinct_groups(&self, criteria: &SearchCriteria) -> Result<Vec<GroupKey>>;

    /// Running total for a group, if one has been computed yet.
    async fn get_running_total(&self, group: &GroupKey) -> Result<Option<RunningTotal>>;

    /// Upserts the RunningTotal row for `group` (C6 step 6).
    async fn upsert_running_total(
        &self,
        group: &GroupKey,
        total: Decimal,
        watermark_ref_id: i64,
    ) -> Result<()>;

    /// C4: configured rule, if any (no default fallback — callers apply
    /// [`CalculationRule::default_rule`] themselves when this returns
    /// `None`, since the default depends on the caller's (pts, pe)).
    async fn get_calculation_rule(
        &self,
        pts: &str,
        processing_entity: &str,
    ) -> Result<Option<CalculationRule>>;

    /// C4: configured exposure limit for a counterparty, if any.
    async fn get_exposure_limit(&self, counterparty_id: &str) -> Result<Option<Decimal>>;

    /// C8: current workflow state for (settlement_id, version), defaulting
    /// to `None` (interpreted as [`WorkflowState::Auto`] by the caller) when
    /// no row exists yet.
    async fn get_workflow_state(
        &self,
        settlement_id: &str,
        settlement_version: i64,
    ) -> Result<Option<WorkflowState>>;

    /// C8: persists a new workflow state and appends an [`Activity`] row in
    /// the same transaction.
    async fn transition_workflow(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        pts: &str,
        processing_entity: &str,
        new_state: WorkflowState,
        action_type: ActionType,
        user_id: &str,
        user_name: &str,
        comment: Option<&str>,
    ) -> Result<()>;

    /// C8 segregation check: the `user_id` on the latest REQUEST_RELEASE
    /// activity for this (settlement_id, version).
    async fn latest_activity_user(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        action_type: ActionType,
    ) -> Result<Option<String>>;

    /// C9: enqueue a notification for delivery.
    async fn enqueue_notification(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        status: &str,
        details: &str,
    ) -> Result<i64>;

    /// C9: notifications whose `next_attempt_at <= now`.
    async fn due_notifications(&self, now: DateTime<Utc>) -> Result<Vec<NotificationQueueEntry>>;

    /// C9: removes a successfully delivered notification.
    async fn delete_notification(&self, id: i64) -> Result<()>;

    /// C9: bumps retry bookkeeping after a failed delivery attempt.
    async fn reschedule_notification(
        &self,
        id: i64,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()>;

    /// C9: moves an exhausted notification to the failure table.
    async fn move_notification_to_failure(&self, entry: &NotificationQueueEntry) -> Result<()>;

    /// Lists failed notifications (admin visibility, SPEC_FULL §3).
    async fn list_notification_failures(&self) -> Result<Vec<NotificationFailure>>;

    /// C6: writes a dead-letter row after retry exhaustion.
    async fn write_dead_letter(
        &self,
        group: &GroupKey,
        ref_id: i64,
        attempts: i32,
        last_error: &str,
    ) -> Result<()>;

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEvent>>;
}

/// Result of the atomic ingest step (spec.md §4.5 steps 2-5).
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub ref_id: i64,
    /// `true` if this call performed the insert; `false` if it returned an
    /// already-persisted `ref_id` for a duplicate natural key (P4).
    pub inserted: bool,
    /// The counterparty of the previous version for this natural key, if
    /// any existed (spec.md §4.5 step 4, regroup detection).
    pub previous_counterparty: Option<String>,
}

/// Fields required to persist a new settlement version (everything in
/// [`Settlement`] except the server-assigned `ref_id`/`is_old`/`created_at`).
#[derive(Debug, Clone)]
pub struct NewSettlement {
    pub settlement_id: String,
    pub settlement_version: i64,
    pub pts: String,
    pub processing_entity: String,
    pub counterparty_id: String,
    pub value_date: NaiveDate,
    pub currency: String,
    pub amount: Decimal,
    pub business_status: crate::models::BusinessStatus,
    pub direction: crate::models::Direction,
    pub settlement_type: crate::models::SettlementType,
}

impl From<&crate::validation::ValidatedSettlement> for NewSettlement {
    fn from(v: &crate::validation::ValidatedSettlement) -> Self {
        Self {
            settlement_id: v.settlement_id.clone(),
            settlement_version: v.settlement_version,
            pts: v.pts.clone(),
            processing_entity: v.processing_entity.clone(),
            counterparty_id: v.counterparty_id.clone(),
            value_date: v.value_date,
            currency: v.currency.clone(),
            amount: v.amount,
            business_status: v.business_status,
            direction: v.direction,
            settlement_type: v.settlement_type,
        }
    }
}
