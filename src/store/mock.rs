//! In-memory [`SettlementStore`] double used by scenario tests where no live
//! Postgres is available. Guards all tables behind a single
//! `std::sync::Mutex` rather than per-table locks: the natural-key and
//! transactional invariants this type exists to exercise are easier to
//! reason about with one lock than with lock-ordering across several.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::models::{
    ActionType, Activity, CalculationRule, DeadLetterEvent, ExposureLimit, GroupKey,
    NotificationFailure, NotificationQueueEntry, RunningTotal, Settlement, WorkflowState,
};

use super::{IngestOutcome, NewSettlement, SearchCriteria, SettlementStore};

#[derive(Default)]
struct Inner {
    settlements: Vec<Settlement>,
    next_ref_id: i64,
    running_totals: HashMap<GroupKey, RunningTotal>,
    next_running_total_id: i64,
    calculation_rules: HashMap<(String, String), CalculationRule>,
    exposure_limits: HashMap<String, ExposureLimit>,
    workflow_states: HashMap<(String, i64), WorkflowState>,
    activities: Vec<Activity>,
    next_activity_id: i64,
    notification_queue: Vec<NotificationQueueEntry>,
    next_notification_id: i64,
    notification_failures: Vec<NotificationFailure>,
    next_failure_id: i64,
    dead_letters: Vec<DeadLetterEvent>,
    next_dead_letter_id: i64,
}

/// In-memory stand-in for [`crate::store::PgSettlementStore`]. Exposes a few
/// `seed_*` helpers beyond the trait for test setup.
pub struct MockSettlementStore {
    inner: Mutex<Inner>,
}

impl Default for MockSettlementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSettlementStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn seed_calculation_rule(&self, rule: CalculationRule) {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        inner
            .calculation_rules
            .insert((rule.pts.clone(), rule.processing_entity.clone()), rule);
    }

    pub fn seed_exposure_limit(&self, counterparty_id: &str, limit_usd: Decimal) {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        inner.exposure_limits.insert(
            counterparty_id.to_string(),
            ExposureLimit {
                counterparty_id: counterparty_id.to_string(),
                limit_usd,
            },
        );
    }
}

#[async_trait]
impl SettlementStore for MockSettlementStore {
    async fn ingest_settlement(&self, settlement: &NewSettlement) -> Result<IngestOutcome> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");

        if let Some(existing) = inner.settlements.iter().find(|s| {
            s.settlement_id == settlement.settlement_id
                && s.pts == settlement.pts
                && s.processing_entity == settlement.processing_entity
                && s.settlement_version == settlement.settlement_version
        }) {
            return Ok(IngestOutcome {
                ref_id: existing.ref_id,
                inserted: false,
                previous_counterparty: None,
            });
        }

        let previous_counterparty = inner
            .settlements
            .iter()
            .filter(|s| {
                s.settlement_id == settlement.settlement_id
                    && s.pts == settlement.pts
                    && s.processing_entity == settlement.processing_entity
            })
            .max_by_key(|s| s.ref_id)
            .map(|s| s.counterparty_id.clone());

        inner.next_ref_id += 1;
        let ref_id = inner.next_ref_id;

        for s in inner.settlements.iter_mut().filter(|s| {
            s.settlement_id == settlement.settlement_id
                && s.pts == settlement.pts
                && s.processing_entity == settlement.processing_entity
        }) {
            s.is_old = true;
        }

        inner.settlements.push(Settlement {
            ref_id,
            settlement_id: settlement.settlement_id.clone(),
            settlement_version: settlement.settlement_version,
            pts: settlement.pts.clone(),
            processing_entity: settlement.processing_entity.clone(),
            counterparty_id: settlement.counterparty_id.clone(),
            value_date: settlement.value_date,
            currency: settlement.currency.clone(),
            amount: settlement.amount,
            business_status: settlement.business_status,
            direction: settlement.direction,
            settlement_type: settlement.settlement_type,
            is_old: false,
            created_at: Utc::now(),
        });

        Ok(IngestOutcome {
            ref_id,
            inserted: true,
            previous_counterparty,
        })
    }

    async fn find_latest_version(
        &self,
        settlement_id: &str,
        pts: &str,
        processing_entity: &str,
    ) -> Result<Option<Settlement>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .settlements
            .iter()
            .filter(|s| {
                s.settlement_id == settlement_id
                    && s.pts == pts
                    && s.processing_entity == processing_entity
            })
            .max_by_key(|s| s.ref_id)
            .cloned())
    }

    async fn find_by_group_filtered(
        &self,
        group: &GroupKey,
        max_ref_id: i64,
    ) -> Result<Vec<Settlement>> {
        use crate::models::BusinessStatus;

        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .settlements
            .iter()
            .filter(|s| {
                s.pts == group.pts
                    && s.processing_entity == group.processing_entity
                    && s.counterparty_id == group.counterparty_id
                    && s.value_date == group.value_date
                    && s.ref_id <= max_ref_id
                    && !s.is_old
                    && s.business_status != BusinessStatus::Cancelled
            })
            .cloned()
            .collect())
    }

    async fn search(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Settlement>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        let mut matches: Vec<Settlement> = inner
            .settlements
            .iter()
            .filter(|s| !s.is_old)
            .filter(|s| criteria.pts.as_deref().map_or(true, |v| v == s.pts))
            .filter(|s| {
                criteria
                    .processing_entity
                    .as_deref()
                    .map_or(true, |v| v == s.processing_entity)
            })
            .filter(|s| {
                criteria
                    .counterparty_id
                    .as_deref()
                    .map_or(true, |v| v == s.counterparty_id)
            })
            .filter(|s| {
                criteria
                    .direction
                    .as_deref()
                    .map_or(true, |v| v == s.direction.as_str())
            })
            .filter(|s| {
                criteria
                    .business_status
                    .as_deref()
                    .map_or(true, |v| v == s.business_status.as_str())
            })
            .filter(|s| {
                criteria
                    .value_date_from
                    .map_or(true, |from| s.value_date >= from)
            })
            .filter(|s| criteria.value_date_to.map_or(true, |to| s.value_date <= to))
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.ref_id.cmp(&a.ref_id));
        Ok(matches
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_by_id(&self, settlement_id: &str) -> Result<Option<Settlement>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .settlements
            .iter()
            .filter(|s| s.settlement_id == settlement_id)
            .max_by_key(|s| s.ref_id)
            .cloned())
    }

    async fn find_by_settlement_version(
        &self,
        settlement_id: &str,
        settlement_version: i64,
    ) -> Result<Option<Settlement>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .settlements
            .iter()
            .find(|s| s.settlement_id == settlement_id && s.settlement_version == settlement_version)
            .cloned())
    }

    async fn get_distinct_groups(&self, criteria: &SearchCriteria) -> Result<Vec<GroupKey>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        let mut groups: Vec<GroupKey> = inner
            .settlements
            .iter()
            .filter(|s| !s.is_old)
            .filter(|s| criteria.pts.as_deref().is_none_or(|v| v == s.pts))
            .filter(|s| {
                criteria
                    .processing_entity
                    .as_deref()
                    .is_none_or(|v| v == s.processing_entity)
            })
            .map(|s| s.group_key())
            .collect();
        groups.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        groups.dedup();
        Ok(groups)
    }

    async fn get_running_total(&self, group: &GroupKey) -> Result<Option<RunningTotal>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner.running_totals.get(group).cloned())
    }

    async fn upsert_running_total(
        &self,
        group: &GroupKey,
        total: Decimal,
        watermark_ref_id: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        let id = match inner.running_totals.get(group) {
            Some(existing) => existing.id,
            None => {
                inner.next_running_total_id += 1;
                inner.next_running_total_id
            }
        };
        inner.running_totals.insert(
            group.clone(),
            RunningTotal {
                id,
                pts: group.pts.clone(),
                processing_entity: group.processing_entity.clone(),
                counterparty_id: group.counterparty_id.clone(),
                value_date: group.value_date,
                total,
                ref_id: watermark_ref_id,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_calculation_rule(
        &self,
        pts: &str,
        processing_entity: &str,
    ) -> Result<Option<CalculationRule>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .calculation_rules
            .get(&(pts.to_string(), processing_entity.to_string()))
            .cloned())
    }

    async fn get_exposure_limit(&self, counterparty_id: &str) -> Result<Option<Decimal>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .exposure_limits
            .get(counterparty_id)
            .map(|l| l.limit_usd))
    }

    async fn get_workflow_state(
        &self,
        settlement_id: &str,
        settlement_version: i64,
    ) -> Result<Option<WorkflowState>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .workflow_states
            .get(&(settlement_id.to_string(), settlement_version))
            .copied())
    }

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
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        inner
            .workflow_states
            .insert((settlement_id.to_string(), settlement_version), new_state);

        inner.next_activity_id += 1;
        let id = inner.next_activity_id;
        inner.activities.push(Activity {
            id,
            pts: pts.to_string(),
            processing_entity: processing_entity.to_string(),
            settlement_id: settlement_id.to_string(),
            settlement_version,
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            action_type,
            comment: comment.map(|c| c.to_string()),
            create_time: Utc::now(),
        });
        Ok(())
    }

    async fn latest_activity_user(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        action_type: ActionType,
    ) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner
            .activities
            .iter()
            .filter(|a| {
                a.settlement_id == settlement_id
                    && a.settlement_version == settlement_version
                    && a.action_type == action_type
            })
            .max_by_key(|a| a.create_time)
            .map(|a| a.user_id.clone()))
    }

    async fn enqueue_notification(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        status: &str,
        details: &str,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        inner.next_notification_id += 1;
        let id = inner.next_notification_id;
        inner.notification_queue.push(NotificationQueueEntry {
            id,
            settlement_id: settlement_id.to_string(),
            settlement_version,
            status: status.to_string(),
            details: details.to_string(),
            retry_count: 0,
            next_attempt_at: Utc::now(),
            created_at: Utc::now(),
            last_error: None,
        });
        Ok(id)
    }

    async fn due_notifications(&self, now: DateTime<Utc>) -> Result<Vec<NotificationQueueEntry>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        let mut due: Vec<NotificationQueueEntry> = inner
            .notification_queue
            .iter()
            .filter(|n| n.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|n| n.next_attempt_at);
        Ok(due)
    }

    async fn delete_notification(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        inner.notification_queue.retain(|n| n.id != id);
        Ok(())
    }

    async fn reschedule_notification(
        &self,
        id: i64,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        if let Some(entry) = inner.notification_queue.iter_mut().find(|n| n.id == id) {
            entry.retry_count = retry_count;
            entry.next_attempt_at = next_attempt_at;
            entry.last_error = Some(last_error.to_string());
        }
        Ok(())
    }

    async fn move_notification_to_failure(&self, entry: &NotificationQueueEntry) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        inner.notification_queue.retain(|n| n.id != entry.id);
        inner.next_failure_id += 1;
        let id = inner.next_failure_id;
        inner.notification_failures.push(NotificationFailure {
            id,
            settlement_id: entry.settlement_id.clone(),
            settlement_version: entry.settlement_version,
            status: entry.status.clone(),
            details: entry.details.clone(),
            attempts: entry.retry_count,
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_notification_failures(&self) -> Result<Vec<NotificationFailure>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner.notification_failures.clone())
    }

    async fn write_dead_letter(
        &self,
        group: &GroupKey,
        ref_id: i64,
        attempts: i32,
        last_error: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("mock store lock poisoned");
        inner.next_dead_letter_id += 1;
        let id = inner.next_dead_letter_id;
        inner.dead_letters.push(DeadLetterEvent {
            id,
            pts: group.pts.clone(),
            processing_entity: group.processing_entity.clone(),
            counterparty_id: group.counterparty_id.clone(),
            value_date: group.value_date,
            ref_id,
            attempts,
            last_error: last_error.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEvent>> {
        let inner = self.inner.lock().expect("mock store lock poisoned");
        Ok(inner.dead_letters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessStatus, Direction, SettlementType};
    use chrono::NaiveDate;

    fn sample(version: i64, counterparty: &str) -> NewSettlement {
        NewSettlement {
            settlement_id: "S1".to_string(),
            settlement_version: version,
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: counterparty.to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            currency: "USD".to_string(),
            amount: Decimal::new(1000, 2),
            business_status: BusinessStatus::Verified,
            direction: Direction::Pay,
            settlement_type: SettlementType::Gross,
        }
    }

    #[tokio::test]
    async fn ingest_is_idempotent_on_natural_key() {
        let store = MockSettlementStore::new();
        let first = store.ingest_settlement(&sample(1, "CP-A")).await.unwrap();
        let second = store.ingest_settlement(&sample(1, "CP-A")).await.unwrap();
        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.ref_id, second.ref_id);
    }

    #[tokio::test]
    async fn ingest_marks_previous_version_old_and_detects_regroup() {
        let store = MockSettlementStore::new();
        store.ingest_settlement(&sample(1, "CP-A")).await.unwrap();
        let outcome = store.ingest_settlement(&sample(2, "CP-B")).await.unwrap();
        assert_eq!(outcome.previous_counterparty.as_deref(), Some("CP-A"));

        let latest = store
            .find_latest_version("S1", "PTS-A", "PE-1")
            .await
            .unwrap()
            .expect("latest exists");
        assert_eq!(latest.counterparty_id, "CP-B");
        assert!(!latest.is_old);
    }
}
