//! C6 — Running-Total Engine. Consumes per-group settlement events and
//! recomputes the group's running USD exposure total from scratch against
//! the watermark: recompute-not-delta is required because a regroup or
//! retroactive inclusion can change prior contributions.
//!
//! Per-group FIFO ordering is enforced by routing every event for a group
//! key to the same dedicated single-writer consumer task, lazily spawned on
//! first event and held in a `DashMap` the same way keyed in-memory caches
//! are kept elsewhere in this codebase.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::models::{Direction, GroupKey};
use crate::services::fx::FxConverter;
use crate::services::registry::RuleRegistry;
use crate::store::SettlementStore;

const MAX_ATTEMPTS: u32 = 5;
const BASE_INTERVAL: Duration = Duration::from_secs(1);
const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// One unit of work for the engine: "recompute group `group` at least
/// through `ref_id`".
#[derive(Debug, Clone)]
pub struct SettlementEvent {
    pub group: GroupKey,
    pub ref_id: i64,
}

pub struct RunningTotalEngine {
    store: Arc<dyn SettlementStore>,
    fx: Arc<FxConverter>,
    registry: Arc<RuleRegistry>,
    senders: DashMap<GroupKey, mpsc::UnboundedSender<SettlementEvent>>,
}

impl RunningTotalEngine {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        fx: Arc<FxConverter>,
        registry: Arc<RuleRegistry>,
    ) -> Self {
        Self {
            store,
            fx,
            registry,
            senders: DashMap::new(),
        }
    }

    /// Routes `event` to its group's dedicated consumer, spawning one if
    /// this is the first event seen for that group key. Returns an error
    /// only if the consumer task has already exited (e.g. during shutdown).
    pub fn emit(self: &Arc<Self>, event: SettlementEvent) -> anyhow::Result<()> {
        let group = event.group.clone();

        if let Some(sender) = self.senders.get(&group) {
            return sender
                .send(event)
                .map_err(|_| anyhow!("running-total consumer for group {group} has exited"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Two tasks could race to insert a sender for the same new group;
        // `entry` makes the insert atomic and only one consumer task is
        // ever spawned per group key.
        let mut spawned = false;
        self.senders.entry(group.clone()).or_insert_with(|| {
            spawned = true;
            tx.clone()
        });

        if spawned {
            let engine = Arc::clone(self);
            tokio::spawn(engine.run_group_consumer(group.clone(), rx));
        }

        self.senders
            .get(&group)
            .expect("just inserted")
            .send(event)
            .map_err(|_| anyhow!("running-total consumer for group {group} has exited"))
    }

    /// Per-group consumer loop: strictly FIFO within a group, concurrent
    /// across groups.
    async fn run_group_consumer(
        self: Arc<Self>,
        group: GroupKey,
        mut rx: mpsc::UnboundedReceiver<SettlementEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            self.process_with_retry(event).await;
        }
        info!(%group, "running-total consumer exiting (channel closed)");
    }

    /// Processes one event with a bounded exponential-backoff retry policy
    /// (base 1s, factor 2, cap 60s, max 5 attempts). On exhaustion, writes a
    /// dead-letter row and increments a metric rather than blocking the
    /// group's queue forever.
    async fn process_with_retry(&self, event: SettlementEvent) {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(BASE_INTERVAL)
            .with_multiplier(2.0)
            .with_max_interval(MAX_INTERVAL)
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.process_event(&event).await {
                Ok(()) => return,
                Err(e) if attempts >= MAX_ATTEMPTS => {
                    error!(
                        group = %event.group,
                        ref_id = event.ref_id,
                        attempts,
                        error = %e,
                        "running-total event exhausted retries; writing dead letter"
                    );
                    metrics::counter!("running_total_dead_letter_total").increment(1);
                    if let Err(write_err) = self
                        .store
                        .write_dead_letter(&event.group, event.ref_id, attempts as i32, &e.to_string())
                        .await
                    {
                        error!("failed to write dead letter: {write_err}");
                    }
                    return;
                }
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(MAX_INTERVAL);
                    warn!(
                        group = %event.group,
                        ref_id = event.ref_id,
                        attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "running-total event failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// The six-step group recompute: fetch watermark, discard if stale,
    /// load every settlement at or before `ref_id`, fold in rule-eligible
    /// contributions converted to USD, then persist the new total.
    async fn process_event(&self, event: &SettlementEvent) -> anyhow::Result<()> {
        let current = self.store.get_running_total(&event.group).await?;
        let watermark = current.as_ref().map(|rt| rt.ref_id).unwrap_or(0);

        if event.ref_id <= watermark {
            return Ok(()); // already incorporated
        }

        let rows = self
            .store
            .find_by_group_filtered(&event.group, event.ref_id)
            .await?;

        let mut total = Decimal::ZERO;
        for row in &rows {
            let rule = self
                .registry
                .get_rule(&row.pts, &row.processing_entity)
                .await;
            if !rule.is_included(row.business_status, row.direction, row.settlement_type) {
                continue;
            }

            let usd = self.fx.to_usd(row.amount, &row.currency).await?;
            total += match row.direction {
                Direction::Pay => -usd,
                Direction::Receive => usd,
            };
        }

        self.store
            .upsert_running_total(&event.group, total, event.ref_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessStatus, SettlementType};
    use crate::store::{MockSettlementStore, NewSettlement};
    use chrono::NaiveDate;

    fn engine(store: Arc<MockSettlementStore>) -> Arc<RunningTotalEngine> {
        Arc::new(RunningTotalEngine::new(
            store as Arc<dyn SettlementStore>,
            Arc::new(FxConverter::new(None)),
            Arc::new(RuleRegistry::new(Decimal::new(500_000_000_00, 2), None)),
        ))
    }

    fn settlement(counterparty: &str, amount: i64, direction: Direction) -> NewSettlement {
        NewSettlement {
            settlement_id: "S1".to_string(),
            settlement_version: 1,
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: counterparty.to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            currency: "USD".to_string(),
            amount: Decimal::new(amount * 100, 2),
            business_status: BusinessStatus::Verified,
            direction,
            settlement_type: SettlementType::Gross,
        }
    }

    #[tokio::test]
    async fn pay_contributes_negatively_to_group_total() {
        let store = Arc::new(MockSettlementStore::new());
        let outcome = store
            .ingest_settlement(&settlement("CP-ABC", 100, Direction::Pay))
            .await
            .unwrap();
        let engine = engine(store.clone());

        engine
            .process_event(&SettlementEvent {
                group: GroupKey {
                    pts: "PTS-A".to_string(),
                    processing_entity: "PE-1".to_string(),
                    counterparty_id: "CP-ABC".to_string(),
                    value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
                },
                ref_id: outcome.ref_id,
            })
            .await
            .unwrap();

        let total = store
            .get_running_total(&GroupKey {
                pts: "PTS-A".to_string(),
                processing_entity: "PE-1".to_string(),
                counterparty_id: "CP-ABC".to_string(),
                value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total.total, Decimal::new(-10000, 2));
    }

    #[tokio::test]
    async fn stale_event_below_watermark_is_discarded() {
        let store = Arc::new(MockSettlementStore::new());
        let outcome = store
            .ingest_settlement(&settlement("CP-ABC", 100, Direction::Pay))
            .await
            .unwrap();
        let group = GroupKey {
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: "CP-ABC".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        };
        store
            .upsert_running_total(&group, Decimal::new(-99999, 2), outcome.ref_id + 10)
            .await
            .unwrap();

        let engine = engine(store.clone());
        engine
            .process_event(&SettlementEvent {
                group: group.clone(),
                ref_id: outcome.ref_id,
            })
            .await
            .unwrap();

        let total = store.get_running_total(&group).await.unwrap().unwrap();
        assert_eq!(total.total, Decimal::new(-99999, 2)); // untouched
    }
}
