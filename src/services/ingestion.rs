//! C5 — Ingestion Coordinator. Orchestrates validate → persist-with-version
//! → age-out → regroup-detect → commit → emit.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ApiError, Result};
use crate::models::GroupKey;
use crate::services::running_total::{RunningTotalEngine, SettlementEvent};
use crate::store::{NewSettlement, SettlementStore};
use crate::validation::{self, SettlementRequest, ValidatedSettlement};

/// Outcome returned to the HTTP layer for `POST /api/settlements`.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub ref_id: i64,
    /// `true` when this call performed a fresh insert; `false` when it
    /// returned an already-persisted `ref_id` for a duplicate natural key —
    /// ingestion is idempotent and silently returns the existing ref_id with
    /// a success response rather than erroring.
    pub inserted: bool,
}

#[derive(Clone)]
pub struct IngestionCoordinator {
    store: Arc<dyn SettlementStore>,
    running_total: Arc<RunningTotalEngine>,
}

impl IngestionCoordinator {
    pub fn new(store: Arc<dyn SettlementStore>, running_total: Arc<RunningTotalEngine>) -> Self {
        Self {
            store,
            running_total,
        }
    }

    /// Validation and persistence run synchronously; event processing for
    /// the running-total engine is asynchronous (the method returns once
    /// the settlement is durably committed, not once its group totals are
    /// recomputed).
    pub async fn process_settlement(&self, request: &SettlementRequest) -> Result<IngestionResult> {
        // Step 1: validate (C1). Aborts pre-DB with every violation listed.
        let validated: ValidatedSettlement =
            validation::validate(request).map_err(ApiError::Validation)?;

        // Steps 2-5: persist, age-out, regroup-detect, commit — performed
        // atomically by the store; see `SettlementStore::ingest_settlement`.
        let new_settlement = NewSettlement::from(&validated);
        let outcome = self.store.ingest_settlement(&new_settlement).await?;

        if !outcome.inserted {
            info!(
                settlement_id = %validated.settlement_id,
                version = validated.settlement_version,
                ref_id = outcome.ref_id,
                "duplicate ingestion; returning existing ref_id"
            );
            return Ok(IngestionResult {
                ref_id: outcome.ref_id,
                inserted: false,
            });
        }

        let new_group = GroupKey {
            pts: validated.pts.clone(),
            processing_entity: validated.processing_entity.clone(),
            counterparty_id: validated.counterparty_id.clone(),
            value_date: validated.value_date,
        };

        // Step 6: emit events. A regroup (previous counterparty differs
        // from current) emits TWO events, one per affected group.
        match &outcome.previous_counterparty {
            Some(previous) if previous != &validated.counterparty_id => {
                let old_group = GroupKey {
                    counterparty_id: previous.clone(),
                    ..new_group.clone()
                };
                info!(
                    settlement_id = %validated.settlement_id,
                    old_group = %old_group,
                    new_group = %new_group,
                    "regroup detected; emitting events for both groups"
                );
                self.emit(old_group, outcome.ref_id).await;
                self.emit(new_group, outcome.ref_id).await;
            }
            _ => {
                self.emit(new_group, outcome.ref_id).await;
            }
        }

        Ok(IngestionResult {
            ref_id: outcome.ref_id,
            inserted: true,
        })
    }

    /// Hands an event off to the running-total engine. Post-commit dispatch
    /// failures are logged and retried by the engine's own keyed consumer
    /// rather than rolling back the settlement write: the total is
    /// eventually consistent, not synchronous with ingestion.
    async fn emit(&self, group: GroupKey, ref_id: i64) {
        let event = SettlementEvent { group, ref_id };
        if let Err(e) = self.running_total.emit(event) {
            warn!("failed to dispatch running-total event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::running_total::RunningTotalEngine;
    use crate::services::{fx::FxConverter, registry::RuleRegistry};
    use crate::store::MockSettlementStore;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn request(settlement_id: &str, version: i64, counterparty: &str, amount: i64) -> SettlementRequest {
        SettlementRequest {
            settlement_id: settlement_id.to_string(),
            settlement_version: version,
            pts: "PTS-A".to_string(),
            processing_entity: "PE-001".to_string(),
            counterparty_id: counterparty.to_string(),
            value_date: "2025-12-31".to_string(),
            currency: "USD".to_string(),
            amount: json!(amount),
            business_status: "VERIFIED".to_string(),
            direction: "PAY".to_string(),
            settlement_type: "GROSS".to_string(),
        }
    }

    async fn coordinator() -> (IngestionCoordinator, Arc<MockSettlementStore>) {
        let store: Arc<MockSettlementStore> = Arc::new(MockSettlementStore::new());
        let fx = Arc::new(FxConverter::new(None));
        let registry = Arc::new(RuleRegistry::new(Decimal::new(500_000_000_00, 2), None));
        let engine = Arc::new(RunningTotalEngine::new(
            store.clone() as Arc<dyn SettlementStore>,
            fx,
            registry,
        ));
        let coordinator =
            IngestionCoordinator::new(store.clone() as Arc<dyn SettlementStore>, engine);
        (coordinator, store)
    }

    #[tokio::test]
    async fn fresh_ingestion_assigns_sequential_ref_id() {
        let (coordinator, _store) = coordinator().await;
        let result = coordinator
            .process_settlement(&request("S1", 1, "CP-ABC", 100))
            .await
            .unwrap();
        assert_eq!(result.ref_id, 1);
        assert!(result.inserted);
    }

    #[tokio::test]
    async fn duplicate_ingestion_is_idempotent() {
        let (coordinator, _store) = coordinator().await;
        let first = coordinator
            .process_settlement(&request("S1", 1, "CP-ABC", 100))
            .await
            .unwrap();
        let second = coordinator
            .process_settlement(&request("S1", 1, "CP-ABC", 100))
            .await
            .unwrap();
        assert_eq!(first.ref_id, second.ref_id);
        assert!(!second.inserted);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_persistence() {
        let (coordinator, store) = coordinator().await;
        let mut bad = request("S1", 1, "CP-ABC", 100);
        bad.currency = "US".to_string();
        let err = coordinator.process_settlement(&bad).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(store
            .find_by_id("S1")
            .await
            .unwrap()
            .is_none());
    }
}
