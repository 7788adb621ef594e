//! C7 — Status Resolver. Computes a settlement's effective status on demand;
//! never mutates state.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{BusinessStatus, Direction, EffectiveStatus, Settlement, WorkflowState};
use crate::services::fx::FxConverter;
use crate::services::registry::RuleRegistry;
use crate::store::SettlementStore;

#[derive(Clone)]
pub struct StatusResolver {
    store: Arc<dyn SettlementStore>,
    registry: Arc<RuleRegistry>,
    fx: Arc<FxConverter>,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn SettlementStore>, registry: Arc<RuleRegistry>, fx: Arc<FxConverter>) -> Self {
        Self { store, registry, fx }
    }

    /// Resolves by `(settlement_id, settlement_version)` rather than an
    /// already-loaded row (spec.md §4.7 "Inputs: settlement row (or
    /// (settlement_id, version))").
    pub async fn resolve_by_id(
        &self,
        settlement_id: &str,
        settlement_version: i64,
    ) -> Result<(Settlement, EffectiveStatus)> {
        let settlement = self
            .store
            .find_by_settlement_version(settlement_id, settlement_version)
            .await?
            .ok_or_else(|| {
                crate::error::ApiError::NotFound(format!(
                    "no settlement {settlement_id} version {settlement_version}"
                ))
            })?;
        let status = self.resolve(&settlement).await?;
        Ok((settlement, status))
    }

    /// The five-step status algorithm, with the workflow overlay of step 5
    /// applied last.
    pub async fn resolve(&self, settlement: &Settlement) -> Result<EffectiveStatus> {
        if settlement.business_status == BusinessStatus::Cancelled {
            return Ok(EffectiveStatus::Cancelled);
        }
        if settlement.business_status == BusinessStatus::Invalid {
            return Ok(EffectiveStatus::Invalid);
        }
        if settlement.is_old {
            return Ok(EffectiveStatus::Superseded);
        }

        let base_status = self.resolve_limit_status(settlement).await?;

        // Step 5: workflow overlay.
        let workflow = self
            .store
            .get_workflow_state(&settlement.settlement_id, settlement.settlement_version)
            .await?;

        Ok(match workflow {
            Some(WorkflowState::PendingAuthorise) => EffectiveStatus::PendingAuthorise,
            Some(WorkflowState::Authorised) => EffectiveStatus::Authorised,
            Some(WorkflowState::Rejected) => EffectiveStatus::Rejected,
            Some(WorkflowState::Blocked) => EffectiveStatus::Blocked,
            Some(WorkflowState::Auto) | None => base_status,
        })
    }

    /// Step 4: running-total/limit evaluation, ignoring workflow overlay.
    ///
    /// The projected exposure used for this check is group total excluding
    /// this settlement plus its own signed contribution. Because C6
    /// recomputes each group from scratch on every event, `running_total.total`
    /// already includes this settlement's own contribution once its
    /// watermark reaches this settlement's `ref_id` — but only if this
    /// settlement is itself rule-admitted; a non-admitted settlement (e.g. a
    /// RECEIVE row under the default PAY-only rule) is never folded into the
    /// stored total, so its own contribution must be added here rather than
    /// assumed already present.
    async fn resolve_limit_status(&self, settlement: &Settlement) -> Result<EffectiveStatus> {
        let group = settlement.group_key();
        let running_total = self.store.get_running_total(&group).await?;

        let Some(running_total) = running_total else {
            return Ok(EffectiveStatus::PendingCalc);
        };
        if running_total.ref_id < settlement.ref_id {
            return Ok(EffectiveStatus::PendingCalc);
        }

        let rule = self
            .registry
            .get_rule(&settlement.pts, &settlement.processing_entity)
            .await;
        let is_included = rule.is_included(
            settlement.business_status,
            settlement.direction,
            settlement.settlement_type,
        );

        let usd = self.fx.to_usd(settlement.amount, &settlement.currency).await?;
        let contribution = match settlement.direction {
            Direction::Pay => -usd,
            Direction::Receive => usd,
        };

        // Already folded into the stored total iff rule-admitted; exclude
        // then re-add its own contribution either way.
        let excluding_this = if is_included {
            running_total.total - contribution
        } else {
            running_total.total
        };
        let projected = excluding_this + contribution;

        let limit = self.registry.get_limit(&settlement.counterparty_id).await;
        if projected.abs() > limit {
            Ok(EffectiveStatus::Blocked)
        } else {
            Ok(EffectiveStatus::AuthorizedAuto)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SettlementType;
    use crate::store::MockSettlementStore;
    use chrono::{NaiveDate, Utc};

    fn settlement(ref_id: i64, amount: i64, is_old: bool, status: BusinessStatus) -> Settlement {
        Settlement {
            ref_id,
            settlement_id: "S1".to_string(),
            settlement_version: 1,
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: "CP-A".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            currency: "USD".to_string(),
            amount: Decimal::new(amount * 100, 2),
            business_status: status,
            direction: Direction::Pay,
            settlement_type: SettlementType::Gross,
            is_old,
            created_at: Utc::now(),
        }
    }

    fn resolver(store: Arc<MockSettlementStore>) -> StatusResolver {
        StatusResolver::new(
            store as Arc<dyn SettlementStore>,
            Arc::new(RuleRegistry::new(Decimal::new(500_000_000_00, 2), None)),
            Arc::new(FxConverter::new(None)),
        )
    }

    #[tokio::test]
    async fn cancelled_always_wins() {
        let store = Arc::new(MockSettlementStore::new());
        let resolver = resolver(store);
        let s = settlement(1, 100, false, BusinessStatus::Cancelled);
        assert_eq!(resolver.resolve(&s).await.unwrap(), EffectiveStatus::Cancelled);
    }

    #[tokio::test]
    async fn superseded_when_old() {
        let store = Arc::new(MockSettlementStore::new());
        let resolver = resolver(store);
        let s = settlement(1, 100, true, BusinessStatus::Verified);
        assert_eq!(resolver.resolve(&s).await.unwrap(), EffectiveStatus::Superseded);
    }

    #[tokio::test]
    async fn pending_calc_before_watermark_advances() {
        let store = Arc::new(MockSettlementStore::new());
        let resolver = resolver(store);
        let s = settlement(1, 100, false, BusinessStatus::Verified);
        assert_eq!(resolver.resolve(&s).await.unwrap(), EffectiveStatus::PendingCalc);
    }

    #[tokio::test]
    async fn blocked_when_running_total_exceeds_limit() {
        let store = Arc::new(MockSettlementStore::new());
        store.seed_exposure_limit("CP-A", Decimal::new(150_00, 2));
        let group = crate::models::GroupKey {
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: "CP-A".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        };
        store
            .upsert_running_total(&group, Decimal::new(-20000, 2), 1)
            .await
            .unwrap();
        let resolver = resolver(store);
        let s = settlement(1, 100, false, BusinessStatus::Verified);
        assert_eq!(resolver.resolve(&s).await.unwrap(), EffectiveStatus::Blocked);
    }
}
