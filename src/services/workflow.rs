//! C8 — Approval Workflow. Two-person release/authorize state machine with
//! append-only audit, persisted per `(settlement_id, settlement_version)`.

use std::sync::Arc;

use tracing::info;

use crate::error::{ApiError, Result};
use crate::models::{ActionType, EffectiveStatus, WorkflowState};
use crate::services::notification::NotificationDispatcher;
use crate::services::status_resolver::StatusResolver;
use crate::store::SettlementStore;

#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: Arc<dyn SettlementStore>,
    resolver: Arc<StatusResolver>,
    notifications: Arc<NotificationDispatcher>,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        resolver: Arc<StatusResolver>,
        notifications: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            resolver,
            notifications,
        }
    }

    /// BLOCKED -> PENDING_AUTHORISE. Requires the settlement's currently
    /// resolved effective status to be BLOCKED; repeating the call once
    /// already in PENDING_AUTHORISE (the target state) fails with
    /// [`ApiError::InvalidTransition`] rather than recording a duplicate
    /// Activity.
    pub async fn request_release(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        user_id: &str,
        user_name: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        let (settlement, status) = self
            .resolver
            .resolve_by_id(settlement_id, settlement_version)
            .await?;

        if status == EffectiveStatus::PendingAuthorise {
            return Err(ApiError::InvalidTransition(
                "settlement is already pending authorisation".to_string(),
            ));
        }
        if status != EffectiveStatus::Blocked {
            return Err(ApiError::InvalidTransition(format!(
                "release can only be requested from BLOCKED, current status is {status:?}"
            )));
        }

        self.store
            .transition_workflow(
                settlement_id,
                settlement_version,
                &settlement.pts,
                &settlement.processing_entity,
                WorkflowState::PendingAuthorise,
                ActionType::RequestRelease,
                user_id,
                user_name,
                comment,
            )
            .await?;

        info!(
            settlement_id,
            settlement_version, user_id, "release requested; awaiting authorisation"
        );
        Ok(())
    }

    /// PENDING_AUTHORISE -> AUTHORISED. `user_id` must differ from the
    /// `user_id` on the latest REQUEST_RELEASE activity for this natural
    /// key (segregation of duties, P5); enqueues a notification on success.
    pub async fn authorize(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        user_id: &str,
        user_name: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        let settlement = self
            .settle_in_pending_authorise(settlement_id, settlement_version, EffectiveStatus::Authorised)
            .await?;

        self.check_segregation(settlement_id, settlement_version, user_id)
            .await?;

        self.store
            .transition_workflow(
                settlement_id,
                settlement_version,
                &settlement.pts,
                &settlement.processing_entity,
                WorkflowState::Authorised,
                ActionType::Authorise,
                user_id,
                user_name,
                comment,
            )
            .await?;

        self.notifications
            .enqueue_authorised(settlement_id, settlement_version)
            .await?;

        info!(settlement_id, settlement_version, user_id, "settlement authorised");
        Ok(())
    }

    /// PENDING_AUTHORISE -> REJECTED. Same segregation-of-duties check as
    /// `authorize`.
    pub async fn reject(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        user_id: &str,
        user_name: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        let settlement = self
            .settle_in_pending_authorise(settlement_id, settlement_version, EffectiveStatus::Rejected)
            .await?;

        self.check_segregation(settlement_id, settlement_version, user_id)
            .await?;

        self.store
            .transition_workflow(
                settlement_id,
                settlement_version,
                &settlement.pts,
                &settlement.processing_entity,
                WorkflowState::Rejected,
                ActionType::Reject,
                user_id,
                user_name,
                comment,
            )
            .await?;

        info!(settlement_id, settlement_version, user_id, "settlement rejected");
        Ok(())
    }

    /// Shared precondition for `authorize`/`reject`: the settlement must
    /// currently resolve to PENDING_AUTHORISE. Repeating the call once
    /// already in `target` fails with [`ApiError::InvalidTransition`]
    /// (idempotency on the target state).
    async fn settle_in_pending_authorise(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        target: EffectiveStatus,
    ) -> Result<crate::models::Settlement> {
        let (settlement, status) = self
            .resolver
            .resolve_by_id(settlement_id, settlement_version)
            .await?;

        if status == target {
            return Err(ApiError::InvalidTransition(format!(
                "settlement is already {target:?}"
            )));
        }
        if status != EffectiveStatus::PendingAuthorise {
            return Err(ApiError::InvalidTransition(format!(
                "transition requires PENDING_AUTHORISE, current status is {status:?}"
            )));
        }
        Ok(settlement)
    }

    async fn check_segregation(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        user_id: &str,
    ) -> Result<()> {
        let requester = self
            .store
            .latest_activity_user(settlement_id, settlement_version, ActionType::RequestRelease)
            .await?;

        if requester.as_deref() == Some(user_id) {
            return Err(ApiError::Segregation(
                "authorizer must differ from requester".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessStatus, Direction, GroupKey, SettlementType};
    use crate::services::fx::FxConverter;
    use crate::services::notification::NotificationDispatcher;
    use crate::services::registry::RuleRegistry;
    use crate::store::{MockSettlementStore, NewSettlement};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    async fn blocked_workflow() -> (ApprovalWorkflow, Arc<MockSettlementStore>, GroupKey) {
        let store = Arc::new(MockSettlementStore::new());
        store.seed_exposure_limit("CP-A", Decimal::new(150_00, 2));

        let settlement = NewSettlement {
            settlement_id: "S1".to_string(),
            settlement_version: 1,
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: "CP-A".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            currency: "USD".to_string(),
            amount: Decimal::new(20000, 2),
            business_status: BusinessStatus::Verified,
            direction: Direction::Pay,
            settlement_type: SettlementType::Gross,
        };
        let outcome = store.ingest_settlement(&settlement).await.unwrap();

        let group = GroupKey {
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: "CP-A".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        };
        store
            .upsert_running_total(&group, Decimal::new(-20000, 2), outcome.ref_id)
            .await
            .unwrap();

        let resolver = Arc::new(StatusResolver::new(
            store.clone() as Arc<dyn SettlementStore>,
            Arc::new(RuleRegistry::new(Decimal::new(500_000_000_00, 2), None)),
            Arc::new(FxConverter::new(None)),
        ));
        let notifications = Arc::new(NotificationDispatcher::new(
            store.clone() as Arc<dyn SettlementStore>,
            None,
            10,
        ));
        let workflow = ApprovalWorkflow::new(
            store.clone() as Arc<dyn SettlementStore>,
            resolver,
            notifications,
        );
        (workflow, store, group)
    }

    #[tokio::test]
    async fn full_release_then_authorise_cycle() {
        let (workflow, store, _group) = blocked_workflow().await;

        workflow
            .request_release("S1", 1, "alice", "Alice", None)
            .await
            .unwrap();

        let err = workflow
            .authorize("S1", 1, "alice", "Alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Segregation(_)));

        workflow
            .authorize("S1", 1, "bob", "Bob", None)
            .await
            .unwrap();

        let due = store.due_notifications(chrono::Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].settlement_id, "S1");
    }

    #[tokio::test]
    async fn repeating_request_release_fails_idempotently() {
        let (workflow, _store, _group) = blocked_workflow().await;
        workflow
            .request_release("S1", 1, "alice", "Alice", None)
            .await
            .unwrap();

        let err = workflow
            .request_release("S1", 1, "alice", "Alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn reject_requires_pending_authorise() {
        let (workflow, _store, _group) = blocked_workflow().await;
        let err = workflow
            .reject("S1", 1, "bob", "Bob", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition(_)));
    }
}
