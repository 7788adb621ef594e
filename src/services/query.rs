//! C10 — Query/Search API. Settlement lookup and group enumeration, with
//! every returned settlement carrying its effective status (C7). Never
//! mutates state; export passes results through to an external formatter
//! out of scope here (spec.md §1).

use std::sync::Arc;

use crate::error::Result;
use crate::models::{EffectiveStatus, GroupKey, Settlement};
use crate::services::status_resolver::StatusResolver;
use crate::store::{SearchCriteria, SettlementStore};

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn SettlementStore>,
    resolver: Arc<StatusResolver>,
}

/// A settlement paired with its on-demand effective status.
#[derive(Debug, Clone)]
pub struct SettlementView {
    pub settlement: Settlement,
    pub status: EffectiveStatus,
}

impl QueryService {
    pub fn new(store: Arc<dyn SettlementStore>, resolver: Arc<StatusResolver>) -> Self {
        Self { store, resolver }
    }

    /// `GET /api/settlements/{id}`.
    pub async fn find_by_id(&self, settlement_id: &str) -> Result<Option<SettlementView>> {
        let Some(settlement) = self.store.find_by_id(settlement_id).await? else {
            return Ok(None);
        };
        let status = self.resolver.resolve(&settlement).await?;
        Ok(Some(SettlementView { settlement, status }))
    }

    /// `GET /api/settlements?...` search, paginated by `(limit, offset)`.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SettlementView>> {
        let rows = self.store.search(criteria, limit, offset).await?;
        let mut views = Vec::with_capacity(rows.len());
        for settlement in rows {
            let status = self.resolver.resolve(&settlement).await?;
            views.push(SettlementView { settlement, status });
        }
        Ok(views)
    }

    /// `get_distinct_groups` for group enumeration.
    pub async fn distinct_groups(&self, criteria: &SearchCriteria) -> Result<Vec<GroupKey>> {
        self.store.get_distinct_groups(criteria).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusinessStatus, Direction, SettlementType};
    use crate::services::registry::RuleRegistry;
    use crate::store::{MockSettlementStore, NewSettlement};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn sample() -> NewSettlement {
        NewSettlement {
            settlement_id: "S1".to_string(),
            settlement_version: 1,
            pts: "PTS-A".to_string(),
            processing_entity: "PE-1".to_string(),
            counterparty_id: "CP-A".to_string(),
            value_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            currency: "USD".to_string(),
            amount: Decimal::new(10000, 2),
            business_status: BusinessStatus::Verified,
            direction: Direction::Pay,
            settlement_type: SettlementType::Gross,
        }
    }

    #[tokio::test]
    async fn find_by_id_carries_effective_status() {
        let store = Arc::new(MockSettlementStore::new());
        store.ingest_settlement(&sample()).await.unwrap();

        let resolver = Arc::new(StatusResolver::new(
            store.clone() as Arc<dyn SettlementStore>,
            Arc::new(RuleRegistry::new(Decimal::new(500_000_000_00, 2), None)),
            Arc::new(crate::services::fx::FxConverter::new(None)),
        ));
        let query = QueryService::new(store as Arc<dyn SettlementStore>, resolver);

        let view = query.find_by_id("S1").await.unwrap().expect("found");
        assert_eq!(view.status, EffectiveStatus::PendingCalc);
    }

    #[tokio::test]
    async fn find_by_id_missing_returns_none() {
        let store = Arc::new(MockSettlementStore::new());
        let resolver = Arc::new(StatusResolver::new(
            store.clone() as Arc<dyn SettlementStore>,
            Arc::new(RuleRegistry::new(Decimal::new(500_000_000_00, 2), None)),
            Arc::new(crate::services::fx::FxConverter::new(None)),
        ));
        let query = QueryService::new(store as Arc<dyn SettlementStore>, resolver);
        assert!(query.find_by_id("NOPE").await.unwrap().is_none());
    }
}
