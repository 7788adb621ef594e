use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::settlement::{BusinessStatus, Direction, SettlementType};

/// Per-(pts, processing_entity) filter rule: which settlements count toward
/// running-total exposure. Missing configuration falls back to
/// [`CalculationRule::default_rule`].
#[derive(Debug, Clone)]
pub struct CalculationRule {
    pub pts: String,
    pub processing_entity: String,
    pub included_business_statuses: HashSet<BusinessStatus>,
    pub included_directions: HashSet<Direction>,
    pub included_settlement_types: HashSet<SettlementType>,
}

impl CalculationRule {
    /// The hard-coded default admitted set:
    /// {PENDING, VERIFIED} x {PAY} x {GROSS, NET}.
    pub fn default_rule(pts: &str, processing_entity: &str) -> Self {
        Self {
            pts: pts.to_string(),
            processing_entity: processing_entity.to_string(),
            included_business_statuses: [BusinessStatus::Pending, BusinessStatus::Verified]
                .into_iter()
                .collect(),
            included_directions: [Direction::Pay].into_iter().collect(),
            included_settlement_types: [SettlementType::Gross, SettlementType::Net]
                .into_iter()
                .collect(),
        }
    }

    /// True iff all three of the settlement's classifying fields are
    /// admitted by this rule.
    pub fn is_included(
        &self,
        business_status: BusinessStatus,
        direction: Direction,
        settlement_type: SettlementType,
    ) -> bool {
        self.included_business_statuses.contains(&business_status)
            && self.included_directions.contains(&direction)
            && self.included_settlement_types.contains(&settlement_type)
    }
}

/// Per-counterparty USD exposure ceiling. Absent ⇒ the configured default
/// limit is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureLimit {
    pub counterparty_id: String,
    pub limit_usd: Decimal,
}
