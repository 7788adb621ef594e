//! C1 — Validator. Pure function over the inbound request: collects every
//! violation rather than short-circuiting on the first.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::{BusinessStatus, Direction, SettlementType};

/// Wire-level settlement request (`SettlementRequest` JSON body).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub settlement_id: String,
    pub settlement_version: i64,
    pub pts: String,
    pub processing_entity: String,
    pub counterparty_id: String,
    pub value_date: String,
    pub currency: String,
    pub amount: serde_json::Value,
    pub business_status: String,
    pub direction: String,
    pub settlement_type: String,
}

/// A request that has passed every rule in this module, with fields parsed
/// into their domain types.
#[derive(Debug, Clone)]
pub struct ValidatedSettlement {
    pub settlement_id: String,
    pub settlement_version: i64,
    pub pts: String,
    pub processing_entity: String,
    pub counterparty_id: String,
    pub value_date: NaiveDate,
    pub currency: String,
    pub amount: Decimal,
    pub business_status: BusinessStatus,
    pub direction: Direction,
    pub settlement_type: SettlementType,
}

const MAX_AMOUNT: &str = "1000000000000"; // 10^12

/// Validates `req`, returning every violation found rather than stopping at
/// the first.
pub fn validate(req: &SettlementRequest) -> Result<ValidatedSettlement, Vec<String>> {
    let mut violations = Vec::new();

    if req.settlement_id.trim().is_empty() {
        violations.push("settlementId is required".to_string());
    }
    if req.pts.trim().is_empty() {
        violations.push("pts is required".to_string());
    }
    if req.processing_entity.trim().is_empty() {
        violations.push("processingEntity is required".to_string());
    }
    if req.counterparty_id.trim().is_empty() {
        violations.push("counterpartyId is required".to_string());
    }
    if req.value_date.trim().is_empty() {
        violations.push("valueDate is required".to_string());
    }
    if req.currency.trim().is_empty() {
        violations.push("currency is required".to_string());
    }
    if req.business_status.trim().is_empty() {
        violations.push("businessStatus is required".to_string());
    }
    if req.direction.trim().is_empty() {
        violations.push("direction is required".to_string());
    }
    if req.settlement_type.trim().is_empty() {
        violations.push("settlementType is required".to_string());
    }

    if req.settlement_version < 0 {
        violations.push("settlementVersion must be >= 0".to_string());
    }

    let currency_upper = req.currency.trim().to_ascii_uppercase();
    if currency_upper.len() != 3 || !currency_upper.bytes().all(|b| b.is_ascii_alphabetic()) {
        violations.push("currency must be exactly three ASCII letters".to_string());
    }

    let value_date = match NaiveDate::parse_from_str(req.value_date.trim(), "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            violations.push("valueDate must be a parseable ISO date (YYYY-MM-DD)".to_string());
            None
        }
    };

    let amount = parse_amount(&req.amount);
    let amount = match amount {
        Some(a) => {
            if a <= Decimal::ZERO {
                violations.push("amount must be > 0".to_string());
                None
            } else if a > Decimal::from_str(MAX_AMOUNT).expect("static constant parses") {
                violations.push("amount must be <= 1,000,000,000,000".to_string());
                None
            } else if a.scale() > 2 {
                violations.push("amount must have at most 2 decimal places".to_string());
                None
            } else {
                Some(a)
            }
        }
        None => {
            violations.push("amount must be a number with at most 2 decimal places".to_string());
            None
        }
    };

    let business_status = BusinessStatus::from_str(&req.business_status).ok();
    if business_status.is_none() && !req.business_status.trim().is_empty() {
        violations.push(format!(
            "businessStatus must be one of PENDING, INVALID, VERIFIED, CANCELLED (got {})",
            req.business_status
        ));
    }

    let direction = Direction::from_str(&req.direction).ok();
    if direction.is_none() && !req.direction.trim().is_empty() {
        violations.push(format!(
            "direction must be one of PAY, RECEIVE (got {})",
            req.direction
        ));
    }

    let settlement_type = SettlementType::from_str(&req.settlement_type).ok();
    if settlement_type.is_none() && !req.settlement_type.trim().is_empty() {
        violations.push(format!(
            "settlementType must be one of GROSS, NET (got {})",
            req.settlement_type
        ));
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(ValidatedSettlement {
        settlement_id: req.settlement_id.clone(),
        settlement_version: req.settlement_version,
        pts: req.pts.clone(),
        processing_entity: req.processing_entity.clone(),
        counterparty_id: req.counterparty_id.clone(),
        value_date: value_date.expect("checked above"),
        currency: currency_upper,
        amount: amount.expect("checked above"),
        business_status: business_status.expect("checked above"),
        direction: direction.expect("checked above"),
        settlement_type: settlement_type.expect("checked above"),
    })
}

fn parse_amount(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> SettlementRequest {
        SettlementRequest {
            settlement_id: "S1".to_string(),
            settlement_version: 1,
            pts: "PTS-A".to_string(),
            processing_entity: "PE-001".to_string(),
            counterparty_id: "CP-ABC".to_string(),
            value_date: "2025-12-31".to_string(),
            currency: "USD".to_string(),
            amount: serde_json::json!(100),
            business_status: "verified".to_string(),
            direction: "pay".to_string(),
            settlement_type: "gross".to_string(),
        }
    }

    #[test]
    fn accepts_well_formed_request_with_case_insensitive_enums() {
        let validated = validate(&base_request()).expect("should validate");
        assert_eq!(validated.business_status, BusinessStatus::Verified);
        assert_eq!(validated.direction, Direction::Pay);
        assert_eq!(validated.settlement_type, SettlementType::Gross);
    }

    #[test]
    fn collects_every_violation_instead_of_short_circuiting() {
        let mut req = base_request();
        req.currency = "US".to_string();
        req.amount = serde_json::json!(-5);
        req.direction = "SIDEWAYS".to_string();

        let violations = validate(&req).expect_err("should fail");
        assert!(violations.iter().any(|v| v.contains("currency")));
        assert!(violations.iter().any(|v| v.contains("amount")));
        assert!(violations.iter().any(|v| v.contains("direction")));
    }

    #[test]
    fn rejects_amount_with_too_many_decimal_places() {
        let mut req = base_request();
        req.amount = serde_json::json!("100.123");
        let violations = validate(&req).expect_err("should fail");
        assert!(violations.iter().any(|v| v.contains("decimal")));
    }

    #[test]
    fn permits_past_value_dates() {
        let mut req = base_request();
        req.value_date = "2000-01-01".to_string();
        assert!(validate(&req).is_ok());
    }

    #[test]
    fn rejects_amount_above_ceiling() {
        let mut req = base_request();
        req.amount = serde_json::json!("1000000000000.01");
        let violations = validate(&req).expect_err("should fail");
        assert!(violations.iter().any(|v| v.contains("amount")));
    }
}
