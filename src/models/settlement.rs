use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A versioned settlement record as persisted in the `settlement` table.
///
/// `ref_id` is the server-assigned monotonic identity; `settlement_id` +
/// `settlement_version` is the caller-supplied natural key that may span
/// many rows over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub ref_id: i64,
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
    pub is_old: bool,
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            pts: self.pts.clone(),
            processing_entity: self.processing_entity.clone(),
            counterparty_id: self.counterparty_id.clone(),
            value_date: self.value_date,
        }
    }
}

/// Aggregation scope: (pts, processing_entity, counterparty_id, value_date).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub pts: String,
    pub processing_entity: String,
    pub counterparty_id: String,
    pub value_date: NaiveDate,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.pts, self.processing_entity, self.counterparty_id, self.value_date
        )
    }
}

/// Per-group running USD exposure total, watermarked by the highest
/// `ref_id` incorporated into `total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningTotal {
    pub id: i64,
    pub pts: String,
    pub processing_entity: String,
    pub counterparty_id: String,
    pub value_date: NaiveDate,
    pub total: Decimal,
    pub ref_id: i64,
    pub updated_at: DateTime<Utc>,
}

impl RunningTotal {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            pts: self.pts.clone(),
            processing_entity: self.processing_entity.clone(),
            counterparty_id: self.counterparty_id.clone(),
            value_date: self.value_date,
        }
    }
}

macro_rules! case_insensitive_enum {
    ($name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($str => Ok(Self::$variant)),+,
                    other => Err(format!("unrecognized {} value: {}", stringify!($name), other)),
                }
            }
        }
    };
}

case_insensitive_enum!(BusinessStatus {
    Pending => "PENDING",
    Invalid => "INVALID",
    Verified => "VERIFIED",
    Cancelled => "CANCELLED",
});

case_insensitive_enum!(Direction {
    Pay => "PAY",
    Receive => "RECEIVE",
});

case_insensitive_enum!(SettlementType {
    Gross => "GROSS",
    Net => "NET",
});

/// Effective status as computed on demand by the status resolver (C7),
/// overlaid with workflow state (C8) where one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveStatus {
    Cancelled,
    Invalid,
    Superseded,
    PendingCalc,
    AuthorizedAuto,
    Blocked,
    PendingAuthorise,
    Authorised,
    Rejected,
}

/// Approval workflow state, persisted per (settlement_id, settlement_version).
case_insensitive_enum!(WorkflowState {
    Auto => "AUTO",
    Blocked => "BLOCKED",
    PendingAuthorise => "PENDING_AUTHORISE",
    Authorised => "AUTHORISED",
    Rejected => "REJECTED",
});

impl Default for WorkflowState {
    fn default() -> Self {
        WorkflowState::Auto
    }
}
