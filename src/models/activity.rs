use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Append-only audit trail entry for approval-workflow transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub pts: String,
    pub processing_entity: String,
    pub settlement_id: String,
    pub settlement_version: i64,
    pub user_id: String,
    pub user_name: String,
    pub action_type: ActionType,
    pub comment: Option<String>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    RequestRelease,
    Authorise,
    Reject,
    Recalculate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::RequestRelease => "REQUEST_RELEASE",
            ActionType::Authorise => "AUTHORISE",
            ActionType::Reject => "REJECT",
            ActionType::Recalculate => "RECALCULATE",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUEST_RELEASE" => Ok(ActionType::RequestRelease),
            "AUTHORISE" => Ok(ActionType::Authorise),
            "REJECT" => Ok(ActionType::Reject),
            "RECALCULATE" => Ok(ActionType::Recalculate),
            other => Err(format!("unrecognized action_type: {other}")),
        }
    }
}
