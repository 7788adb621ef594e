use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queued at-least-once delivery for an AUTHORISED transition. Removed from
/// this table on successful delivery or on moving to [`NotificationFailure`]
/// after retry exhaustion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationQueueEntry {
    pub id: i64,
    pub settlement_id: String,
    pub settlement_version: i64,
    pub status: String,
    pub details: String,
    pub retry_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Notifications that exhausted the retry policy: moved here and an alert
/// emitted rather than retried forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFailure {
    pub id: i64,
    pub settlement_id: String,
    pub settlement_version: i64,
    pub status: String,
    pub details: String,
    pub attempts: i32,
    pub failed_at: DateTime<Utc>,
}

/// Running-total events that exhausted the retry policy: persistent
/// failures write here and surface via metrics rather than blocking their
/// group's queue forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    pub id: i64,
    pub pts: String,
    pub processing_entity: String,
    pub counterparty_id: String,
    pub value_date: chrono::NaiveDate,
    pub ref_id: i64,
    pub attempts: i32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}
