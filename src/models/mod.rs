//! Data model and DTO definitions shared across the ingestion, aggregation,
//! status-derivation and workflow components.

pub mod activity;
pub mod notification;
pub mod rule;
pub mod settlement;

pub use activity::{Activity, ActionType};
pub use notification::{DeadLetterEvent, NotificationFailure, NotificationQueueEntry};
pub use rule::{CalculationRule, ExposureLimit};
pub use settlement::{
    BusinessStatus, Direction, EffectiveStatus, GroupKey, RunningTotal, Settlement,
    SettlementType, WorkflowState,
};
