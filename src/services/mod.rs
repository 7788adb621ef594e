//! Domain services: C2 (FX), C4 (rule/limit registry), C5 (ingestion), C6
//! (running-total), C7 (status resolution), C8 (approval workflow), C9
//! (notification dispatch), C10 (query/search).

pub mod fx;
pub mod ingestion;
pub mod notification;
pub mod query;
pub mod registry;
pub mod running_total;
pub mod status_resolver;
pub mod workflow;

pub use fx::FxConverter;
pub use ingestion::{IngestionCoordinator, IngestionResult};
pub use notification::NotificationDispatcher;
pub use query::{QueryService, SettlementView};
pub use registry::RuleRegistry;
pub use running_total::{RunningTotalEngine, SettlementEvent};
pub use status_resolver::StatusResolver;
pub use workflow::ApprovalWorkflow;
