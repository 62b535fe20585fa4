//! Shared vocabulary for the Continuous Verification Gate.
//!
//! Everything the gate engine and the surrounding platform exchange lives
//! here: identifiers, risk/tolerance/strategy enums, analysis summaries,
//! engine configuration, and the error catalog.

pub mod analysis;
pub mod config;
pub mod errors;
pub mod ids;
pub mod topology;

pub use analysis::{
    AnalysisSummary, AnalysisTolerance, ComparisonStrategy, GateStatus, LicenseTier, ProviderClass,
    RiskLevel, Verdict,
};
pub use config::EngineConfig;
pub use errors::{
    ConfigError, ContextBuildError, ContextBuildErrorKind, DispatchError, PollError, SinkError,
};
pub use ids::{
    AccountId, AppId, CorrelationId, EnvId, ServiceId, StateExecutionId, TaskId, WaitId,
    WorkflowExecutionId, WorkflowId,
};
pub use topology::{DEFAULT_GROUP_NAME, NodeMap, restore_node_name, sanitize_node_map, sanitize_node_name, strip_overlap};
