//! Identifier newtypes used across CVG components.
//!
//! All of these wrap plain strings handed to us by the surrounding
//! platform; the newtypes exist so a workflow id cannot silently stand in
//! for a workflow-execution id at a call site.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Account owning the application under verification.
    AccountId
);
string_id!(
    /// Application the verified service belongs to.
    AppId
);
string_id!(
    /// Workflow definition id (stable across executions).
    WorkflowId
);
string_id!(
    /// One execution of a workflow.
    WorkflowExecutionId
);
string_id!(
    /// One execution of a verification state inside a workflow execution.
    /// Stable across engine-level retries of the same state.
    StateExecutionId
);
string_id!(
    /// Service whose canary nodes are being verified.
    ServiceId
);
string_id!(
    /// Deployment environment (used for baseline pinning).
    EnvId
);
string_id!(
    /// Handle the task transport returns for one submitted collection task.
    TaskId
);

/// Token matching an asynchronous remote completion back to the invocation
/// that issued it. Generated once per invocation and stable across the
/// retries and polls of that invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate a fresh correlation id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one collection batch awaited by the join barrier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WaitId(pub String);

impl WaitId {
    /// Generate a fresh wait id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WaitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_inner() {
        let id = StateExecutionId::new("se-123");
        assert_eq!(id.to_string(), "se-123");
        assert_eq!(id.as_str(), "se-123");
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn wait_ids_are_unique() {
        assert_ne!(WaitId::generate(), WaitId::generate());
    }

    #[test]
    fn ids_round_trip_serde() {
        let id = WorkflowExecutionId::new("wfe-9");
        let json = serde_json::to_string(&id).unwrap();
        let back: WorkflowExecutionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
