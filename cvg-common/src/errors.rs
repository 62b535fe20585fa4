//! Error catalog for the verification gate.
//!
//! Every failure the engine can hit is a typed value here; the gate
//! controller resolves all of them into terminal verdicts. Nothing in this
//! module is ever allowed to escape the engine as a panic.

use serde::{Deserialize, Serialize};

// ── Configuration ────────────────────────────────────────────────────────

/// Rejected engine or gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("time duration cannot be more than 4 hours (got {minutes}, max {max} minutes)")]
    DurationOutOfRange { minutes: u32, max: u32 },

    #[error("host batch size must be at least 1")]
    ZeroBatchSize,

    #[error("poll retry budget must be at least 1")]
    ZeroRetryBudget,
}

// ── Context Building ─────────────────────────────────────────────────────

/// What kind of input was missing or unresolvable while building the
/// analysis context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBuildErrorKind {
    /// Provider connector setting not found or incomplete.
    MissingProviderConfig,
    /// No infrastructure mapping for the deployed service.
    MissingInfraMapping,
    /// Service id did not resolve.
    UnresolvableService,
    /// Environment id did not resolve.
    UnresolvableEnvironment,
    /// Topology resolver failed outright.
    TopologyFailure,
    /// Baseline lookup against the result store failed.
    BaselineLookupFailure,
}

impl std::fmt::Display for ContextBuildErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingProviderConfig => write!(f, "missing provider configuration"),
            Self::MissingInfraMapping => write!(f, "missing infrastructure mapping"),
            Self::UnresolvableService => write!(f, "unresolvable service"),
            Self::UnresolvableEnvironment => write!(f, "unresolvable environment"),
            Self::TopologyFailure => write!(f, "topology resolution failed"),
            Self::BaselineLookupFailure => write!(f, "baseline lookup failed"),
        }
    }
}

/// Failure while assembling the analysis context. Surfaces as an `Error`
/// verdict naming the specific missing piece, never as a panic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ContextBuildError {
    pub kind: ContextBuildErrorKind,
    pub detail: String,
}

impl ContextBuildError {
    pub fn new(kind: ContextBuildErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────

/// Failure while submitting collection tasks to the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("task transport rejected submission: {0}")]
    TransportRejected(String),

    #[error("transport unreachable: {0}")]
    TransportUnreachable(String),
}

impl DispatchError {
    /// Whether the outer scheduler may retry the whole invocation. The
    /// engine itself never re-dispatches.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportUnreachable(_))
    }
}

// ── Polling ──────────────────────────────────────────────────────────────

/// Failure while reading the analysis summary back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// The retry budget ran out before a summary for the expected minute
    /// appeared. Distinct from `Failed`: the pipeline malfunctioned, the
    /// deployment was not judged unhealthy.
    #[error("analysis result for minute {expected_minute} did not materialize in time ({attempts} attempts)")]
    BudgetExhausted { expected_minute: u32, attempts: u32 },

    #[error("result store read failed: {0}")]
    StoreFailure(String),
}

// ── Verdict Sink ─────────────────────────────────────────────────────────

/// Rejected status write on the verdict sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// A different terminal status is already recorded; the write loses
    /// the compare-and-set.
    #[error("gate already terminal with status {existing}")]
    TerminalConflict { existing: crate::analysis::GateStatus },

    #[error("verdict sink unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::GateStatus;

    #[test]
    fn duration_error_names_the_cap() {
        let err = ConfigError::DurationOutOfRange { minutes: 300, max: 240 };
        let text = err.to_string();
        assert!(text.contains("4 hours"));
        assert!(text.contains("300"));
    }

    #[test]
    fn context_error_prefixes_kind() {
        let err = ContextBuildError::new(
            ContextBuildErrorKind::MissingProviderConfig,
            "connector 'appd-prod' has no account id",
        );
        assert_eq!(
            err.to_string(),
            "missing provider configuration: connector 'appd-prod' has no account id"
        );
    }

    #[test]
    fn only_unreachable_transport_is_retryable() {
        assert!(DispatchError::TransportUnreachable("socket closed".into()).is_retryable());
        assert!(!DispatchError::TransportRejected("bad payload".into()).is_retryable());
    }

    #[test]
    fn poll_budget_error_mentions_minute_and_attempts() {
        let err = PollError::BudgetExhausted { expected_minute: 15, attempts: 5 };
        let text = err.to_string();
        assert!(text.contains("15"));
        assert!(text.contains("5 attempts"));
    }

    #[test]
    fn sink_conflict_reports_existing_status() {
        let err = SinkError::TerminalConflict { existing: GateStatus::Aborted };
        assert!(err.to_string().contains("aborted"));
    }
}
