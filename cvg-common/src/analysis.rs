//! Risk, tolerance, strategy, and verdict vocabulary for verification gates.

use serde::{Deserialize, Serialize};

// ── Risk Level ───────────────────────────────────────────────────────────

/// Coarse classification of how anomalous the canary telemetry looks
/// relative to baseline. Produced by the analysis backend, consumed by the
/// risk decision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ── Tolerance ────────────────────────────────────────────────────────────

/// Configured sensitivity converting risk into pass/fail.
///
/// `Low` is the strictest setting: any observed risk fails the gate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTolerance {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for AnalysisTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ── Comparison Strategy ──────────────────────────────────────────────────

/// How baseline data is located for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStrategy {
    /// Compare against a previous successful execution (pinned or auto).
    CompareWithPrevious,
    /// Compare canary nodes against the not-yet-upgraded nodes of the
    /// current deployment.
    CompareWithCurrent,
    /// Compare against a trailing historical window of the same nodes.
    Predictive,
}

impl std::fmt::Display for ComparisonStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CompareWithPrevious => write!(f, "compare_with_previous"),
            Self::CompareWithCurrent => write!(f, "compare_with_current"),
            Self::Predictive => write!(f, "predictive"),
        }
    }
}

// ── Provider Class ───────────────────────────────────────────────────────

/// Broad class of telemetry a provider adapter collects. The engine only
/// cares about the class for timeout headroom; the adapter owns the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderClass {
    /// Time-series metrics (APM, infrastructure metrics).
    Metric,
    /// Log events matched by a query.
    Log,
}

impl std::fmt::Display for ProviderClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Log => write!(f, "log"),
        }
    }
}

// ── License Tier ─────────────────────────────────────────────────────────

/// Account license tier. Continuous verification is a paid capability;
/// community accounts skip it rather than fail on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseTier {
    Community,
    Professional,
    Enterprise,
}

impl LicenseTier {
    /// Whether this tier may run verification gates at all.
    pub fn supports_verification(self) -> bool {
        !matches!(self, Self::Community)
    }
}

// ── Gate Status ──────────────────────────────────────────────────────────

/// Lifecycle status of one gate invocation as observed through the verdict
/// sink. `Running` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Invocation in flight (dispatching, awaiting completion, or polling).
    Running,
    /// Verification passed (or was skipped with an explanation).
    Success,
    /// The deployment looks unhealthy.
    Failed,
    /// The verification pipeline itself malfunctioned.
    Error,
    /// The outer workflow aborted the invocation.
    Aborted,
}

impl GateStatus {
    /// Whether this status ends the invocation. Once a terminal status is
    /// recorded the gate issues no further polls or dispatches.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

// ── Analysis Summary ─────────────────────────────────────────────────────

/// Minute-bucketed analysis result read back from the result store.
///
/// `analysis_minute` is the 1-based ordinal of the last analyzed minute
/// within the verification window; a summary whose minute is below the
/// expected final minute is "not yet ready".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub analysis_minute: u32,
    pub risk_level: RiskLevel,
    /// True when the analysis ran but the window contained no comparable
    /// data (e.g. no traffic hit the canary).
    #[serde(default)]
    pub empty_result: bool,
    /// Human-readable summary from the analysis backend.
    #[serde(default)]
    pub message: String,
}

// ── Verdict ──────────────────────────────────────────────────────────────

/// Terminal outcome of one gate invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: GateStatus,
    pub message: String,
}

impl Verdict {
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: GateStatus::Success, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { status: GateStatus::Failed, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: GateStatus::Error, message: message.into() }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self { status: GateStatus::Aborted, message: message.into() }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}
