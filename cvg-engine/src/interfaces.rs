//! Boundary contracts between the engine and the surrounding platform.
//!
//! The engine never talks to a provider API, a database, or the workflow
//! scheduler directly; everything crosses one of these seams. All of them
//! are object-safe so embedders can hand in `Arc<dyn …>` collaborators.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cvg_common::{
    AnalysisSummary, AppId, ContextBuildError, DispatchError, EnvId, GateStatus, NodeMap,
    PollError, ProviderClass, ServiceId, SinkError, StateExecutionId, TaskId, WorkflowExecutionId,
    WorkflowId,
};

use crate::context::{AnalysisContext, DeploymentContext};

// ── Topology Resolver ────────────────────────────────────────────────────

/// Enumerates test (canary) and control (baseline) nodes for a deployment.
///
/// Implementations must be side-effect free: the engine may call either
/// method more than once for the same invocation.
#[async_trait]
pub trait TopologyResolver: Send + Sync {
    /// Nodes deployed in the current phase whose telemetry is under test.
    async fn resolve_test_nodes(
        &self,
        deployment: &DeploymentContext,
    ) -> Result<NodeMap, ContextBuildError>;

    /// Nodes still running the previous version, used as the baseline.
    async fn resolve_control_nodes(
        &self,
        deployment: &DeploymentContext,
    ) -> Result<NodeMap, ContextBuildError>;
}

// ── Provider Adapter ─────────────────────────────────────────────────────

/// Opaque collection request handed to the task transport. The engine
/// never inspects the body; its shape is owned by the provider adapter and
/// the workers that execute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionPayload {
    /// Provider discriminator for routing on the worker side.
    pub provider: String,
    /// Provider-specific request body.
    pub body: serde_json::Value,
}

/// Per-provider customization injected into the generic engine.
///
/// Adapters shape the collection request and declare their timeout class;
/// the engine owns everything else.
pub trait ProviderAdapter: Send + Sync {
    /// Metric or log collection; decides timeout headroom.
    fn provider_class(&self) -> ProviderClass;

    /// Name of the configured provider connector. Connectors whose name
    /// carries a reserved demo suffix short-circuit the pipeline with a
    /// scripted verdict.
    fn connector_name(&self) -> &str;

    /// Whether this provider always collects via the external per-minute
    /// scheduler instead of one-shot dispatch.
    fn per_minute(&self) -> bool {
        false
    }

    /// Build the collection request for one batch of nodes.
    fn build_collection_request(
        &self,
        context: &AnalysisContext,
        nodes: &NodeMap,
    ) -> CollectionPayload;

    /// Timeout headroom added to each collection task.
    fn task_timeout_buffer(&self) -> Duration {
        self.provider_class().task_timeout_buffer()
    }
}

// ── Task Transport ───────────────────────────────────────────────────────

/// Hands collection tasks to the remote worker fleet.
///
/// The transport delivers at most one completion per submitted task; the
/// engine correlates them through the wait ids it registered and never
/// re-submits on its own.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Submit one collection task; returns the transport's task handle.
    async fn submit(
        &self,
        payload: CollectionPayload,
        timeout: Duration,
    ) -> Result<TaskId, DispatchError>;
}

// ── Result Store ─────────────────────────────────────────────────────────

/// Read side of the eventually consistent analysis store.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Latest minute-bucketed summary for a state execution, if any.
    async fn get_summary(
        &self,
        state_execution_id: &StateExecutionId,
        app_id: &AppId,
        provider: ProviderClass,
    ) -> Result<Option<AnalysisSummary>, PollError>;

    /// Baseline execution pinned by a user for this workflow/env/service.
    async fn get_pinned_baseline(
        &self,
        workflow_id: &WorkflowId,
        env_id: &EnvId,
        service_id: &ServiceId,
    ) -> Result<Option<WorkflowExecutionId>, ContextBuildError>;

    /// Most recent successful execution of the same workflow/service that
    /// actually produced analyzable data.
    async fn get_last_successful_execution_with_data(
        &self,
        provider: ProviderClass,
        app_id: &AppId,
        service_id: &ServiceId,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowExecutionId>, ContextBuildError>;

    /// Drop any partial results a previous attempt of this state execution
    /// left behind. Called once on gate entry so a retried state starts
    /// from a clean slate.
    async fn clear_state_results(
        &self,
        state_execution_id: &StateExecutionId,
    ) -> Result<(), PollError>;
}

// ── Verdict Sink ─────────────────────────────────────────────────────────

/// Receives every status transition of a gate invocation, terminal or not,
/// so dashboards never observe a stuck invocation.
///
/// Contract: repeated writes of the same terminal status are idempotent;
/// a write of a *different* terminal status after the first must be
/// rejected with [`SinkError::TerminalConflict`].
#[async_trait]
pub trait VerdictSink: Send + Sync {
    async fn set_gate_status(
        &self,
        state_execution_id: &StateExecutionId,
        status: GateStatus,
        terminal: bool,
    ) -> Result<(), SinkError>;
}
