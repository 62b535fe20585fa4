//! Scripted in-memory collaborators for tests and the scenario simulator.
//!
//! No sockets, no storage: each double is builder-configured with the
//! behavior a test needs and records what the engine did to it. Shipped as
//! a regular module (not `cfg(test)`) so integration tests and `cvg-sim`
//! can drive the engine with them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use cvg_common::{
    AnalysisSummary, AppId, ContextBuildError, ContextBuildErrorKind, DispatchError, EnvId,
    GateStatus, NodeMap, PollError, ProviderClass, ServiceId, SinkError, StateExecutionId, TaskId,
    WorkflowExecutionId, WorkflowId,
};

use crate::context::{AnalysisContext, DeploymentContext};
use crate::interfaces::{
    CollectionPayload, ProviderAdapter, ResultStore, TaskTransport, TopologyResolver, VerdictSink,
};

// ── Topology ─────────────────────────────────────────────────────────────

/// Topology resolver returning fixed node sets.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTopology {
    test_nodes: NodeMap,
    control_nodes: NodeMap,
    failure: Option<ContextBuildError>,
}

impl ScriptedTopology {
    pub fn new(test_nodes: NodeMap, control_nodes: NodeMap) -> Self {
        Self { test_nodes, control_nodes, failure: None }
    }

    /// Resolver that fails both lookups with the given error.
    pub fn failing(detail: impl Into<String>) -> Self {
        Self {
            failure: Some(ContextBuildError::new(
                ContextBuildErrorKind::MissingInfraMapping,
                detail,
            )),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TopologyResolver for ScriptedTopology {
    async fn resolve_test_nodes(
        &self,
        _deployment: &DeploymentContext,
    ) -> Result<NodeMap, ContextBuildError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.test_nodes.clone()),
        }
    }

    async fn resolve_control_nodes(
        &self,
        _deployment: &DeploymentContext,
    ) -> Result<NodeMap, ContextBuildError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(self.control_nodes.clone()),
        }
    }
}

// ── Result Store ─────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    summaries: VecDeque<Option<AnalysisSummary>>,
    pinned: Option<WorkflowExecutionId>,
    last_successful: Option<WorkflowExecutionId>,
    cleared: Vec<StateExecutionId>,
    fail_clear: Option<String>,
    fail_summary: Option<String>,
}

/// Result store scripted per read.
///
/// Summaries are served as a sequence: each `get_summary` consumes the
/// next entry, and the final entry repeats forever (an eventually
/// consistent store that has caught up).
#[derive(Clone, Default)]
pub struct ScriptedStore {
    state: Arc<Mutex<StoreState>>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedStore {
    pub fn with_summary(self, summary: AnalysisSummary) -> Self {
        self.with_summary_sequence(vec![Some(summary)])
    }

    pub fn with_summary_sequence(self, summaries: Vec<Option<AnalysisSummary>>) -> Self {
        self.state.lock().unwrap().summaries = summaries.into();
        self
    }

    pub fn with_pinned_baseline(self, execution_id: WorkflowExecutionId) -> Self {
        self.state.lock().unwrap().pinned = Some(execution_id);
        self
    }

    pub fn with_last_successful(self, execution_id: WorkflowExecutionId) -> Self {
        self.state.lock().unwrap().last_successful = Some(execution_id);
        self
    }

    pub fn failing_clear(self, detail: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_clear = Some(detail.into());
        self
    }

    pub fn failing_summary(self, detail: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_summary = Some(detail.into());
        self
    }

    /// Shared counter of `get_summary` reads.
    pub fn summary_reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    /// State executions whose partial results were cleared.
    pub fn cleared(&self) -> Vec<StateExecutionId> {
        self.state.lock().unwrap().cleared.clone()
    }
}

#[async_trait]
impl ResultStore for ScriptedStore {
    async fn get_summary(
        &self,
        _state_execution_id: &StateExecutionId,
        _app_id: &AppId,
        _provider: ProviderClass,
    ) -> Result<Option<AnalysisSummary>, PollError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = &state.fail_summary {
            return Err(PollError::StoreFailure(detail.clone()));
        }
        if state.summaries.len() > 1 {
            Ok(state.summaries.pop_front().unwrap_or(None))
        } else {
            Ok(state.summaries.front().cloned().unwrap_or(None))
        }
    }

    async fn get_pinned_baseline(
        &self,
        _workflow_id: &WorkflowId,
        _env_id: &EnvId,
        _service_id: &ServiceId,
    ) -> Result<Option<WorkflowExecutionId>, ContextBuildError> {
        Ok(self.state.lock().unwrap().pinned.clone())
    }

    async fn get_last_successful_execution_with_data(
        &self,
        _provider: ProviderClass,
        _app_id: &AppId,
        _service_id: &ServiceId,
        _workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowExecutionId>, ContextBuildError> {
        Ok(self.state.lock().unwrap().last_successful.clone())
    }

    async fn clear_state_results(
        &self,
        state_execution_id: &StateExecutionId,
    ) -> Result<(), PollError> {
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = &state.fail_clear {
            return Err(PollError::StoreFailure(detail.clone()));
        }
        state.cleared.push(state_execution_id.clone());
        Ok(())
    }
}

// ── Task Transport ───────────────────────────────────────────────────────

/// One task the engine submitted.
#[derive(Debug, Clone)]
pub struct SubmittedTask {
    pub task_id: TaskId,
    pub payload: CollectionPayload,
    pub timeout: Duration,
}

#[derive(Default)]
struct TransportState {
    submitted: Vec<SubmittedTask>,
    fail: Option<String>,
}

/// Transport that records submissions and mints sequential task ids.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<TransportState>>,
}

impl RecordingTransport {
    /// Transport whose submissions all fail.
    pub fn failing(detail: impl Into<String>) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().fail = Some(detail.into());
        transport
    }

    pub fn submitted(&self) -> Vec<SubmittedTask> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl TaskTransport for RecordingTransport {
    async fn submit(
        &self,
        payload: CollectionPayload,
        timeout: Duration,
    ) -> Result<TaskId, DispatchError> {
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = &state.fail {
            return Err(DispatchError::TransportUnreachable(detail.clone()));
        }
        let task_id = TaskId::new(format!("task-{}", state.submitted.len() + 1));
        state.submitted.push(SubmittedTask { task_id: task_id.clone(), payload, timeout });
        Ok(task_id)
    }
}

// ── Verdict Sink ─────────────────────────────────────────────────────────

#[derive(Default)]
struct SinkState {
    history: Vec<(GateStatus, bool)>,
    terminal: Option<GateStatus>,
}

/// Verdict sink enforcing the compare-and-set contract and recording
/// every write for assertions.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn terminal_status(&self) -> Option<GateStatus> {
        self.state.lock().unwrap().terminal
    }

    pub fn history(&self) -> Vec<(GateStatus, bool)> {
        self.state.lock().unwrap().history.clone()
    }
}

#[async_trait]
impl VerdictSink for RecordingSink {
    async fn set_gate_status(
        &self,
        _state_execution_id: &StateExecutionId,
        status: GateStatus,
        terminal: bool,
    ) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.terminal {
            if terminal && status == existing {
                // Idempotent repeat of the committed status.
                state.history.push((status, terminal));
                return Ok(());
            }
            return Err(SinkError::TerminalConflict { existing });
        }
        state.history.push((status, terminal));
        if terminal {
            state.terminal = Some(status);
        }
        Ok(())
    }
}

// ── Provider Adapter ─────────────────────────────────────────────────────

/// Fixed-behavior provider adapter.
#[derive(Debug, Clone)]
pub struct StaticAdapter {
    class: ProviderClass,
    connector: String,
    per_minute: bool,
}

impl StaticAdapter {
    pub fn new(class: ProviderClass, connector: impl Into<String>) -> Self {
        Self { class, connector: connector.into(), per_minute: false }
    }

    /// Mark the adapter as per-minute-only collection.
    pub fn per_minute(mut self) -> Self {
        self.per_minute = true;
        self
    }
}

impl ProviderAdapter for StaticAdapter {
    fn provider_class(&self) -> ProviderClass {
        self.class
    }

    fn connector_name(&self) -> &str {
        &self.connector
    }

    fn per_minute(&self) -> bool {
        self.per_minute
    }

    fn build_collection_request(
        &self,
        context: &AnalysisContext,
        nodes: &NodeMap,
    ) -> CollectionPayload {
        CollectionPayload {
            provider: self.class.to_string(),
            body: json!({
                "connector": self.connector,
                "state_execution_id": context.state_execution_id,
                "duration_minutes": context.time_duration_minutes,
                "nodes": nodes.keys().collect::<Vec<_>>(),
            }),
        }
    }
}
