//! Gate controller: the verification state machine.
//!
//! One controller instance serves many invocations. The controller is not
//! a thread; the outer workflow runtime calls [`GateController::execute`]
//! once per invocation and then resumes it through the completion, notify,
//! timeout, and abort entry points as events arrive for its ids. Each such
//! resumption runs to completion on the caller's task.
//!
//! Phases: `BuildingContext → Dispatching → AwaitingCompletion → Polling →
//! {Success, Failed, Error, Aborted}`. The only suspension point is between
//! dispatch and completion; polling blocks its resumption boundedly. Every
//! failure mode resolves to a terminal verdict here — nothing escapes to
//! the workflow runtime as an error, and the verdict sink is updated before
//! any entry point returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use cvg_common::{
    CorrelationId, EngineConfig, GateStatus, SinkError, StateExecutionId, Verdict, WaitId,
};

use crate::context::{
    AnalysisContext, BaselineSource, ContextBuilder, ContextOutcome, DeploymentContext, GateSpec,
};
use crate::dispatch::{BarrierDisposition, DispatchRecord, JoinBarrier, TaskDispatcher};
use crate::interfaces::{ProviderAdapter, ResultStore, TaskTransport, TopologyResolver, VerdictSink};
use crate::poll::{PollOutcome, ResultPoller};
use crate::risk;
use crate::strategy::{CollectionCadence, collection_cadence};

// ── Phases ───────────────────────────────────────────────────────────────

/// Observable phase of a suspended invocation.
///
/// Context building and dispatch run synchronously inside [`GateController::execute`],
/// so they are never observable from outside; terminal invocations are
/// dropped immediately and their status lives in the verdict sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// Waiting for the join barrier (or the external scheduler's notify).
    AwaitingCompletion,
    /// Barrier opened; a resumption is polling the result store.
    Polling,
}

// ── Execution Response ───────────────────────────────────────────────────

/// What `execute` hands back to the workflow runtime.
#[derive(Debug, Clone)]
pub enum ExecutionResponse {
    /// The invocation finished synchronously (short-circuit or failure).
    Completed(Verdict),
    /// Collection is in flight; resume through the event entry points.
    Suspended {
        correlation_id: CorrelationId,
        /// Deadline the outer scheduler should enforce on the whole
        /// invocation.
        overall_timeout: Duration,
        /// Progress message for dashboards (baseline resolution outcome).
        message: String,
    },
}

// ── Invocation bookkeeping ───────────────────────────────────────────────

/// Live state of one suspended invocation. Dropped as soon as the
/// invocation reaches a terminal status; audit history lives in the
/// external stores, not here.
struct Invocation {
    context: AnalysisContext,
    phase: GatePhase,
    barrier: JoinBarrier,
    record: Option<DispatchRecord>,
}

#[derive(Default)]
struct Registry {
    by_state: HashMap<StateExecutionId, Invocation>,
    by_correlation: HashMap<CorrelationId, StateExecutionId>,
}

impl Registry {
    fn insert(&mut self, invocation: Invocation) {
        let state_id = invocation.context.state_execution_id.clone();
        let correlation_id = invocation.context.correlation_id.clone();
        // A retried state replaces its predecessor; the old correlation id
        // can no longer resume anything.
        if let Some(old) = self.by_state.insert(state_id.clone(), invocation) {
            self.by_correlation.remove(&old.context.correlation_id);
        }
        self.by_correlation.insert(correlation_id, state_id);
    }

    fn remove(&mut self, state_id: &StateExecutionId) -> Option<Invocation> {
        let invocation = self.by_state.remove(state_id)?;
        self.by_correlation.remove(&invocation.context.correlation_id);
        Some(invocation)
    }

    fn state_id_for(&self, correlation_id: &CorrelationId) -> Option<StateExecutionId> {
        self.by_correlation.get(correlation_id).cloned()
    }
}

// ── Controller ───────────────────────────────────────────────────────────

/// The verification gate engine. Owns the batching, barrier, polling, and
/// verdict policy; borrows everything else through the capability traits.
pub struct GateController {
    config: EngineConfig,
    topology: Arc<dyn TopologyResolver>,
    dispatcher: TaskDispatcher,
    store: Arc<dyn ResultStore>,
    sink: Arc<dyn VerdictSink>,
    registry: RwLock<Registry>,
}

impl GateController {
    pub fn new(
        config: EngineConfig,
        topology: Arc<dyn TopologyResolver>,
        transport: Arc<dyn TaskTransport>,
        store: Arc<dyn ResultStore>,
        sink: Arc<dyn VerdictSink>,
    ) -> Self {
        Self {
            config,
            topology,
            dispatcher: TaskDispatcher::new(transport),
            store,
            sink,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Overall timeout the outer scheduler should apply to an invocation
    /// with this verification window.
    pub fn overall_timeout(&self, duration_minutes: u32) -> Duration {
        self.config.overall_timeout(duration_minutes)
    }

    /// Current phase of an invocation, if the engine still tracks it.
    pub async fn phase(&self, state_execution_id: &StateExecutionId) -> Option<GatePhase> {
        self.registry
            .read()
            .await
            .by_state
            .get(state_execution_id)
            .map(|inv| inv.phase)
    }

    /// Dispatch record for a suspended invocation, for embedders that
    /// persist it across restarts.
    pub async fn dispatch_record(
        &self,
        correlation_id: &CorrelationId,
    ) -> Option<DispatchRecord> {
        let registry = self.registry.read().await;
        let state_id = registry.by_correlation.get(correlation_id)?;
        registry.by_state.get(state_id)?.record.clone()
    }

    /// Analysis context of a suspended invocation. Persisted alongside the
    /// dispatch record, it is everything [`GateController::restore`] needs.
    pub async fn analysis_context(
        &self,
        correlation_id: &CorrelationId,
    ) -> Option<AnalysisContext> {
        let registry = self.registry.read().await;
        let state_id = registry.by_correlation.get(correlation_id)?;
        registry.by_state.get(state_id).map(|inv| inv.context.clone())
    }

    // ── Entry: state execution ───────────────────────────────────────────

    /// Run one gate invocation up to its suspension point.
    pub async fn execute(
        &self,
        deployment: &DeploymentContext,
        spec: &GateSpec,
        adapter: &dyn ProviderAdapter,
    ) -> ExecutionResponse {
        let state_id = &deployment.state_execution_id;
        info!(
            state_execution_id = %state_id,
            strategy = %spec.strategy,
            provider = %adapter.provider_class(),
            "executing verification gate"
        );

        // License first: unsupported tiers skip verification, they do not
        // fail it.
        if !deployment.license.supports_verification() {
            return ExecutionResponse::Completed(
                self.commit_unregistered(
                    state_id,
                    Verdict::success(
                        "Your license does not support this verification. Skipping analysis.",
                    ),
                )
                .await,
            );
        }

        if let Err(err) = self.config.validate_duration(spec.time_duration_minutes) {
            return ExecutionResponse::Completed(
                self.commit_unregistered(state_id, Verdict::error(err.to_string())).await,
            );
        }

        // A retried state starts from a clean slate.
        if let Err(err) = self.store.clear_state_results(state_id).await {
            return ExecutionResponse::Completed(
                self.commit_unregistered(state_id, Verdict::error(err.to_string())).await,
            );
        }

        // Dashboards observe the invocation from this point on. A metadata
        // write failure is logged, never fatal.
        if let Err(err) = self
            .sink
            .set_gate_status(state_id, GateStatus::Running, false)
            .await
        {
            warn!(state_execution_id = %state_id, error = %err, "failed to record running status");
        }

        // Demo fixtures bypass the entire pipeline with a scripted verdict.
        if deployment.flags.demo_mode {
            if let Some(script) = risk::demo_script(adapter.connector_name()) {
                script.emit_activity_log(state_id.as_str(), spec.time_duration_minutes);
                return ExecutionResponse::Completed(
                    self.commit_unregistered(state_id, script.verdict()).await,
                );
            }
        }

        let outcome = match ContextBuilder::build(
            deployment,
            spec,
            adapter.provider_class(),
            self.topology.as_ref(),
            self.store.as_ref(),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                return ExecutionResponse::Completed(
                    self.commit_unregistered(state_id, Verdict::error(err.to_string())).await,
                );
            }
        };

        let (context, baseline_message) = match outcome {
            ContextOutcome::ShortCircuit(verdict) => {
                return ExecutionResponse::Completed(
                    self.commit_unregistered(state_id, verdict).await,
                );
            }
            ContextOutcome::Ready { context, baseline_message } => (*context, baseline_message),
        };

        match collection_cadence(spec.strategy, adapter, &deployment.flags) {
            CollectionCadence::PerMinute => {
                // The external scheduler is the task source; nothing to
                // dispatch, the gate just waits for its notify.
                info!(
                    state_execution_id = %state_id,
                    "per-minute collection; awaiting external scheduler"
                );
                self.suspend(context, JoinBarrier::external(), None, baseline_message)
                    .await
            }
            CollectionCadence::OneShot => {
                match self.dispatcher.dispatch(&self.config, &context, adapter).await {
                    Ok(outcome) => {
                        self.suspend(
                            context,
                            outcome.barrier,
                            Some(outcome.record),
                            baseline_message,
                        )
                        .await
                    }
                    Err(err) => ExecutionResponse::Completed(
                        self.commit_unregistered(state_id, Verdict::error(err.to_string()))
                            .await,
                    ),
                }
            }
        }
    }

    async fn suspend(
        &self,
        context: AnalysisContext,
        barrier: JoinBarrier,
        record: Option<DispatchRecord>,
        message: String,
    ) -> ExecutionResponse {
        let correlation_id = context.correlation_id.clone();
        let overall_timeout = self.config.overall_timeout(context.time_duration_minutes);
        let invocation = Invocation {
            context,
            phase: GatePhase::AwaitingCompletion,
            barrier,
            record,
        };
        self.registry.write().await.insert(invocation);
        ExecutionResponse::Suspended { correlation_id, overall_timeout, message }
    }

    /// Re-register an invocation restored from a persisted dispatch record
    /// after an engine restart. Completions for the recorded wait ids
    /// resume it exactly as if the engine had never gone away.
    pub async fn restore(&self, context: AnalysisContext, record: DispatchRecord) {
        let barrier = JoinBarrier::new(record.tasks.iter().map(|t| t.wait_id.clone()));
        info!(
            state_execution_id = %context.state_execution_id,
            pending = record.tasks.len(),
            "restoring suspended invocation"
        );
        let invocation = Invocation {
            context,
            phase: GatePhase::AwaitingCompletion,
            barrier,
            record: Some(record),
        };
        self.registry.write().await.insert(invocation);
    }

    // ── Entry: batch completion ──────────────────────────────────────────

    /// Feed one batch completion into the invocation's join barrier. When
    /// the last batch reports, the invocation proceeds to polling and this
    /// call returns the terminal verdict.
    pub async fn on_task_completion(
        &self,
        correlation_id: &CorrelationId,
        wait_id: &WaitId,
        success: bool,
    ) -> Option<Verdict> {
        let context = {
            let mut registry = self.registry.write().await;
            let Some(state_id) = registry.state_id_for(correlation_id) else {
                warn!(correlation_id = %correlation_id, "completion for unknown invocation");
                return None;
            };
            let Some(invocation) = registry.by_state.get_mut(&state_id) else {
                return None;
            };
            if invocation.phase == GatePhase::Polling {
                debug!(
                    state_execution_id = %state_id,
                    "completion while already polling; ignored"
                );
                return None;
            }
            match invocation.barrier.report(wait_id, success) {
                BarrierDisposition::Unknown => {
                    warn!(wait_id = %wait_id, "completion for unregistered batch");
                    return None;
                }
                BarrierDisposition::Waiting => {
                    debug!(
                        state_execution_id = %state_id,
                        pending = invocation.barrier.pending_count(),
                        "batch complete; barrier still waiting"
                    );
                    return None;
                }
                BarrierDisposition::Opened => {
                    if invocation.barrier.failed_count() > 0 {
                        warn!(
                            state_execution_id = %state_id,
                            failed_batches = invocation.barrier.failed_count(),
                            "barrier opened with partial batch failure; polling whatever was recorded"
                        );
                    }
                    invocation.phase = GatePhase::Polling;
                    invocation.context.clone()
                }
            }
        };

        self.poll_and_commit(context).await
    }

    // ── Entry: external scheduler notify ─────────────────────────────────

    /// Resume an invocation whose collection is driven by the external
    /// per-minute scheduler.
    pub async fn on_collection_notify(
        &self,
        state_execution_id: &StateExecutionId,
    ) -> Option<Verdict> {
        let context = {
            let mut registry = self.registry.write().await;
            let Some(invocation) = registry.by_state.get_mut(state_execution_id) else {
                warn!(state_execution_id = %state_execution_id, "notify for unknown invocation");
                return None;
            };
            if invocation.phase != GatePhase::AwaitingCompletion {
                debug!(
                    state_execution_id = %state_execution_id,
                    phase = ?invocation.phase,
                    "notify ignored"
                );
                return None;
            }
            if invocation.barrier.pending_count() > 0 {
                warn!(
                    state_execution_id = %state_execution_id,
                    "notify for invocation with dispatched batches; ignoring"
                );
                return None;
            }
            invocation.barrier.force_open();
            invocation.phase = GatePhase::Polling;
            invocation.context.clone()
        };

        self.poll_and_commit(context).await
    }

    // ── Entry: barrier timeout ───────────────────────────────────────────

    /// The outer scheduler gave up on the invocation's collection tasks.
    pub async fn on_barrier_timeout(&self, correlation_id: &CorrelationId) -> Option<Verdict> {
        let state_id = {
            let registry = self.registry.read().await;
            registry.state_id_for(correlation_id)?
        };
        let verdict = Verdict::error("Telemetry collection did not complete in time.");
        self.commit_registered(&state_id, verdict).await
    }

    // ── Entry: abort ─────────────────────────────────────────────────────

    /// Abort an invocation. Keyed by state-execution id: the outer state is
    /// stable even when the invocation was retried under a fresh
    /// correlation id.
    ///
    /// If a terminal verdict is already committed, the abort is a no-op;
    /// otherwise `Aborted` is recorded and any in-flight poll result for
    /// this invocation is suppressed.
    pub async fn abort(&self, state_execution_id: &StateExecutionId) -> bool {
        let tracked = self
            .registry
            .write()
            .await
            .remove(state_execution_id)
            .is_some();
        if tracked {
            info!(state_execution_id = %state_execution_id, "gate aborted while suspended");
        } else {
            // Untracked can still mean "running" from the sink's point of
            // view (abort raced execute, or the verdict just committed);
            // the sink's compare-and-set is the arbiter.
            debug!(state_execution_id = %state_execution_id, "abort for untracked invocation");
        }
        self.write_sink(state_execution_id, GateStatus::Aborted, true).await
    }

    // ── Polling and verdict commit ───────────────────────────────────────

    async fn poll_and_commit(&self, context: AnalysisContext) -> Option<Verdict> {
        let poller = ResultPoller::new(Arc::clone(&self.store));
        let outcome = poller
            .await_summary(
                &self.config,
                &context.state_execution_id,
                &context.app_id,
                context.provider_class,
                context.expected_minute(),
            )
            .await;

        let verdict = match outcome {
            Ok(PollOutcome::Summary(summary)) => {
                let status = risk::decide(summary.risk_level, context.tolerance);
                let message = if summary.message.is_empty() {
                    format!("Verification finished with {} risk.", summary.risk_level)
                } else {
                    summary.message
                };
                Verdict { status, message }
            }
            Ok(PollOutcome::NoData) => risk::decide_no_data(
                context.strict_no_data,
                context.baseline == BaselineSource::NewBaseline,
            ),
            Err(err) => Verdict::error(err.to_string()),
        };

        self.commit_registered(&context.state_execution_id, verdict).await
    }

    /// Commit a verdict for a registered invocation. Compare-and-set: if
    /// the invocation is gone (aborted) or already terminal, the verdict is
    /// dropped and `None` comes back.
    async fn commit_registered(
        &self,
        state_execution_id: &StateExecutionId,
        verdict: Verdict,
    ) -> Option<Verdict> {
        if self
            .registry
            .write()
            .await
            .remove(state_execution_id)
            .is_none()
        {
            info!(
                state_execution_id = %state_execution_id,
                status = %verdict.status,
                "verdict dropped; invocation already resolved"
            );
            return None;
        }
        info!(
            state_execution_id = %state_execution_id,
            status = %verdict.status,
            "gate verdict committed"
        );
        self.write_sink(state_execution_id, verdict.status, true).await;
        Some(verdict)
    }

    /// Commit a verdict for an invocation that never reached the registry
    /// (license skip, demo, short-circuit, build/dispatch failure).
    async fn commit_unregistered(
        &self,
        state_execution_id: &StateExecutionId,
        verdict: Verdict,
    ) -> Verdict {
        info!(
            state_execution_id = %state_execution_id,
            status = %verdict.status,
            message = %verdict.message,
            "gate resolved without dispatch"
        );
        self.write_sink(state_execution_id, verdict.status, true).await;
        verdict
    }

    /// Write a status to the sink, tolerating lost compare-and-sets.
    /// Returns false when the sink already holds a different terminal
    /// status.
    async fn write_sink(
        &self,
        state_execution_id: &StateExecutionId,
        status: GateStatus,
        terminal: bool,
    ) -> bool {
        match self
            .sink
            .set_gate_status(state_execution_id, status, terminal)
            .await
        {
            Ok(()) => true,
            Err(SinkError::TerminalConflict { existing }) => {
                info!(
                    state_execution_id = %state_execution_id,
                    attempted = %status,
                    existing = %existing,
                    "status write lost compare-and-set"
                );
                false
            }
            Err(SinkError::Unavailable(err)) => {
                warn!(
                    state_execution_id = %state_execution_id,
                    error = %err,
                    "verdict sink unavailable"
                );
                false
            }
        }
    }
}
