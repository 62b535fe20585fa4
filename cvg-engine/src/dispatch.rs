//! Collection task dispatch and the join barrier.
//!
//! The union of test and control nodes is partitioned into bounded batches;
//! each batch becomes one remote task with its own wait id. The join
//! barrier presents the out-of-order per-batch completions as a single
//! "collection done" event: it opens once every registered batch has
//! reported, success or failure alike, so one dead worker cannot deadlock
//! the gate.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cvg_common::{
    CorrelationId, DispatchError, EngineConfig, NodeMap, StateExecutionId, TaskId, WaitId,
    sanitize_node_map,
};

use crate::context::AnalysisContext;
use crate::interfaces::{ProviderAdapter, TaskTransport};

// ── Batching ─────────────────────────────────────────────────────────────

/// Partition a node map into batches of at most `batch_size` nodes.
///
/// Deterministic: nodes are taken in map order, so `ceil(N / B)` batches
/// come out and every node lands in exactly one of them.
pub fn batch_nodes(nodes: &NodeMap, batch_size: usize) -> Vec<NodeMap> {
    let mut batches = Vec::new();
    let mut current = NodeMap::new();
    for (node, group) in nodes {
        if current.len() == batch_size {
            batches.push(std::mem::take(&mut current));
        }
        current.insert(node.clone(), group.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// One batch of nodes submitted as a single remote task.
#[derive(Debug, Clone)]
pub struct CollectionBatch {
    pub wait_id: WaitId,
    pub nodes: NodeMap,
    pub timeout: Duration,
}

// ── Join Barrier ─────────────────────────────────────────────────────────

/// What a completion report did to the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierDisposition {
    /// Still waiting on other batches.
    Waiting,
    /// This report was the last one; the barrier is now open.
    Opened,
    /// Wait id was not registered (or already reported); ignored.
    Unknown,
}

/// Commutative join barrier over the wait ids of one invocation.
///
/// Order-independent by construction: reports only ever remove from the
/// pending set, and the barrier opens exactly once, when the set empties
/// or it is forced open by timeout/notify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinBarrier {
    pending: BTreeSet<WaitId>,
    failed: Vec<WaitId>,
    open: bool,
}

impl JoinBarrier {
    /// Barrier over the given batch wait ids.
    pub fn new(wait_ids: impl IntoIterator<Item = WaitId>) -> Self {
        Self {
            pending: wait_ids.into_iter().collect(),
            failed: Vec::new(),
            open: false,
        }
    }

    /// Barrier for externally driven collection: no registered batches,
    /// opened solely by the scheduler's notify signal.
    pub fn external() -> Self {
        Self { pending: BTreeSet::new(), failed: Vec::new(), open: false }
    }

    /// Record one batch completion. A failed batch is remembered but does
    /// not keep the barrier closed; polling will judge whatever partial
    /// data the provider recorded.
    pub fn report(&mut self, wait_id: &WaitId, success: bool) -> BarrierDisposition {
        if !self.pending.remove(wait_id) {
            return BarrierDisposition::Unknown;
        }
        if !success {
            self.failed.push(wait_id.clone());
        }
        if self.pending.is_empty() && !self.open {
            self.open = true;
            BarrierDisposition::Opened
        } else {
            BarrierDisposition::Waiting
        }
    }

    /// Force the barrier open (scheduler notify or barrier timeout).
    /// Returns false if it was already open.
    pub fn force_open(&mut self) -> bool {
        if self.open {
            return false;
        }
        self.open = true;
        true
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

// ── Dispatch Record ──────────────────────────────────────────────────────

/// Wait id ↔ transport task id pairing for one dispatched batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedTask {
    pub wait_id: WaitId,
    pub task_id: TaskId,
}

/// Durable mapping from an invocation to its dispatched tasks, kept so the
/// invocation can be resumed if the engine restarts before the barrier
/// opens. Node names are stored sanitized (storage keys reject dots).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub correlation_id: CorrelationId,
    pub state_execution_id: StateExecutionId,
    pub tasks: Vec<DispatchedTask>,
    pub test_nodes: NodeMap,
    pub control_nodes: NodeMap,
    pub dispatched_at: DateTime<Utc>,
}

// ── Dispatcher ───────────────────────────────────────────────────────────

/// Everything the controller needs after a successful dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub record: DispatchRecord,
    pub barrier: JoinBarrier,
}

/// Batches an invocation's nodes and submits one collection task per
/// batch. Holds the transport, nothing else; all tuning comes from the
/// engine config.
pub struct TaskDispatcher {
    transport: Arc<dyn TaskTransport>,
}

impl TaskDispatcher {
    pub fn new(transport: Arc<dyn TaskTransport>) -> Self {
        Self { transport }
    }

    /// Submit the invocation's collection tasks.
    ///
    /// A submit failure aborts the dispatch and surfaces as an error
    /// verdict upstream; the engine never leaves half an invocation
    /// running without a record of it.
    pub async fn dispatch(
        &self,
        config: &EngineConfig,
        context: &AnalysisContext,
        adapter: &dyn ProviderAdapter,
    ) -> Result<DispatchOutcome, DispatchError> {
        let nodes = context.nodes_to_collect();
        let timeout =
            config.task_timeout(context.time_duration_minutes, adapter.task_timeout_buffer());

        let batches: Vec<CollectionBatch> = batch_nodes(&nodes, config.host_batch_size)
            .into_iter()
            .map(|nodes| CollectionBatch { wait_id: WaitId::generate(), nodes, timeout })
            .collect();

        info!(
            state_execution_id = %context.state_execution_id,
            correlation_id = %context.correlation_id,
            batches = batches.len(),
            nodes = nodes.len(),
            "dispatching collection tasks"
        );

        let mut tasks = Vec::with_capacity(batches.len());
        for batch in &batches {
            let payload = adapter.build_collection_request(context, &batch.nodes);
            let task_id = self.transport.submit(payload, batch.timeout).await?;
            debug!(
                wait_id = %batch.wait_id,
                task_id = %task_id,
                batch_nodes = batch.nodes.len(),
                "collection task submitted"
            );
            tasks.push(DispatchedTask { wait_id: batch.wait_id.clone(), task_id });
        }

        if tasks.is_empty() {
            warn!(
                state_execution_id = %context.state_execution_id,
                "dispatch produced no batches"
            );
        }

        let barrier = JoinBarrier::new(tasks.iter().map(|t| t.wait_id.clone()));
        let record = DispatchRecord {
            correlation_id: context.correlation_id.clone(),
            state_execution_id: context.state_execution_id.clone(),
            tasks,
            test_nodes: sanitize_node_map(&context.test_nodes),
            control_nodes: sanitize_node_map(&context.control_nodes),
            dispatched_at: Utc::now(),
        };

        Ok(DispatchOutcome { record, barrier })
    }
}
