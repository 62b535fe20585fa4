//! Verification gate engine.
//!
//! The shared execution core behind every provider-specific verification
//! state: it resolves canary/control topology, dispatches telemetry
//! collection to a remote worker fleet in bounded batches, waits on a join
//! barrier for out-of-order completions, polls the analysis result store
//! with a bounded retry budget, and converts the resulting risk
//! classification into a terminal verdict.
//!
//! The engine is a library: the surrounding workflow runtime drives it by
//! calling [`gate::GateController::execute`] once and then resuming it with
//! completion, notify, timeout, and abort events. The engine owns no
//! background threads.

pub mod context;
pub mod dispatch;
pub mod gate;
pub mod interfaces;
pub mod poll;
pub mod risk;
pub mod strategy;
pub mod testing;

pub use context::{
    AnalysisContext, BaselineSource, ContextBuilder, ContextOutcome, DeploymentContext,
    FeatureFlags, GateSpec,
};
pub use gate::{ExecutionResponse, GateController, GatePhase};
pub use interfaces::{
    CollectionPayload, ProviderAdapter, ResultStore, TaskTransport, TopologyResolver, VerdictSink,
};
