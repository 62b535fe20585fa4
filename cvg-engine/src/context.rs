//! Deployment context and analysis-context building.
//!
//! [`DeploymentContext`] is the immutable snapshot of everything the outer
//! workflow knows about the deployment under verification; the engine never
//! reaches back into the workflow runtime for more. [`ContextBuilder`]
//! turns it into the [`AnalysisContext`] one gate invocation runs on,
//! resolving topology and baseline along the way.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cvg_common::{
    AccountId, AnalysisTolerance, AppId, ComparisonStrategy, ContextBuildError, CorrelationId,
    EnvId, LicenseTier, NodeMap, ProviderClass, ServiceId, StateExecutionId, Verdict,
    WorkflowExecutionId, WorkflowId, strip_overlap,
};

use crate::interfaces::{ResultStore, TopologyResolver};

/// Trailing history used when no explicit predictive window is configured.
const DEFAULT_PREDICTIVE_HISTORY_MINUTES: u32 = 30;

// ── Deployment Context ───────────────────────────────────────────────────

/// Feature and account flags that alter gate behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Demo fixtures: connectors with a reserved name suffix return a
    /// scripted verdict instead of running the pipeline.
    #[serde(default)]
    pub demo_mode: bool,
    /// Strict verification: an empty analysis window fails the gate
    /// instead of passing it, so a telemetry outage cannot masquerade as
    /// a healthy canary.
    #[serde(default)]
    pub strict_no_data: bool,
    /// Route collection through the external per-minute scheduler for
    /// providers that support it.
    #[serde(default)]
    pub per_minute_collection: bool,
}

/// Immutable deployment snapshot handed in by the workflow runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    pub account_id: AccountId,
    pub app_id: AppId,
    pub workflow_id: WorkflowId,
    pub workflow_execution_id: WorkflowExecutionId,
    pub state_execution_id: StateExecutionId,
    pub service_id: ServiceId,
    pub env_id: EnvId,
    pub license: LicenseTier,
    #[serde(default)]
    pub flags: FeatureFlags,
}

/// Per-state verification settings from the workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    pub strategy: ComparisonStrategy,
    pub tolerance: AnalysisTolerance,
    /// Verification window in minutes, 1..=240.
    pub time_duration_minutes: u32,
    /// Trailing window for predictive analysis; defaults to 30 minutes.
    #[serde(default)]
    pub predictive_history_minutes: Option<u32>,
}

impl GateSpec {
    pub fn predictive_history(&self) -> u32 {
        self.predictive_history_minutes
            .unwrap_or(DEFAULT_PREDICTIVE_HISTORY_MINUTES)
    }
}

// ── Baseline ─────────────────────────────────────────────────────────────

/// Where baseline telemetry comes from for this invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BaselineSource {
    /// A user pinned a specific previous execution.
    Pinned { execution_id: WorkflowExecutionId },
    /// Most recent successful execution with data, found automatically.
    Auto { execution_id: WorkflowExecutionId },
    /// No previous execution exists; this run's data becomes the baseline
    /// for the next one.
    NewBaseline,
    /// Baseline is the not-yet-upgraded nodes of the current deployment.
    CurrentDeployment,
    /// Baseline is a trailing historical window of the same nodes.
    TrailingWindow { minutes: u32 },
}

impl BaselineSource {
    /// Previous execution id, when the baseline is another execution.
    pub fn previous_execution_id(&self) -> Option<&WorkflowExecutionId> {
        match self {
            Self::Pinned { execution_id } | Self::Auto { execution_id } => Some(execution_id),
            _ => None,
        }
    }
}

// ── Analysis Context ─────────────────────────────────────────────────────

/// The unit of work for one verification gate invocation.
///
/// Built once, mutated never: baseline resolution happens inside the
/// builder, before the context is handed to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub account_id: AccountId,
    pub app_id: AppId,
    pub workflow_id: WorkflowId,
    pub workflow_execution_id: WorkflowExecutionId,
    pub state_execution_id: StateExecutionId,
    pub service_id: ServiceId,
    pub correlation_id: CorrelationId,
    pub test_nodes: NodeMap,
    pub control_nodes: NodeMap,
    pub strategy: ComparisonStrategy,
    pub tolerance: AnalysisTolerance,
    pub time_duration_minutes: u32,
    pub baseline: BaselineSource,
    pub provider_class: ProviderClass,
    /// Minute boundary (minutes since epoch) when collection starts.
    pub start_minute: i64,
    /// Strict-verification flag copied from the deployment context so the
    /// poll resumption does not need the deployment snapshot.
    pub strict_no_data: bool,
}

impl AnalysisContext {
    /// Final minute bucket the analysis must reach before the gate can
    /// judge the window. Fixed at build time.
    pub fn expected_minute(&self) -> u32 {
        self.time_duration_minutes
    }

    /// Nodes whose telemetry the collection tasks must fetch. With a
    /// previous-execution baseline only the canary nodes are collected
    /// (control data already exists); current-deployment comparisons
    /// collect both sides.
    pub fn nodes_to_collect(&self) -> NodeMap {
        let mut nodes = self.test_nodes.clone();
        if self.strategy == ComparisonStrategy::CompareWithCurrent {
            nodes.extend(
                self.control_nodes
                    .iter()
                    .map(|(node, group)| (node.clone(), group.clone())),
            );
        }
        nodes
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Outcome of context building: either a context ready for dispatch plus
/// the baseline message surfaced to dashboards, or an immediate verdict
/// that makes dispatch pointless.
#[derive(Debug, Clone)]
pub enum ContextOutcome {
    Ready {
        context: Box<AnalysisContext>,
        baseline_message: String,
    },
    ShortCircuit(Verdict),
}

/// Builds the [`AnalysisContext`] for one invocation. Stateless; building
/// is idempotent and touches nothing outside the result store reads.
pub struct ContextBuilder;

impl ContextBuilder {
    /// Assemble the analysis context per the configured strategy.
    ///
    /// Any node present in both resolved sets is removed from the control
    /// set: a node cannot be its own baseline.
    pub async fn build(
        deployment: &DeploymentContext,
        spec: &GateSpec,
        provider_class: ProviderClass,
        topology: &dyn TopologyResolver,
        store: &dyn ResultStore,
    ) -> Result<ContextOutcome, ContextBuildError> {
        let test_nodes = topology.resolve_test_nodes(deployment).await?;

        // With a previous-execution baseline the control side is historical
        // data, not live nodes.
        let mut control_nodes = if spec.strategy == ComparisonStrategy::CompareWithPrevious {
            NodeMap::new()
        } else {
            topology.resolve_control_nodes(deployment).await?
        };

        if test_nodes.is_empty() {
            warn!(
                state_execution_id = %deployment.state_execution_id,
                "could not find test nodes to compare"
            );
            return Ok(ContextOutcome::ShortCircuit(Verdict::success(
                "Could not find nodes to analyze. Skipping verification.",
            )));
        }

        if spec.strategy == ComparisonStrategy::CompareWithCurrent {
            if control_nodes == test_nodes {
                warn!(
                    state_execution_id = %deployment.state_execution_id,
                    "control and test nodes are identical; analysis would compare a node to itself"
                );
                return Ok(ContextOutcome::ShortCircuit(Verdict::failed(
                    "Insufficient baseline data: control and test nodes are identical \
                     (minimum two phases are required).",
                )));
            }
            strip_overlap(&mut control_nodes, &test_nodes);
            if control_nodes.is_empty() {
                info!(
                    state_execution_id = %deployment.state_execution_id,
                    "no nodes with the previous version found; skipping analysis"
                );
                return Ok(ContextOutcome::ShortCircuit(Verdict::success(
                    "Skipping analysis due to lack of baseline data \
                     (first-time deployment or last phase).",
                )));
            }
        } else {
            strip_overlap(&mut control_nodes, &test_nodes);
        }

        let (baseline, baseline_message) =
            Self::resolve_baseline(deployment, spec, provider_class, store).await?;

        let context = AnalysisContext {
            account_id: deployment.account_id.clone(),
            app_id: deployment.app_id.clone(),
            workflow_id: deployment.workflow_id.clone(),
            workflow_execution_id: deployment.workflow_execution_id.clone(),
            state_execution_id: deployment.state_execution_id.clone(),
            service_id: deployment.service_id.clone(),
            correlation_id: CorrelationId::generate(),
            test_nodes,
            control_nodes,
            strategy: spec.strategy,
            tolerance: spec.tolerance,
            time_duration_minutes: spec.time_duration_minutes,
            baseline,
            provider_class,
            start_minute: Utc::now().timestamp() / 60,
            strict_no_data: deployment.flags.strict_no_data,
        };

        Ok(ContextOutcome::Ready {
            context: Box::new(context),
            baseline_message,
        })
    }

    async fn resolve_baseline(
        deployment: &DeploymentContext,
        spec: &GateSpec,
        provider_class: ProviderClass,
        store: &dyn ResultStore,
    ) -> Result<(BaselineSource, String), ContextBuildError> {
        match spec.strategy {
            ComparisonStrategy::CompareWithCurrent => Ok((
                BaselineSource::CurrentDeployment,
                "Comparing against the current deployment's previous-version nodes.".to_string(),
            )),
            ComparisonStrategy::Predictive => Ok((
                BaselineSource::TrailingWindow { minutes: spec.predictive_history() },
                format!(
                    "Predictive analysis against a trailing {}-minute window.",
                    spec.predictive_history()
                ),
            )),
            ComparisonStrategy::CompareWithPrevious => {
                let pinned = store
                    .get_pinned_baseline(
                        &deployment.workflow_id,
                        &deployment.env_id,
                        &deployment.service_id,
                    )
                    .await?;

                if let Some(execution_id) = pinned {
                    info!(
                        state_execution_id = %deployment.state_execution_id,
                        baseline = %execution_id,
                        "baseline is pinned for the workflow"
                    );
                    return Ok((
                        BaselineSource::Pinned { execution_id },
                        "Baseline is pinned for the workflow. Analyzing against pinned baseline."
                            .to_string(),
                    ));
                }

                let auto = store
                    .get_last_successful_execution_with_data(
                        provider_class,
                        &deployment.app_id,
                        &deployment.service_id,
                        &deployment.workflow_id,
                    )
                    .await?;

                match auto {
                    Some(execution_id) => {
                        info!(
                            state_execution_id = %deployment.state_execution_id,
                            baseline = %execution_id,
                            "no pinned baseline; running with auto baseline"
                        );
                        Ok((
                            BaselineSource::Auto { execution_id },
                            "No baseline was set for the workflow. Running with auto baseline."
                                .to_string(),
                        ))
                    }
                    None => {
                        warn!(
                            state_execution_id = %deployment.state_execution_id,
                            "no previous execution found; this will be the baseline run"
                        );
                        Ok((
                            BaselineSource::NewBaseline,
                            "No previous execution found. This run will become the baseline."
                                .to_string(),
                        ))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedStore, ScriptedTopology};
    use cvg_common::GateStatus;

    fn deployment() -> DeploymentContext {
        DeploymentContext {
            account_id: AccountId::new("acct-1"),
            app_id: AppId::new("app-1"),
            workflow_id: WorkflowId::new("wf-1"),
            workflow_execution_id: WorkflowExecutionId::new("wfe-7"),
            state_execution_id: StateExecutionId::new("se-7"),
            service_id: ServiceId::new("svc-1"),
            env_id: EnvId::new("env-1"),
            license: LicenseTier::Enterprise,
            flags: FeatureFlags::default(),
        }
    }

    fn spec(strategy: ComparisonStrategy) -> GateSpec {
        GateSpec {
            strategy,
            tolerance: AnalysisTolerance::Medium,
            time_duration_minutes: 15,
            predictive_history_minutes: None,
        }
    }

    fn nodes(names: &[&str]) -> NodeMap {
        names
            .iter()
            .map(|n| (n.to_string(), "default".to_string()))
            .collect()
    }

    async fn build(
        strategy: ComparisonStrategy,
        topology: ScriptedTopology,
        store: ScriptedStore,
    ) -> ContextOutcome {
        ContextBuilder::build(
            &deployment(),
            &spec(strategy),
            ProviderClass::Metric,
            &topology,
            &store,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn overlapping_nodes_leave_control() {
        let topology = ScriptedTopology::new(
            nodes(&["host-1", "host-2"]),
            nodes(&["host-2", "host-3"]),
        );
        let outcome = build(
            ComparisonStrategy::CompareWithCurrent,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::Ready { context, .. } = outcome else {
            panic!("expected ready context");
        };
        assert_eq!(context.control_nodes, nodes(&["host-3"]));
        assert!(
            context
                .control_nodes
                .keys()
                .all(|n| !context.test_nodes.contains_key(n))
        );
    }

    #[tokio::test]
    async fn identical_sets_fail_fast() {
        let topology = ScriptedTopology::new(nodes(&["host-1"]), nodes(&["host-1"]));
        let outcome = build(
            ComparisonStrategy::CompareWithCurrent,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::ShortCircuit(verdict) = outcome else {
            panic!("expected short circuit");
        };
        assert_eq!(verdict.status, GateStatus::Failed);
        assert!(verdict.message.contains("Insufficient baseline data"));
    }

    #[tokio::test]
    async fn empty_control_with_current_strategy_skips() {
        let topology = ScriptedTopology::new(nodes(&["host-1"]), NodeMap::new());
        let outcome = build(
            ComparisonStrategy::CompareWithCurrent,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::ShortCircuit(verdict) = outcome else {
            panic!("expected short circuit");
        };
        assert_eq!(verdict.status, GateStatus::Success);
        assert!(verdict.message.contains("lack of baseline data"));
    }

    #[tokio::test]
    async fn empty_test_nodes_skip_verification() {
        let topology = ScriptedTopology::new(NodeMap::new(), nodes(&["host-1"]));
        let outcome = build(
            ComparisonStrategy::CompareWithCurrent,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::ShortCircuit(verdict) = outcome else {
            panic!("expected short circuit");
        };
        assert_eq!(verdict.status, GateStatus::Success);
        assert!(verdict.message.contains("Could not find nodes"));
    }

    #[tokio::test]
    async fn pinned_baseline_wins_over_auto() {
        let store = ScriptedStore::default()
            .with_pinned_baseline(WorkflowExecutionId::new("pinned-1"))
            .with_last_successful(WorkflowExecutionId::new("auto-1"));
        let topology = ScriptedTopology::new(nodes(&["host-1"]), NodeMap::new());
        let outcome = build(ComparisonStrategy::CompareWithPrevious, topology, store).await;
        let ContextOutcome::Ready { context, baseline_message } = outcome else {
            panic!("expected ready context");
        };
        assert_eq!(
            context.baseline.previous_execution_id(),
            Some(&WorkflowExecutionId::new("pinned-1"))
        );
        assert!(baseline_message.contains("pinned"));
    }

    #[tokio::test]
    async fn auto_baseline_when_nothing_pinned() {
        let store =
            ScriptedStore::default().with_last_successful(WorkflowExecutionId::new("auto-1"));
        let topology = ScriptedTopology::new(nodes(&["host-1"]), NodeMap::new());
        let outcome = build(ComparisonStrategy::CompareWithPrevious, topology, store).await;
        let ContextOutcome::Ready { context, baseline_message } = outcome else {
            panic!("expected ready context");
        };
        assert_eq!(
            context.baseline.previous_execution_id(),
            Some(&WorkflowExecutionId::new("auto-1"))
        );
        assert!(baseline_message.contains("auto baseline"));
    }

    #[tokio::test]
    async fn no_history_means_new_baseline() {
        let topology = ScriptedTopology::new(nodes(&["host-1"]), NodeMap::new());
        let outcome = build(
            ComparisonStrategy::CompareWithPrevious,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::Ready { context, baseline_message } = outcome else {
            panic!("expected ready context");
        };
        assert_eq!(context.baseline, BaselineSource::NewBaseline);
        assert!(context.baseline.previous_execution_id().is_none());
        assert!(baseline_message.contains("baseline"));
    }

    #[tokio::test]
    async fn predictive_baseline_is_trailing_window() {
        let topology = ScriptedTopology::new(nodes(&["host-1"]), NodeMap::new());
        let outcome = build(
            ComparisonStrategy::Predictive,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::Ready { context, .. } = outcome else {
            panic!("expected ready context");
        };
        assert_eq!(context.baseline, BaselineSource::TrailingWindow { minutes: 30 });
    }

    #[tokio::test]
    async fn previous_strategy_collects_test_nodes_only() {
        let topology = ScriptedTopology::new(nodes(&["host-1"]), nodes(&["ignored"]));
        let outcome = build(
            ComparisonStrategy::CompareWithPrevious,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::Ready { context, .. } = outcome else {
            panic!("expected ready context");
        };
        assert!(context.control_nodes.is_empty());
        assert_eq!(context.nodes_to_collect(), nodes(&["host-1"]));
    }

    #[tokio::test]
    async fn current_strategy_collects_both_sides() {
        let topology = ScriptedTopology::new(nodes(&["host-1"]), nodes(&["host-2"]));
        let outcome = build(
            ComparisonStrategy::CompareWithCurrent,
            topology,
            ScriptedStore::default(),
        )
        .await;
        let ContextOutcome::Ready { context, .. } = outcome else {
            panic!("expected ready context");
        };
        assert_eq!(context.nodes_to_collect(), nodes(&["host-1", "host-2"]));
    }
}
