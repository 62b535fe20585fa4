//! Continuous Verification Gate - Scenario Simulator
//!
//! Drives one complete gate invocation against scripted in-memory
//! collaborators: a fixed topology, a pre-baked analysis result, and a
//! simulated worker fleet that completes every dispatched batch. Useful
//! for demos and for poking at gate behavior without a platform around it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cvg_common::{
    AccountId, AnalysisSummary, AnalysisTolerance, AppId, ComparisonStrategy, DEFAULT_GROUP_NAME,
    EngineConfig, EnvId, LicenseTier, NodeMap, ProviderClass, RiskLevel, ServiceId,
    StateExecutionId, Verdict, WorkflowExecutionId, WorkflowId,
};
use cvg_engine::testing::{
    RecordingSink, RecordingTransport, ScriptedStore, ScriptedTopology, StaticAdapter,
};
use cvg_engine::{DeploymentContext, ExecutionResponse, FeatureFlags, GateController, GateSpec};

#[derive(Parser)]
#[command(name = "cvg-sim")]
#[command(author, version, about = "Verification gate scenario simulator")]
struct Cli {
    /// Path to the scenario TOML file
    scenario: PathBuf,

    /// Poll interval override (e.g. "10ms", "2s")
    #[arg(long, default_value = "50ms")]
    poll_interval: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

// ── Scenario file ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Scenario {
    name: String,
    gate: GateSection,
    topology: TopologySection,
    provider: ProviderSection,
    /// Scripted analysis outcome; omit for a no-data window.
    analysis: Option<AnalysisSection>,
    #[serde(default)]
    flags: FlagsSection,
}

#[derive(Debug, Deserialize)]
struct GateSection {
    strategy: ComparisonStrategy,
    tolerance: AnalysisTolerance,
    duration_minutes: u32,
}

#[derive(Debug, Deserialize)]
struct TopologySection {
    #[serde(default)]
    test_nodes: Vec<String>,
    #[serde(default)]
    control_nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderSection {
    class: ProviderClass,
    connector: String,
    #[serde(default)]
    per_minute: bool,
}

#[derive(Debug, Deserialize)]
struct AnalysisSection {
    risk: RiskLevel,
    /// Minute the scripted summary reports; defaults to the full window.
    minute: Option<u32>,
    #[serde(default)]
    empty: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct FlagsSection {
    #[serde(default)]
    demo_mode: bool,
    #[serde(default)]
    strict_no_data: bool,
    #[serde(default)]
    per_minute_collection: bool,
}

fn node_map(names: &[String]) -> NodeMap {
    names
        .iter()
        .map(|n| (n.clone(), DEFAULT_GROUP_NAME.to_string()))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let raw = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading scenario {}", cli.scenario.display()))?;
    let scenario: Scenario = toml::from_str(&raw)
        .with_context(|| format!("parsing scenario {}", cli.scenario.display()))?;

    let poll_interval = humantime::parse_duration(&cli.poll_interval)
        .context("invalid --poll-interval")?;

    info!(scenario = %scenario.name, "starting gate simulation");

    let verdict = run_scenario(&scenario, poll_interval).await?;
    println!("{}: {}", scenario.name, verdict);
    Ok(())
}

async fn run_scenario(
    scenario: &Scenario,
    poll_interval: std::time::Duration,
) -> Result<Verdict> {
    let topology = ScriptedTopology::new(
        node_map(&scenario.topology.test_nodes),
        node_map(&scenario.topology.control_nodes),
    );

    let mut store = ScriptedStore::default();
    if let Some(analysis) = &scenario.analysis {
        store = store.with_summary(AnalysisSummary {
            analysis_minute: analysis.minute.unwrap_or(scenario.gate.duration_minutes),
            risk_level: analysis.risk,
            empty_result: analysis.empty,
            message: analysis.message.clone(),
        });
    }

    let transport = RecordingTransport::default();
    let sink = RecordingSink::default();
    let config = EngineConfig { poll_interval, ..EngineConfig::default() };
    config.validate().context("engine configuration")?;
    let controller = GateController::new(
        config,
        Arc::new(topology),
        Arc::new(transport.clone()),
        Arc::new(store),
        Arc::new(sink.clone()),
    );

    let deployment = DeploymentContext {
        account_id: AccountId::new("sim-account"),
        app_id: AppId::new("sim-app"),
        workflow_id: WorkflowId::new("sim-workflow"),
        workflow_execution_id: WorkflowExecutionId::new("sim-execution"),
        state_execution_id: StateExecutionId::new("sim-state"),
        service_id: ServiceId::new("sim-service"),
        env_id: EnvId::new("sim-env"),
        license: LicenseTier::Enterprise,
        flags: FeatureFlags {
            demo_mode: scenario.flags.demo_mode,
            strict_no_data: scenario.flags.strict_no_data,
            per_minute_collection: scenario.flags.per_minute_collection,
        },
    };
    let spec = GateSpec {
        strategy: scenario.gate.strategy,
        tolerance: scenario.gate.tolerance,
        time_duration_minutes: scenario.gate.duration_minutes,
        predictive_history_minutes: None,
    };
    let mut adapter =
        StaticAdapter::new(scenario.provider.class, scenario.provider.connector.clone());
    if scenario.provider.per_minute {
        adapter = adapter.per_minute();
    }

    let response = controller.execute(&deployment, &spec, &adapter).await;

    let (correlation_id, message) = match response {
        ExecutionResponse::Completed(verdict) => {
            info!("gate resolved without dispatch");
            return Ok(verdict);
        }
        ExecutionResponse::Suspended { correlation_id, overall_timeout, message } => {
            info!(
                correlation_id = %correlation_id,
                timeout = %humantime::format_duration(overall_timeout),
                "gate suspended awaiting collection"
            );
            (correlation_id, message)
        }
    };
    info!(status = %message, "gate running");

    // Play the worker fleet: every dispatched batch completes in order.
    let record = controller.dispatch_record(&correlation_id).await;
    let verdict = match record {
        Some(record) => {
            info!(batches = record.tasks.len(), "simulating batch completions");
            let mut verdict = None;
            for task in &record.tasks {
                verdict = controller
                    .on_task_completion(&correlation_id, &task.wait_id, true)
                    .await;
            }
            verdict
        }
        None => {
            info!("per-minute collection; simulating scheduler notify");
            controller
                .on_collection_notify(&deployment.state_execution_id)
                .await
        }
    };

    match verdict {
        Some(verdict) => Ok(verdict),
        None => {
            warn!("simulation ended without a verdict");
            bail!("gate did not resolve; sink reports {:?}", sink.terminal_status());
        }
    }
}
