use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use gatekeeper_consensus::{
    scenario, ActionOutcome, ChannelSink, ConsensusSession, EventSink, NetworkConfig, NodeId,
    RoundResult, ScenarioReport, ScenarioStep, VoteValue,
};
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "gatekeeper_admin")]
#[command(about = "Gatekeeper door-lock consensus simulator", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fault-tolerance parameter f (network of 3f + 1 nodes)
    #[arg(long, global = true)]
    fault_tolerance: Option<usize>,

    /// Seed for the network RNG
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Stream every consensus event as a JSON line
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session end to end
    Scenario {
        #[arg(value_enum)]
        kind: ScenarioKind,
    },

    /// Run one consensus round after applying faults
    Round {
        #[arg(long, value_enum, default_value = "open")]
        value: DoorArg,

        /// Crash a node before the round (repeatable)
        #[arg(long)]
        crash: Vec<NodeId>,

        /// Corrupt a node before the round (repeatable)
        #[arg(long)]
        corrupt: Vec<NodeId>,
    },

    /// Print the effective network configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScenarioKind {
    Restoration,
    Attack,
    Sabotage,
}

#[derive(Clone, Copy, ValueEnum)]
enum DoorArg {
    Open,
    Locked,
}

impl From<DoorArg> for VoteValue {
    fn from(arg: DoorArg) -> Self {
        match arg {
            DoorArg::Open => VoteValue::Open,
            DoorArg::Locked => VoteValue::Locked,
        }
    }
}

/// Defaults, then the config file, then GATEKEEPER_* variables, then flags.
fn load_config(cli: &Cli) -> Result<NetworkConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = &cli.config {
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    builder = builder.add_source(config::Environment::with_prefix("GATEKEEPER"));

    let mut network: NetworkConfig = builder
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("invalid configuration")?;

    if let Some(f) = cli.fault_tolerance {
        network.fault_tolerance = f;
    }
    if let Some(seed) = cli.seed {
        network.seed = seed;
    }
    network.validate()?;
    Ok(network)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_round(result: &RoundResult) {
    match (&result.agreed_value, &result.reason) {
        (Some(value), _) => println!(
            "round {}: CONSENSUS {} ({} decided, open={} locked={} undecided={})",
            result.round,
            value,
            result.decided_nodes,
            result.votes.open,
            result.votes.locked,
            result.votes.undecided
        ),
        (None, Some(reason)) => println!("round {}: FAILED {}", result.round, reason),
        (None, None) => println!("round {}: FAILED", result.round),
    }
}

fn print_action(label: &str, outcome: &ActionOutcome) {
    let status = if outcome.success { "ok" } else { "rejected" };
    println!("{}: {} ({})", label, outcome.message, status);
    if outcome.attack_detected {
        let names: Vec<&str> = outcome.attack_signals.iter().map(|s| s.as_str()).collect();
        println!("  ATTACK DETECTED: {}", names.join(", "));
    }
}

fn print_report(report: &ScenarioReport) {
    println!("== scenario {} ==", report.name);
    for step in &report.steps {
        match step {
            ScenarioStep::Action { label, outcome } => print_action(label, outcome),
            ScenarioStep::Round { result } => print_round(result),
            ScenarioStep::SecurityLevel { level } => println!("security level: {}", level),
        }
    }
    println!(
        "door {} | failsafe {} | level {}",
        report.final_door_state,
        if report.failsafe_active { "ACTIVE" } else { "inactive" },
        report.security_level
    );
}

/// Subscribers for `--events`: a channel sink plus the task printing it.
/// The task ends once every clone of the sink has been dropped.
fn event_printer(events: bool) -> (Vec<Arc<dyn EventSink>>, Option<JoinHandle<()>>) {
    if !events {
        return (Vec::new(), None);
    }
    let (sink, mut rx) = ChannelSink::new();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("failed to encode event: {}", e),
            }
        }
    });
    (vec![Arc::new(sink)], Some(handle))
}

async fn finish_events(
    sinks: Vec<Arc<dyn EventSink>>,
    printer: Option<JoinHandle<()>>,
) -> Result<()> {
    drop(sinks);
    if let Some(handle) = printer {
        handle.await.context("event printer task failed")?;
    }
    Ok(())
}

async fn run_scenario(
    network: NetworkConfig,
    kind: ScenarioKind,
    json: bool,
    events: bool,
) -> Result<()> {
    info!("running scenario with f={}", network.fault_tolerance);
    let (sinks, printer) = event_printer(events);
    let report = match kind {
        ScenarioKind::Restoration => scenario::restoration(network, &sinks)?,
        ScenarioKind::Attack => scenario::byzantine_attack(network, &sinks)?,
        ScenarioKind::Sabotage => scenario::sabotage(network, &sinks)?,
    };
    finish_events(sinks, printer).await?;

    if json {
        print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}

async fn run_round(
    network: NetworkConfig,
    value: VoteValue,
    crash: &[NodeId],
    corrupt: &[NodeId],
    json: bool,
    events: bool,
) -> Result<()> {
    let mut session = ConsensusSession::initialize(network)?;
    let (sinks, printer) = event_printer(events);
    for sink in &sinks {
        session.subscribe(Arc::clone(sink));
    }

    let mut outcomes = Vec::new();
    for &id in crash {
        outcomes.push((format!("crash {}", id), session.crash(id)));
    }
    for &id in corrupt {
        outcomes.push((format!("corrupt {}", id), session.corrupt(id)));
    }
    let result = session.run_consensus_round(value);

    // Dropping the session closes the event channel.
    drop(session);
    finish_events(sinks, printer).await?;

    if json {
        print_json(&serde_json::json!({
            "actions": outcomes.iter().map(|(label, outcome)| {
                serde_json::json!({ "label": label, "outcome": outcome })
            }).collect::<Vec<_>>(),
            "result": result,
        }))
    } else {
        for (label, outcome) in &outcomes {
            print_action(label, outcome);
        }
        print_round(&result);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let network = load_config(&cli)?;

    match &cli.command {
        Commands::Scenario { kind } => {
            run_scenario(network, *kind, cli.json, cli.events).await?;
        }
        Commands::Round {
            value,
            crash,
            corrupt,
        } => {
            run_round(
                network,
                VoteValue::from(*value),
                crash,
                corrupt,
                cli.json,
                cli.events,
            )
            .await?;
        }
        Commands::Config => print_json(&network)?,
    }

    Ok(())
}
