//! settle CLI: replays an optimistic-update script against the simulated server.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use settle_core::observability::QueueCounts;
use settle_core::sim::{CallOptions, JournalEntry, Operation, SimulatedServer};
use settle_core::{Action, BoxError, Queue, QueueConfig, Resolution, RunMode, TaskOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "settle", about = "Optimistic update queue playground")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a script of calls to one queue and report how they settled
    Run {
        /// JSON queue config (label, run_mode)
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON script; a built-in scenario runs when omitted
        #[arg(long)]
        script: Option<PathBuf>,
        /// Submit everything first, then drain as one batch
        #[arg(long)]
        manual: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    initial: i64,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
struct Step {
    key: String,
    name: String,
    op: Operation,
    amount: i64,
    #[serde(flatten)]
    call: CallOptions,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    waits_for: Option<Vec<String>>,
    #[serde(default)]
    can_replace: bool,
}

/// Overlapping adds that settle out of order; the update is cancelled by a failed add.
const DEFAULT_SCRIPT: &str = r#"{
  "initial": 0,
  "steps": [
    { "key": "1", "name": "add", "op": "add", "amount": 1, "delay_ms": 400,
      "waits_for": ["update"] },
    { "key": "2", "name": "add", "op": "add", "amount": 2, "delay_ms": 100,
      "waits_for": ["update"] },
    { "key": "3", "name": "add", "op": "add", "amount": 1, "delay_ms": 50, "fails": true,
      "waits_for": ["update"] },
    { "key": "4", "name": "update", "op": "update", "amount": 5, "delay_ms": 100,
      "depends_on": ["add"], "waits_for": ["update"], "can_replace": true },
    { "key": "5", "name": "add", "op": "add", "amount": 1, "delay_ms": 200,
      "waits_for": ["update"] },
    { "key": "6", "name": "add", "op": "add", "amount": 1, "delay_ms": 100,
      "waits_for": ["update"] }
  ]
}"#;

/// One script step bound to the server it calls.
struct StepCall {
    server: SimulatedServer,
    step: Step,
}

#[async_trait]
impl Action<i64> for StepCall {
    async fn run(self: Box<Self>) -> Result<i64, BoxError> {
        let StepCall { server, step } = *self;
        info!(key = %step.key, op = ?step.op, amount = step.amount, "calling server");
        Ok(server.call(&step.key, step.op, step.amount, step.call).await?)
    }
}

#[derive(Debug, Serialize)]
struct StepOutcome {
    key: String,
    outcome: String,
}

#[derive(Debug, Serialize)]
struct Report {
    label: String,
    server_total: i64,
    optimistic: i64,
    outcomes: Vec<StepOutcome>,
    journal: Vec<JournalEntry>,
    counts: QueueCounts,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            script,
            manual,
        } => cmd_run(config.as_deref(), script.as_deref(), manual).await,
    }
}

async fn cmd_run(
    config: Option<&Path>,
    script: Option<&Path>,
    manual: bool,
) -> Result<(), BoxError> {
    // (A) config + script
    let mut config = match config {
        Some(path) => QueueConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => QueueConfig::default(),
    };
    if manual {
        config.run_mode = RunMode::Manual;
    }
    let script: Script = match script {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::from_str(DEFAULT_SCRIPT)?,
    };

    // (B) queue, server and the optimistic view
    let queue: Queue<i64> = Queue::new(config);
    let server = SimulatedServer::new(script.initial);
    let optimistic = Arc::new(Mutex::new(script.initial));
    info!(
        label = %queue.config().label,
        mode = ?queue.config().run_mode,
        steps = script.steps.len(),
        "submitting script"
    );

    // (C) submit every step
    let mut submissions = Vec::with_capacity(script.steps.len());
    for step in script.steps {
        let key = step.key.clone();
        submissions.push((key, queue.add(task_options(&server, step, &optimistic))));
    }

    // (D) drain (manual) and wait until idle
    queue.run().await;

    let mut outcomes = Vec::with_capacity(submissions.len());
    for (key, submission) in submissions {
        let outcome = match submission.await {
            Ok(Resolution::Value(value)) => format!("value {value}"),
            Ok(Resolution::Superseded) => "superseded".to_string(),
            Err(err) => format!("error: {err}"),
        };
        outcomes.push(StepOutcome { key, outcome });
    }

    let report = Report {
        label: queue.config().label.clone(),
        server_total: server.total(),
        optimistic: *optimistic.lock().unwrap_or_else(|e| e.into_inner()),
        outcomes,
        journal: server.journal(),
        counts: queue.counts_by_state(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn task_options(
    server: &SimulatedServer,
    step: Step,
    optimistic: &Arc<Mutex<i64>>,
) -> TaskOptions<i64> {
    let on_complete = Arc::clone(optimistic);
    let on_error = Arc::clone(optimistic);
    let mut options = TaskOptions::from_action(
        step.name.clone(),
        Box::new(StepCall {
            server: server.clone(),
            step: step.clone(),
        }),
    )
    .depends_on(step.depends_on)
    .can_replace(step.can_replace)
    .on_complete(move |value, ctx| {
        if ctx.is_final {
            *on_complete.lock().unwrap_or_else(|e| e.into_inner()) = *value;
        }
    })
    .on_error(move |_, ctx| {
        if let (true, Some(last)) = (ctx.is_final, ctx.last_value) {
            *on_error.lock().unwrap_or_else(|e| e.into_inner()) = last;
        }
    });
    if let Some(waits_for) = step.waits_for {
        options = options.waits_for(waits_for);
    }
    options
}
