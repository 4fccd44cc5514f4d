//! `procguardctl`: the only executable surface this crate ships. It is not
//! an HTTP server — request routing is an external collaborator's job
//! (§1 Non-goals) — it exposes three operational commands: applying
//! migrations (opt-in, never implicit), a readiness check suitable for a
//! liveness probe, and a scripted-trace simulator that drives the
//! Lifecycle Engine against an in-memory ledger and prints what it wrote.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use procguard_core::config::{Config, LogFormat};
use procguard_core::engine::{ActionRequest, LifecycleEngine};
use procguard_core::model::{Procedure, Sop};
use procguard_core::role::{BatchEventType, Role};
use procguard_store::{MemoryRepository, PostgresRepository};

#[derive(Parser)]
#[command(name = "procguardctl")]
#[command(about = "Operational CLI for the ProcGuard immutable-ledger manufacturing lifecycle engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Applies pending schema migrations. Refuses to run unless --yes is
    /// passed, mirroring the mandatory opt-in on MIGRATE_ON_START (§6).
    Migrate {
        #[arg(long)]
        yes: bool,
    },
    /// Connects to the configured database and runs a trivial readiness
    /// query; exits non-zero if the ledger is unreachable.
    ServeReadinessCheck,
    /// Replays a scripted JSON trace of batch actions against the
    /// Lifecycle Engine backed by an in-memory ledger, then prints the
    /// resulting events, violations, and audit rows.
    Simulate {
        /// Path to a JSON trace file (see `TraceFile` for the schema).
        trace: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
    );
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Migrate { yes } => {
            let config = Config::from_env().context("loading configuration")?;
            init_tracing(config.log_format);
            if !yes {
                error!("refusing to run migrations without --yes (migrations are opt-in, never implicit)");
                anyhow::bail!("pass --yes to confirm you want to apply migrations");
            }
            let repo = PostgresRepository::connect(&config.database_url)
                .await
                .context("connecting to the ledger database")?;
            repo.run_migrations().await.context("applying migrations")?;
            info!("migrations applied");
        }
        Command::ServeReadinessCheck => {
            let config = Config::from_env().context("loading configuration")?;
            init_tracing(config.log_format);
            match PostgresRepository::connect(&config.database_url).await {
                Ok(_) => {
                    info!("ledger reachable");
                }
                Err(e) => {
                    error!(error = %e, "ledger unreachable");
                    anyhow::bail!("readiness check failed: {e}");
                }
            }
        }
        Command::Simulate { trace } => {
            init_tracing(LogFormat::Compact);
            run_simulation(&trace).await?;
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct TraceFile {
    procedure: Procedure,
    batch_id: String,
    #[serde(default)]
    sops: Vec<Sop>,
    actions: Vec<TraceAction>,
}

#[derive(Debug, Deserialize)]
struct TraceAction {
    event: String,
    actor: String,
    role: String,
    #[serde(default)]
    step_id: Option<String>,
    #[serde(default)]
    requested_procedure_version: Option<i32>,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn run_simulation(trace_path: &PathBuf) -> Result<()> {
    let raw = fs::read_to_string(trace_path)
        .with_context(|| format!("reading trace file {}", trace_path.display()))?;
    let trace: TraceFile = serde_json::from_str(&raw).context("parsing trace file")?;

    procguard_core::model::validate_procedure_structure(&trace.procedure)
        .map_err(|e| anyhow::anyhow!("trace procedure is structurally invalid: {e}"))?;

    let repo = MemoryRepository::new();
    repo.seed_procedure(trace.procedure.clone()).await;
    for sop in trace.sops {
        repo.seed_sop(sop).await;
    }
    repo.seed_batch(procguard_core::model::Batch {
        batch_id: trace.batch_id.clone(),
        procedure_id: trace.procedure.procedure_id.clone(),
        procedure_version: trace.procedure.version,
        current_state: procguard_core::fsm::BatchState::Created,
        created_at: Utc::now(),
    })
    .await;

    let engine = LifecycleEngine::new(repo.clone());

    for action in trace.actions {
        let event: BatchEventType = action
            .event
            .parse()
            .map_err(|e: procguard_core::error::ProcGuardError| anyhow::anyhow!(e.to_string()))?;
        let role: Role = action
            .role
            .parse()
            .map_err(|e: procguard_core::error::ProcGuardError| anyhow::anyhow!(e.to_string()))?;

        let request = ActionRequest {
            batch_id: trace.batch_id.clone(),
            event,
            actor: action.actor.clone(),
            role,
            requested_procedure_version: action
                .requested_procedure_version
                .unwrap_or(trace.procedure.version),
            step_id: action.step_id.clone(),
            payload: action.payload.clone(),
            now: Utc::now(),
        };

        match engine.handle(request).await {
            Ok(outcome) => {
                info!(event = %action.event, actor = %action.actor, new_state = %outcome.new_state, "accepted");
            }
            Err(e) => {
                info!(event = %action.event, actor = %action.actor, error = %e, "denied");
            }
        }
    }

    let batch = repo.batch(&trace.batch_id).await;
    let events = repo.batch_events(&trace.batch_id).await;
    let violations = repo.violations().await;
    let audits = repo.audit_logs().await;

    let report = json!({
        "batch": batch,
        "events": events,
        "violations": violations,
        "audit_logs": audits,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
