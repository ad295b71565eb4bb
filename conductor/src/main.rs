//! Operator CLI over the persisted job state store.
//!
//! The driving command that starts jobs lives elsewhere; this binary only
//! inspects what the orchestrator persisted: job summaries and the
//! append-only checkpoint log.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use conductor::{FileStateStore, JobReport};

#[derive(Parser)]
#[command(name = "conductor", about = "Inspect persisted orchestration jobs")]
struct Cli {
    /// Root directory of the job state store.
    #[arg(long, default_value = ".conductor")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List jobs present in the state store.
    Jobs,
    /// Print the final summary of a job.
    Inspect { job_id: String },
    /// Dump a job's checkpoint log.
    Checkpoints {
        job_id: String,
        /// Only show the last N checkpoints.
        #[arg(long)]
        tail: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = FileStateStore::open(&cli.state_dir)
        .with_context(|| format!("opening state store at {}", cli.state_dir.display()))?;

    match cli.command {
        Command::Jobs => {
            for job_id in store.list_jobs()? {
                println!("{job_id}");
            }
        }
        Command::Inspect { job_id } => {
            let state = store
                .load_state(&job_id)?
                .with_context(|| format!("no state document for job {job_id}"))?;
            let dispatched = state
                .tasks
                .values()
                .filter(|p| p.attempts > 0 || p.status.is_terminal())
                .count();
            let report = JobReport::from_state(&state, 0, dispatched, Vec::new(), true);
            print!("{report}");
        }
        Command::Checkpoints { job_id, tail } => {
            let envelopes = store.read_checkpoints(&job_id)?;
            let skip = tail
                .map(|n| envelopes.len().saturating_sub(n))
                .unwrap_or(0);
            for envelope in &envelopes[skip..] {
                println!(
                    "{:>6}  {}  {}",
                    envelope.seq,
                    envelope.timestamp.to_rfc3339(),
                    serde_json::to_string(&envelope.checkpoint)?
                );
            }
        }
    }

    Ok(())
}
