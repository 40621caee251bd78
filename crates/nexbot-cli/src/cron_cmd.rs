//! `nexbot cron` — manage scheduled jobs from the CLI.
//!
//! Operates directly on `<workspace>/jobs.json`; the gateway picks up
//! changes at its next start.

use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;

use nexbot_core::config::load_config;
use nexbot_core::pool::WorkerPool;
use nexbot_cron::{CronPayload, CronSchedule, CronService};

use crate::helpers;

/// Cron subcommands.
#[derive(Subcommand)]
pub enum CronCommands {
    /// List scheduled jobs
    List,

    /// Add a new scheduled job
    Add {
        /// Job name
        #[arg(short, long)]
        name: String,

        /// Prompt message for the agent
        #[arg(short, long)]
        message: String,

        /// Run every N seconds (interval schedule)
        #[arg(short, long)]
        every: Option<u64>,

        /// Cron expression, e.g. "0 9 * * *" (stored for external tooling)
        #[arg(short, long)]
        cron: Option<String>,
    },

    /// Remove a scheduled job by ID
    Remove {
        /// Job ID (e.g. "job_3")
        job_id: String,
    },
}

/// Dispatch a cron subcommand.
pub async fn dispatch(cmd: CronCommands) -> Result<()> {
    match cmd {
        CronCommands::List => list_jobs().await,
        CronCommands::Add {
            name,
            message,
            every,
            cron,
        } => add_job(name, message, every, cron).await,
        CronCommands::Remove { job_id } => remove_job(&job_id).await,
    }
}

/// Service over the configured store path. The pool is never started:
/// CLI operations only touch the job file.
fn make_service() -> CronService {
    let config = load_config(None);
    let workspace = helpers::expand_tilde(&config.workspace);
    CronService::new(workspace.join("jobs.json"), Arc::new(WorkerPool::new(1, 1)))
}

async fn list_jobs() -> Result<()> {
    let service = make_service();
    service.load().await?;
    let jobs = service.list_jobs().await;

    if jobs.is_empty() {
        println!("No scheduled jobs.");
        return Ok(());
    }

    for job in jobs {
        let state = if job.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        let next = job
            .state
            .next_run_at_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {}  [{}]  next: {}  \"{}\"",
            job.id.bold(),
            job.name,
            state,
            next,
            job.payload.message
        );
    }
    Ok(())
}

async fn add_job(
    name: String,
    message: String,
    every: Option<u64>,
    cron: Option<String>,
) -> Result<()> {
    let schedule = match (every, cron) {
        (Some(secs), None) => CronSchedule::every((secs as i64) * 1000),
        (None, Some(expr)) => CronSchedule::cron(expr),
        _ => anyhow::bail!("specify exactly one of --every or --cron"),
    };

    let service = make_service();
    service.load().await?;
    let id = service
        .add_job(
            name,
            schedule,
            CronPayload {
                message,
                session_id: String::new(),
            },
        )
        .await?;
    println!("Added job {}", id.bold());
    Ok(())
}

async fn remove_job(job_id: &str) -> Result<()> {
    let service = make_service();
    service.load().await?;
    if service.remove_job(job_id).await? {
        println!("Removed job {}", job_id.bold());
    } else {
        println!("No job with id {job_id}");
    }
    Ok(())
}
