//! Cron type system — schedule, payload, job state, and id allocation.
//!
//! Jobs persist as a JSON array in `<workspace>/jobs.json` with
//! `camelCase` keys. Job ids follow `job_<n>`; the id `cli` is reserved
//! for the job created from the command line.

use serde::{Deserialize, Serialize};

/// Reserved id for the CLI-created job.
pub const CLI_JOB_ID: &str = "cli";

// ─────────────────────────────────────────────
// Schedule
// ─────────────────────────────────────────────

/// Schedule variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    /// One-shot: fire at a specific timestamp.
    At,
    /// Interval: fire every N milliseconds.
    Every,
    /// Standard 5-field cron expression, stored opaquely. Expression
    /// evaluation is delegated to external tooling; such jobs persist but
    /// never self-arm.
    Cron,
}

/// When a job fires.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    pub kind: ScheduleKind,
    /// One-shot timestamp (Unix epoch milliseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_ms: Option<i64>,
    /// Interval in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub every_ms: Option<i64>,
    /// 5-field cron expression (e.g. `"0 9 * * *"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

impl CronSchedule {
    pub fn at(at_ms: i64) -> Self {
        Self {
            kind: ScheduleKind::At,
            at_ms: Some(at_ms),
            every_ms: None,
            expr: None,
        }
    }

    pub fn every(every_ms: i64) -> Self {
        Self {
            kind: ScheduleKind::Every,
            at_ms: None,
            every_ms: Some(every_ms),
            expr: None,
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            kind: ScheduleKind::Cron,
            at_ms: None,
            every_ms: None,
            expr: Some(expr.into()),
        }
    }
}

/// Compute the next run time after `now_ms`, or `None` when the schedule
/// cannot self-arm.
pub fn compute_next_run_from(schedule: &CronSchedule, now_ms: i64) -> Option<i64> {
    match schedule.kind {
        // A past one-shot still fires: it runs at the next tick.
        ScheduleKind::At => schedule.at_ms,
        ScheduleKind::Every => schedule.every_ms.map(|e| now_ms + e.max(1)),
        ScheduleKind::Cron => None,
    }
}

// ─────────────────────────────────────────────
// Payload / state / job
// ─────────────────────────────────────────────

/// What a job does when it fires.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPayload {
    /// Prompt text handed to the agent.
    #[serde(default)]
    pub message: String,
    /// Session the run is attributed to; empty means the shared cron
    /// session.
    #[serde(default)]
    pub session_id: String,
}

/// Run status of a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
}

/// Mutable run state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A scheduled job.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    /// `job_<n>`, or [`CLI_JOB_ID`].
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    #[serde(default)]
    pub state: CronJobState,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
}

fn default_true() -> bool {
    true
}

/// Allocate the next `job_<n>` id, one past the highest existing.
pub fn next_job_id(jobs: &[CronJob]) -> String {
    let max = jobs
        .iter()
        .filter_map(|j| j.id.strip_prefix("job_"))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("job_{}", max + 1)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
