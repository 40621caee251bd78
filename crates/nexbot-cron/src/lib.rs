//! Scheduled jobs for Nexbot: persisted definitions and an async timer
//! that feeds the worker pool.

pub mod service;
pub mod types;

pub use service::{CronService, CRON_TASK_TYPE};
pub use types::{
    compute_next_run_from, CronJob, CronPayload, CronSchedule, JobStatus, ScheduleKind, CLI_JOB_ID,
};
