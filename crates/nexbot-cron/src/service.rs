//! Cron service — persistence and the firing timer.
//!
//! The timer sleeps until the nearest `next_run_at_ms`, wakes on job
//! mutations, and fires due jobs by submitting `cron` tasks to the worker
//! pool. Execution itself happens in the pool's registered executor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nexbot_core::pool::{Task, WorkerPool};

use crate::types::{
    compute_next_run_from, next_job_id, CronJob, CronJobState, CronPayload, CronSchedule,
    JobStatus, ScheduleKind, CLI_JOB_ID,
};

/// Task type tag for pool submissions.
pub const CRON_TASK_TYPE: &str = "cron";

/// Idle sleep when no job is armed (re-arm wakes the timer sooner).
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

// ─────────────────────────────────────────────
// CronService
// ─────────────────────────────────────────────

pub struct CronService {
    /// `<workspace>/jobs.json`.
    store_path: PathBuf,
    jobs: Arc<Mutex<Vec<CronJob>>>,
    pool: Arc<WorkerPool>,
    /// Wakes the timer when jobs change.
    rearm: Arc<Notify>,
    shutdown: CancellationToken,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CronService {
    pub fn new(store_path: impl Into<PathBuf>, pool: Arc<WorkerPool>) -> Self {
        Self {
            store_path: store_path.into(),
            jobs: Arc::new(Mutex::new(Vec::new())),
            pool,
            rearm: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            handle: std::sync::Mutex::new(None),
        }
    }

    // ────────────── Persistence ──────────────

    /// Load the job array from disk; a missing file starts empty.
    pub async fn load(&self) -> anyhow::Result<()> {
        if !self.store_path.exists() {
            debug!(path = %self.store_path.display(), "no cron store, starting empty");
            return Ok(());
        }
        let data = tokio::fs::read_to_string(&self.store_path).await?;
        let loaded: Vec<CronJob> = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("failed to parse cron store: {e}"))?;

        let mut jobs = self.jobs.lock().await;
        *jobs = loaded;
        info!(path = %self.store_path.display(), jobs = jobs.len(), "loaded cron store");
        Ok(())
    }

    /// Save the job array to disk.
    pub async fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let jobs = self.jobs.lock().await;
        let json = serde_json::to_string_pretty(&*jobs)?;
        tokio::fs::write(&self.store_path, json).await?;
        debug!(path = %self.store_path.display(), "saved cron store");
        Ok(())
    }

    // ────────────── Job management ──────────────

    /// Add a job with a generated `job_<n>` id. Returns the id.
    pub async fn add_job(
        &self,
        name: impl Into<String>,
        schedule: CronSchedule,
        payload: CronPayload,
    ) -> anyhow::Result<String> {
        let now_ms = Utc::now().timestamp_millis();
        let id = {
            let mut jobs = self.jobs.lock().await;
            let id = next_job_id(&jobs);
            jobs.push(CronJob {
                id: id.clone(),
                name: name.into(),
                enabled: true,
                state: CronJobState {
                    next_run_at_ms: compute_next_run_from(&schedule, now_ms),
                    ..Default::default()
                },
                schedule,
                payload,
                created_at_ms: now_ms,
                updated_at_ms: now_ms,
            });
            id
        };
        self.save().await?;
        self.rearm.notify_one();
        info!(id = %id, "added cron job");
        Ok(id)
    }

    /// Create or replace the reserved CLI job.
    pub async fn set_cli_job(
        &self,
        schedule: CronSchedule,
        payload: CronPayload,
    ) -> anyhow::Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        {
            let mut jobs = self.jobs.lock().await;
            jobs.retain(|j| j.id != CLI_JOB_ID);
            jobs.push(CronJob {
                id: CLI_JOB_ID.into(),
                name: "cli".into(),
                enabled: true,
                state: CronJobState {
                    next_run_at_ms: compute_next_run_from(&schedule, now_ms),
                    ..Default::default()
                },
                schedule,
                payload,
                created_at_ms: now_ms,
                updated_at_ms: now_ms,
            });
        }
        self.save().await?;
        self.rearm.notify_one();
        Ok(())
    }

    /// Remove a job by id. Returns whether it existed.
    pub async fn remove_job(&self, id: &str) -> anyhow::Result<bool> {
        let removed = {
            let mut jobs = self.jobs.lock().await;
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() != before
        };
        if removed {
            self.save().await?;
            self.rearm.notify_one();
            info!(id = %id, "removed cron job");
        }
        Ok(removed)
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.jobs.lock().await.clone()
    }

    // ────────────── Timer ──────────────

    /// Start the firing timer.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }

        let jobs = Arc::clone(&self.jobs);
        let pool = Arc::clone(&self.pool);
        let rearm = Arc::clone(&self.rearm);
        let shutdown = self.shutdown.clone();
        let store_path = self.store_path.clone();

        *handle = Some(tokio::spawn(async move {
            info!("cron timer started");
            loop {
                let sleep_for = {
                    let jobs = jobs.lock().await;
                    nearest_due(&jobs)
                        .map(|due_ms| {
                            let delta = due_ms - Utc::now().timestamp_millis();
                            Duration::from_millis(delta.max(0) as u64)
                        })
                        .unwrap_or(IDLE_SLEEP)
                };

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = rearm.notified() => continue,
                    _ = tokio::time::sleep(sleep_for) => {
                        fire_due(&jobs, &pool, &store_path).await;
                    }
                }
            }
            info!("cron timer stopped");
        }));
    }

    /// Stop the timer and wait for it to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn nearest_due(jobs: &[CronJob]) -> Option<i64> {
    jobs.iter()
        .filter(|j| j.enabled)
        .filter_map(|j| j.state.next_run_at_ms)
        .min()
}

/// Submit every due job to the pool and advance its schedule.
async fn fire_due(jobs: &Arc<Mutex<Vec<CronJob>>>, pool: &Arc<WorkerPool>, store_path: &PathBuf) {
    let now_ms = Utc::now().timestamp_millis();
    let mut dirty = false;

    {
        let mut jobs = jobs.lock().await;
        for job in jobs.iter_mut() {
            let due = job.enabled && job.state.next_run_at_ms.is_some_and(|t| t <= now_ms);
            if !due {
                continue;
            }

            let payload = match serde_json::to_string(&job.payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!(id = %job.id, error = %e, "unencodable cron payload");
                    continue;
                }
            };
            let task = Task::new(format!("{}-{now_ms}", job.id), CRON_TASK_TYPE, payload);

            debug!(id = %job.id, "firing cron job");
            match pool.submit(task).await {
                Ok(()) => {
                    job.state.last_status = Some(JobStatus::Ok);
                    job.state.last_error = None;
                }
                Err(e) => {
                    warn!(id = %job.id, error = %e, "cron submission failed");
                    job.state.last_status = Some(JobStatus::Error);
                    job.state.last_error = Some(e.to_string());
                }
            }

            job.state.last_run_at_ms = Some(now_ms);
            job.state.next_run_at_ms = match job.schedule.kind {
                // One-shots do not re-arm.
                ScheduleKind::At => None,
                _ => compute_next_run_from(&job.schedule, now_ms),
            };
            job.updated_at_ms = now_ms;
            dirty = true;
        }
    }

    if dirty {
        let snapshot = { jobs.lock().await.clone() };
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            if let Some(parent) = store_path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            if let Err(e) = tokio::fs::write(store_path, json).await {
                warn!(error = %e, "failed to persist cron state");
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_service(dir: &std::path::Path) -> (CronService, Arc<WorkerPool>) {
        let pool = Arc::new(WorkerPool::new(1, 16));
        let service = CronService::new(dir.join("jobs.json"), Arc::clone(&pool));
        (service, pool)
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let dir = tempdir().unwrap();
        let (service, _pool) = make_service(dir.path());

        let id = service
            .add_job(
                "digest",
                CronSchedule::every(60_000),
                CronPayload {
                    message: "daily digest".into(),
                    session_id: String::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(id, "job_1");

        let jobs = service.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].state.next_run_at_ms.is_some());

        assert!(service.remove_job(&id).await.unwrap());
        assert!(!service.remove_job(&id).await.unwrap());
        assert!(service.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        {
            let (service, _pool) = make_service(dir.path());
            service
                .add_job("a", CronSchedule::every(1000), CronPayload::default())
                .await
                .unwrap();
            service
                .add_job("b", CronSchedule::cron("0 9 * * *"), CronPayload::default())
                .await
                .unwrap();
        }

        let (service, _pool) = make_service(dir.path());
        service.load().await.unwrap();
        let jobs = service.list_jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "job_1");
        assert_eq!(jobs[1].id, "job_2");
        // Cron-expression jobs persist but never self-arm.
        assert!(jobs[1].state.next_run_at_ms.is_none());
    }

    #[tokio::test]
    async fn test_cli_job_upsert() {
        let dir = tempdir().unwrap();
        let (service, _pool) = make_service(dir.path());

        service
            .set_cli_job(CronSchedule::every(1000), CronPayload::default())
            .await
            .unwrap();
        service
            .set_cli_job(CronSchedule::every(2000), CronPayload::default())
            .await
            .unwrap();

        let jobs = service.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, CLI_JOB_ID);
        assert_eq!(jobs[0].schedule.every_ms, Some(2000));
    }

    #[tokio::test]
    async fn test_timer_fires_interval_job_into_pool() {
        let dir = tempdir().unwrap();
        let (service, pool) = make_service(dir.path());
        pool.register_executor(CRON_TASK_TYPE, |_cancel, task| async move {
            let payload: CronPayload = serde_json::from_str(&task.payload)?;
            Ok(format!("ran: {}", payload.message))
        });
        let mut results = pool.take_results().unwrap();
        pool.start();

        service
            .add_job(
                "fast",
                CronSchedule::every(30),
                CronPayload {
                    message: "tick".into(),
                    session_id: String::new(),
                },
            )
            .await
            .unwrap();
        service.start();

        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.output, "ran: tick");
        assert!(result.task_id.starts_with("job_1-"));

        service.stop().await;
    }

    #[tokio::test]
    async fn test_one_shot_does_not_rearm() {
        let dir = tempdir().unwrap();
        let (service, pool) = make_service(dir.path());
        pool.register_executor(CRON_TASK_TYPE, |_cancel, _task| async move {
            Ok("done".into())
        });
        let mut results = pool.take_results().unwrap();
        pool.start();

        // Already due.
        service
            .add_job("once", CronSchedule::at(0), CronPayload::default())
            .await
            .unwrap();
        service.start();

        tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .unwrap()
            .unwrap();

        // Wait for the state write, then verify it was disarmed.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let jobs = service.list_jobs().await;
        assert!(jobs[0].state.next_run_at_ms.is_none());
        assert_eq!(jobs[0].state.last_status, Some(JobStatus::Ok));

        service.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_timer() {
        let dir = tempdir().unwrap();
        let (service, _pool) = make_service(dir.path());
        service.start();
        service.stop().await;
        // A second stop is a no-op.
        service.stop().await;
    }
}
