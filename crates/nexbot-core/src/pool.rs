//! Worker pool — bounded concurrent execution of typed tasks.
//!
//! A fixed set of workers shares one bounded queue. Tasks carry a type tag
//! that selects a registered executor function. Each execution is wrapped
//! with panic isolation, cancellation propagation, duration measurement,
//! and atomic metrics; exactly one [`TaskResult`] is emitted per submitted
//! task on the results channel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PoolError;

// ─────────────────────────────────────────────
// Task / Result
// ─────────────────────────────────────────────

/// A unit of work submitted to the pool.
#[derive(Clone, Debug)]
pub struct Task {
    /// Unique per submission.
    pub id: String,
    /// Selects the registered executor (e.g. `"cron"`, `"subagent"`).
    pub task_type: String,
    /// Opaque payload interpreted by the executor.
    pub payload: String,
    /// Optional per-task cancellation handle.
    pub cancel: Option<CancellationToken>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Task {
            id: id.into(),
            task_type: task_type.into(),
            payload: payload.into(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome of one task execution.
#[derive(Clone, Debug)]
pub struct TaskResult {
    pub task_id: String,
    pub output: String,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ─────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// Point-in-time metrics view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub total_duration: Duration,
}

impl PoolMetrics {
    /// Tasks submitted but not yet finished (queued or in flight).
    pub fn pending(&self) -> u64 {
        self.submitted - self.completed - self.failed
    }
}

// ─────────────────────────────────────────────
// WorkerPool
// ─────────────────────────────────────────────

/// Boxed future produced by an executor function.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;

/// Executor function for one task type.
pub type ExecutorFn = Arc<dyn Fn(CancellationToken, Task) -> TaskFuture + Send + Sync>;

/// Bounded M:N task executor.
pub struct WorkerPool {
    workers: usize,
    queue_tx: Mutex<Option<mpsc::Sender<Task>>>,
    queue_rx: Arc<AsyncMutex<mpsc::Receiver<Task>>>,
    executors: Arc<RwLock<HashMap<String, ExecutorFn>>>,
    results_tx: mpsc::Sender<TaskResult>,
    results_rx: Mutex<Option<mpsc::Receiver<TaskResult>>>,
    counters: Arc<PoolCounters>,
    queue_depth: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `workers` executor tasks and a submission queue
    /// of `queue_cap` entries.
    pub fn new(workers: usize, queue_cap: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_cap.max(1));
        // Results buffer generously so workers rarely stall on a slow
        // results consumer.
        let (results_tx, results_rx) = mpsc::channel(queue_cap.max(1) * 4 + workers);

        WorkerPool {
            workers: workers.max(1),
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx: Arc::new(AsyncMutex::new(queue_rx)),
            executors: Arc::new(RwLock::new(HashMap::new())),
            results_tx,
            results_rx: Mutex::new(Some(results_rx)),
            counters: Arc::new(PoolCounters::default()),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register the executor for a task type. Replaces any previous
    /// executor for the same tag.
    pub fn register_executor<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(CancellationToken, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let wrapped: ExecutorFn = Arc::new(move |cancel, task| Box::pin(f(cancel, task)));
        self.executors
            .write()
            .unwrap()
            .insert(task_type.into(), wrapped);
    }

    /// Launch the worker tasks.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        if !handles.is_empty() {
            return;
        }
        for worker_id in 0..self.workers {
            let queue_rx = Arc::clone(&self.queue_rx);
            let executors = Arc::clone(&self.executors);
            let results_tx = self.results_tx.clone();
            let counters = Arc::clone(&self.counters);
            let queue_depth = Arc::clone(&self.queue_depth);

            handles.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = queue_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else { break };
                    queue_depth.fetch_sub(1, Ordering::Relaxed);

                    let result = run_task(&executors, task).await;

                    if result.is_success() {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    counters
                        .total_duration_ms
                        .fetch_add(result.elapsed.as_millis() as u64, Ordering::Relaxed);

                    if results_tx.send(result).await.is_err() {
                        break;
                    }
                }
                debug!(worker_id = worker_id, "worker exiting");
            }));
        }
        info!(workers = self.workers, "worker pool started");
    }

    /// Submit a task, waiting for queue capacity when full (producers feel
    /// backpressure).
    pub async fn submit(&self, task: Task) -> Result<(), PoolError> {
        let tx = {
            let guard = self.queue_tx.lock().unwrap();
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(PoolError::Stopped);
        };
        tx.send(task).await.map_err(|_| PoolError::Stopped)?;
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Submit with a cancellation escape hatch for the capacity wait.
    pub async fn submit_with_cancel(
        &self,
        cancel: &CancellationToken,
        task: Task,
    ) -> Result<(), PoolError> {
        let tx = {
            let guard = self.queue_tx.lock().unwrap();
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(PoolError::Stopped);
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            sent = tx.send(task) => {
                sent.map_err(|_| PoolError::Stopped)?;
                self.queue_depth.fetch_add(1, Ordering::Relaxed);
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Close the queue and wait for queued and in-flight tasks to finish.
    pub async fn stop(&self) {
        {
            let mut tx = self.queue_tx.lock().unwrap();
            if tx.take().is_none() {
                return;
            }
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }

    /// Current submission-queue depth.
    pub fn queue_size(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Take the results receiver. Yields `None` after the first call.
    pub fn take_results(&self) -> Option<mpsc::Receiver<TaskResult>> {
        self.results_rx.lock().unwrap().take()
    }

    /// Snapshot of the pool counters.
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            total_duration: Duration::from_millis(
                self.counters.total_duration_ms.load(Ordering::Relaxed),
            ),
        }
    }
}

/// Execute one task with panic isolation and cancellation propagation.
async fn run_task(executors: &RwLock<HashMap<String, ExecutorFn>>, task: Task) -> TaskResult {
    let task_id = task.id.clone();
    let cancel = task.cancel.clone().unwrap_or_default();
    let start = Instant::now();

    if cancel.is_cancelled() {
        return TaskResult {
            task_id,
            output: String::new(),
            error: Some("cancelled".into()),
            elapsed: Duration::ZERO,
        };
    }

    let executor = executors.read().unwrap().get(&task.task_type).cloned();
    let Some(executor) = executor else {
        warn!(task_id = %task_id, task_type = %task.task_type, "unknown task type");
        return TaskResult {
            task_id,
            output: String::new(),
            error: Some(format!("unknown task type: {}", task.task_type)),
            elapsed: start.elapsed(),
        };
    };

    // Run the executor in its own task so a panic unwinds there and is
    // reported as a classified error instead of killing the worker.
    let fut = executor(cancel.clone(), task);
    let mut join = tokio::spawn(fut);

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            join.abort();
            Err("cancelled".to_string())
        }
        joined = &mut join => match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(join_err) if join_err.is_panic() => {
                let panic_msg = panic_message(join_err.into_panic());
                Err(format!("Error: panic: {panic_msg}"))
            }
            Err(_) => Err("task aborted".to_string()),
        },
    };

    let elapsed = start.elapsed();
    match outcome {
        Ok(output) => TaskResult {
            task_id,
            output,
            error: None,
            elapsed,
        },
        Err(error) => TaskResult {
            task_id,
            output: String::new(),
            error: Some(error),
            elapsed,
        },
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
