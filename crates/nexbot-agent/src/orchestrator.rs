//! Orchestrator — the composition root.
//!
//! Owns one instance of every subsystem, drives initialization order,
//! supervises the inbound processing loop (command routing, retry with
//! backoff, recovery, event emission, reasoning-tag scrubbing), and
//! supports in-process restart: `restart()` tears the runtime down and
//! builds a fresh one on a new root cancellation token.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nexbot_channels::MessageSender;
use nexbot_core::bus::{Event, EventKind, InboundMessage, MessageBus, OutboundMessage};
use nexbot_core::config::{AgentConfig, Config};
use nexbot_core::error::BusError;
use nexbot_core::pool::WorkerPool;
use nexbot_core::session::SessionStore;
use nexbot_core::types::Message;
use nexbot_core::utils;
use nexbot_cron::{CronPayload, CronService, CRON_TASK_TYPE};
use nexbot_providers::Provider;

use crate::agent_loop::{AgentError, AgentLoop};
use crate::commands::{CommandHandler, OutboundPublisher, SessionControl, SessionStatus};
use crate::context::ContextBuilder;
use crate::reasoning::strip_reasoning_tags;
use crate::subagent::{LoopFactory, SubagentManager};
use crate::tools::spawn::SpawnPayload;
use crate::tools::{MessageTool, SpawnTool, ToolRegistry, SUBAGENT_TASK_TYPE};

/// Reply when the chat ↔ tool loop exhausts its iteration bound.
pub const ITERATION_LIMIT_APOLOGY: &str =
    "I'm sorry, I couldn't finish working through that request. Please try again, \
     perhaps with a simpler phrasing.";

/// Reply when even the recovery call fails.
const RECOVERY_FALLBACK: &str =
    "I hit repeated internal errors and couldn't process that. Please try again in a moment.";

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_START: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(10);
const ERROR_EXCERPT_LIMIT: usize = 500;

const POOL_WORKERS: usize = 4;
const POOL_QUEUE_CAP: usize = 32;

/// Cron store filename under the workspace.
const CRON_STORE_FILE: &str = "jobs.json";
/// Session attributed to cron runs without an explicit session.
const CRON_SESSION_ID: &str = "cron";

/// Builds the provider during initialization; injectable for tests.
pub type ProviderFactory =
    Box<dyn Fn(&Config) -> anyhow::Result<Arc<dyn Provider>> + Send + Sync>;

// ─────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────

/// Everything one initialized generation owns. Dropped wholesale on
/// shutdown; restart builds a new one.
struct Runtime {
    app_cancel: CancellationToken,
    bus: Arc<MessageBus>,
    sessions: Arc<SessionStore>,
    agent: Arc<AgentLoop>,
    subagents: Arc<SubagentManager>,
    pool: Arc<WorkerPool>,
    cron: Option<Arc<CronService>>,
    commands: Arc<CommandHandler>,
    processor: Option<JoinHandle<()>>,
    results_task: Option<JoinHandle<()>>,
}

// ─────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────

pub struct Orchestrator {
    config: Config,
    provider_factory: ProviderFactory,
    /// Lifecycle mutex: initialize/shutdown serialize here.
    state: tokio::sync::Mutex<Option<Runtime>>,
    /// Separate mutex so a restart can never re-enter itself.
    restart_lock: tokio::sync::Mutex<()>,
    restart_tx: mpsc::UnboundedSender<()>,
    restart_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl Orchestrator {
    /// Orchestrator using the provider registry for construction.
    pub fn new(config: Config) -> Self {
        Self::with_provider_factory(
            config,
            Box::new(|config: &Config| {
                nexbot_providers::create_provider(
                    &config.provider,
                    &config.providers,
                    &config.agent.model,
                )
                .map_err(|e| anyhow::anyhow!(e))
            }),
        )
    }

    /// Orchestrator with an injected provider factory.
    pub fn with_provider_factory(config: Config, provider_factory: ProviderFactory) -> Self {
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        Self {
            config,
            provider_factory,
            state: tokio::sync::Mutex::new(None),
            restart_lock: tokio::sync::Mutex::new(()),
            restart_tx,
            restart_rx: std::sync::Mutex::new(Some(restart_rx)),
        }
    }

    // ────────────── Lifecycle ──────────────

    /// Build and wire every subsystem. Idempotent while initialized.
    pub async fn initialize(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            warn!("initialize called on a running orchestrator");
            return Ok(());
        }

        let app_cancel = CancellationToken::new();

        let bus = Arc::new(MessageBus::new(self.config.bus.capacity));
        bus.start();

        let provider = (self.provider_factory)(&self.config)?;

        let workspace = utils::expand_home(&self.config.workspace);
        std::fs::create_dir_all(&workspace)
            .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

        let sessions_dir = if self.config.sessions.dir.is_empty() {
            utils::get_sessions_path()
        } else {
            utils::expand_home(&self.config.sessions.dir)
        };
        let sessions = Arc::new(
            SessionStore::new(&sessions_dir)
                .context("failed to create session store")?
                .with_fsync(self.config.sessions.fsync),
        );

        let sender = Arc::new(MessageSender::new(Arc::clone(&bus)));
        let pool = Arc::new(WorkerPool::new(POOL_WORKERS, POOL_QUEUE_CAP));

        // Subagent manager: isolated loops over the subagents store. The
        // factory captures configuration, never the primary loop.
        let sub_store = Arc::new(sessions.subdir("subagents")?);
        let subagents = {
            let provider = Arc::clone(&provider);
            let sub_store_for_factory = Arc::clone(&sub_store);
            let workspace = workspace.clone();
            let agent_cfg = self.config.agent.clone();
            let factory: LoopFactory = Arc::new(move |_session_id| {
                AgentLoop::new(
                    Arc::clone(&provider),
                    Arc::clone(&sub_store_for_factory),
                    Arc::new(ToolRegistry::new()),
                    ContextBuilder::new(&workspace),
                    agent_cfg.clone(),
                )
            });
            Arc::new(SubagentManager::new(sub_store, factory))
        };

        // Tools enabled by config flags.
        let mut registry = ToolRegistry::new();
        if self.config.tools.spawn {
            registry.register(Arc::new(SpawnTool::new(Arc::clone(&pool))))?;
        }
        if self.config.tools.message {
            registry.register(Arc::new(MessageTool::new(Arc::clone(&sender), "cli")))?;
        }

        let agent = Arc::new(AgentLoop::new(
            Arc::clone(&provider),
            Arc::clone(&sessions),
            Arc::new(registry),
            ContextBuilder::new(&workspace),
            self.config.agent.clone(),
        ));

        // Pool executors: subagent delegation and cron runs.
        {
            let subagents = Arc::clone(&subagents);
            pool.register_executor(SUBAGENT_TASK_TYPE, move |task_cancel, task| {
                let subagents = Arc::clone(&subagents);
                async move {
                    let payload: SpawnPayload = serde_json::from_str(&task.payload)?;
                    subagents
                        .execute_task(&task_cancel, &payload.parent_session, &payload.task, None)
                        .await
                        .map_err(anyhow::Error::from)
                }
            });

            let agent_for_cron = Arc::clone(&agent);
            let cancel_for_cron = app_cancel.clone();
            pool.register_executor(CRON_TASK_TYPE, move |_task_cancel, task| {
                let agent = Arc::clone(&agent_for_cron);
                let cancel = cancel_for_cron.clone();
                async move {
                    let payload: CronPayload = serde_json::from_str(&task.payload)?;
                    let session_id = if payload.session_id.is_empty() {
                        CRON_SESSION_ID.to_string()
                    } else {
                        payload.session_id.clone()
                    };
                    agent
                        .process(&cancel, &session_id, &payload.message)
                        .await
                        .map_err(anyhow::Error::from)
                }
            });
        }
        pool.start();

        // Background task results: observed, logged, done.
        let results_task = pool.take_results().map(|mut rx| {
            let cancel = app_cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = rx.recv() => match result {
                            Some(result) => match &result.error {
                                Some(err) => warn!(
                                    task_id = %result.task_id,
                                    error = %err,
                                    "background task failed"
                                ),
                                None => info!(
                                    task_id = %result.task_id,
                                    elapsed_ms = result.elapsed.as_millis() as u64,
                                    "background task completed"
                                ),
                            },
                            None => break,
                        },
                    }
                }
            })
        });

        let cron = if self.config.cron.enabled {
            let service = Arc::new(CronService::new(
                workspace.join(CRON_STORE_FILE),
                Arc::clone(&pool),
            ));
            if let Err(e) = service.load().await {
                warn!(error = %e, "failed to load cron store");
            }
            service.start();
            Some(service)
        } else {
            None
        };

        let commands = {
            let control = Arc::new(StoreSessionControl {
                sessions: Arc::clone(&sessions),
                agent_cfg: self.config.agent.clone(),
            });
            let publisher = Arc::new(BusPublisher(Arc::clone(&bus)));
            let restart_tx = self.restart_tx.clone();
            Arc::new(CommandHandler::new(
                control,
                publisher,
                Arc::new(move || {
                    let _ = restart_tx.send(());
                }),
            ))
        };

        self.spawn_restart_watcher();

        *state = Some(Runtime {
            app_cancel,
            bus,
            sessions,
            agent,
            subagents,
            pool,
            cron,
            commands,
            processor: None,
            results_task,
        });

        info!(workspace = %workspace.display(), "orchestrator initialized");
        Ok(())
    }

    /// Subscribe to inbound messages and launch the consumer loop.
    pub async fn start_message_processing(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let rt = state
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("orchestrator not initialized"))?;
        if rt.processor.is_some() {
            return Ok(());
        }

        let mut rx = rt.bus.subscribe_inbound();
        let ctx = ProcessorCtx {
            bus: Arc::clone(&rt.bus),
            sessions: Arc::clone(&rt.sessions),
            agent: Arc::clone(&rt.agent),
            commands: Arc::clone(&rt.commands),
            cancel: rt.app_cancel.clone(),
            agent_timeout: Duration::from_secs(self.config.agent.timeout_seconds),
        };

        rt.processor = Some(tokio::spawn(async move {
            info!("message processor started");
            loop {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => process_inbound(&ctx, msg).await,
                        None => break,
                    },
                }
            }
            info!("message processor stopped");
        }));
        Ok(())
    }

    /// Tear down the running generation. No-op when not started.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let Some(rt) = state.take() else {
            return;
        };

        info!("shutting down");
        rt.app_cancel.cancel();

        if let Some(processor) = rt.processor {
            let _ = processor.await;
        }
        if let Some(cron) = rt.cron {
            cron.stop().await;
        }
        rt.pool.stop().await;
        rt.subagents.stop_all().await;
        rt.bus.stop().await;
        if let Some(results_task) = rt.results_task {
            let _ = results_task.await;
        }
        info!("orchestrator stopped");
    }

    /// Shutdown, then initialize and resume processing on a fresh root
    /// token. Serialized on its own mutex so a restart triggered from
    /// inside message processing cannot re-enter.
    pub async fn restart(self: &Arc<Self>) -> anyhow::Result<()> {
        let _guard = self.restart_lock.lock().await;
        info!("restarting");
        self.shutdown().await;
        self.initialize().await?;
        self.start_message_processing().await
    }

    fn spawn_restart_watcher(self: &Arc<Self>) {
        let Some(mut rx) = self.restart_rx.lock().unwrap().take() else {
            return;
        };
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let Some(orchestrator) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = orchestrator.restart().await {
                    error!(error = %e, "restart failed");
                }
            }
        });
    }

    // ────────────── Accessors ──────────────

    pub async fn is_started(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn bus(&self) -> Option<Arc<MessageBus>> {
        self.state.lock().await.as_ref().map(|rt| Arc::clone(&rt.bus))
    }

    pub async fn sessions(&self) -> Option<Arc<SessionStore>> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|rt| Arc::clone(&rt.sessions))
    }

    pub async fn subagents(&self) -> Option<Arc<SubagentManager>> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|rt| Arc::clone(&rt.subagents))
    }

    pub async fn cancellation_token(&self) -> Option<CancellationToken> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|rt| rt.app_cancel.clone())
    }
}

// ─────────────────────────────────────────────
// Inbound processing
// ─────────────────────────────────────────────

#[derive(Clone)]
struct ProcessorCtx {
    bus: Arc<MessageBus>,
    sessions: Arc<SessionStore>,
    agent: Arc<AgentLoop>,
    commands: Arc<CommandHandler>,
    cancel: CancellationToken,
    agent_timeout: Duration,
}

async fn process_inbound(ctx: &ProcessorCtx, msg: InboundMessage) {
    // Control commands bypass the agent entirely.
    if let Some(command) = msg.command().map(str::to_string) {
        if let Err(e) = ctx.commands.handle(&msg, &command).await {
            warn!(error = %e, session_id = %msg.session_id, "command rejected");
        }
        return;
    }

    publish_event(ctx, EventKind::ProcessingStart, &msg);
    let response = process_with_retry(ctx, &msg).await;
    publish_event(ctx, EventKind::ProcessingEnd, &msg);

    let Some(response) = response else {
        return; // cancelled mid-flight, nothing to say
    };

    let cleaned = strip_reasoning_tags(&response);
    let out = OutboundMessage::new(
        &msg.channel,
        &msg.user_id,
        &msg.session_id,
        cleaned,
        // Replies correlate on the session.
        &msg.session_id,
    );
    if let Err(e) = ctx.bus.publish_outbound(out) {
        error!(error = %e, session_id = %msg.session_id, "failed to publish response");
    }
}

fn publish_event(ctx: &ProcessorCtx, kind: EventKind, msg: &InboundMessage) {
    let event = Event::new(kind, &msg.channel, &msg.user_id, &msg.session_id);
    if let Err(e) = ctx.bus.publish_event(event) {
        warn!(error = %e, "failed to publish event");
    }
}

/// Run the agent with the agent-scope timeout and retry, falling back to
/// a recovery call after the last attempt. `None` means cancelled.
async fn process_with_retry(ctx: &ProcessorCtx, msg: &InboundMessage) -> Option<String> {
    let mut backoff = RETRY_BACKOFF_START;
    let mut last_error = String::new();

    for attempt in 1..=RETRY_ATTEMPTS {
        let attempt_result = tokio::time::timeout(ctx.agent_timeout, async {
            if attempt == 1 {
                ctx.agent
                    .process(&ctx.cancel, &msg.session_id, &msg.content)
                    .await
            } else {
                // The first attempt already appended the user message.
                ctx.agent.resume(&ctx.cancel, &msg.session_id).await
            }
        })
        .await;

        match attempt_result {
            Ok(Ok(text)) => return Some(text),
            Ok(Err(AgentError::Cancelled)) => return None,
            Ok(Err(AgentError::IterationLimit(n))) => {
                warn!(session_id = %msg.session_id, iterations = n, "tool iteration limit");
                return Some(ITERATION_LIMIT_APOLOGY.to_string());
            }
            Ok(Err(e)) => {
                last_error = e.to_string();
                warn!(
                    session_id = %msg.session_id,
                    attempt = attempt,
                    error = %last_error,
                    "processing attempt failed"
                );
            }
            Err(_) => {
                last_error = format!("processing timed out after {:?}", ctx.agent_timeout);
                warn!(session_id = %msg.session_id, attempt = attempt, "processing timed out");
            }
        }

        if ctx.cancel.is_cancelled() {
            return None;
        }
        if attempt < RETRY_ATTEMPTS {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RETRY_BACKOFF_CAP);
        }
    }

    // Out of attempts: put the error on record, then ask the model for a
    // user-facing note.
    let excerpt = utils::truncate_string(&last_error, ERROR_EXCERPT_LIMIT);
    if let Err(e) = ctx
        .sessions
        .append(
            &msg.session_id,
            &Message::system(format!("Processing error: {excerpt}")),
        )
        .await
    {
        error!(error = %e, "failed to record processing error");
    }

    match ctx.agent.recover(&ctx.cancel, &msg.session_id, &excerpt).await {
        Ok(text) => Some(text),
        Err(AgentError::Cancelled) => None,
        Err(e) => {
            error!(error = %e, "recovery call failed");
            Some(RECOVERY_FALLBACK.to_string())
        }
    }
}

// ─────────────────────────────────────────────
// Capability adapters
// ─────────────────────────────────────────────

struct StoreSessionControl {
    sessions: Arc<SessionStore>,
    agent_cfg: AgentConfig,
}

#[async_trait]
impl SessionControl for StoreSessionControl {
    async fn clear_session(&self, session_id: &str) -> anyhow::Result<()> {
        self.sessions.clear(session_id).await?;
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> anyhow::Result<SessionStatus> {
        Ok(SessionStatus {
            session_id: session_id.to_string(),
            message_count: self.sessions.message_count(session_id).await?,
            file_size: self.sessions.file_size(session_id).await?,
            model: self.agent_cfg.model.clone(),
            temperature: self.agent_cfg.temperature,
            max_tokens: self.agent_cfg.max_tokens,
        })
    }
}

struct BusPublisher(Arc<MessageBus>);

impl OutboundPublisher for BusPublisher {
    fn publish(&self, msg: OutboundMessage) -> Result<(), BusError> {
        self.0.publish_outbound(msg)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
