//! Subagent manager — on-demand isolated agent loop instances.
//!
//! Each subagent owns a fresh [`AgentLoop`] built by an injected factory
//! (the factory captures configuration, not the primary loop, which keeps
//! the spawn-tool → manager → loop graph acyclic), a dedicated session id
//! under the subagents session directory, and a child cancellation token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nexbot_core::error::SessionError;
use nexbot_core::session::SessionStore;
use uuid::Uuid;

use crate::agent_loop::{AgentError, AgentLoop};

/// Timeout applied to a subagent task when the caller supplies none.
pub const DEFAULT_SUBAGENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Builds a fresh agent loop for the given subagent session id.
pub type LoopFactory = Arc<dyn Fn(&str) -> AgentLoop + Send + Sync>;

/// Errors from the subagent manager.
#[derive(Debug, Error)]
pub enum SubagentError {
    #[error("unknown subagent id: {0}")]
    UnknownId(String),

    #[error("subagent task timed out")]
    Timeout,

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

// ─────────────────────────────────────────────
// Subagent
// ─────────────────────────────────────────────

/// One isolated agent instance.
pub struct Subagent {
    /// Unique handle id.
    pub id: String,
    /// Session id, always prefixed `subagent-`.
    pub session_id: String,
    /// Session of the conversation that spawned this subagent.
    pub parent_session: String,
    /// Task description given at spawn time.
    pub task: String,
    cancel: CancellationToken,
    agent: AgentLoop,
}

impl Subagent {
    /// Run a task through the owned loop. Without a caller-supplied
    /// timeout, a 5-minute default applies.
    pub async fn process(
        &self,
        task: &str,
        timeout: Option<Duration>,
    ) -> Result<String, SubagentError> {
        let timeout = timeout.unwrap_or(DEFAULT_SUBAGENT_TIMEOUT);
        match tokio::time::timeout(
            timeout,
            self.agent.process(&self.cancel, &self.session_id, task),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(SubagentError::Timeout),
        }
    }

    /// Whether this subagent's cancellation has fired.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ─────────────────────────────────────────────
// SubagentManager
// ─────────────────────────────────────────────

/// Factory + registry of subagents.
pub struct SubagentManager {
    /// Store rooted at the subagents session subdirectory.
    sessions: Arc<SessionStore>,
    factory: LoopFactory,
    registry: RwLock<HashMap<String, Arc<Subagent>>>,
}

impl SubagentManager {
    pub fn new(sessions: Arc<SessionStore>, factory: LoopFactory) -> Self {
        Self {
            sessions,
            factory,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn a new subagent with a fresh loop instance and a child token
    /// derived from `cancel`.
    pub async fn spawn(
        &self,
        cancel: &CancellationToken,
        parent_session: &str,
        task: &str,
    ) -> Arc<Subagent> {
        let id = Uuid::new_v4().to_string();
        let session_id = format!("subagent-{}", next_session_nanos());
        let agent = (self.factory)(&session_id);

        let subagent = Arc::new(Subagent {
            id: id.clone(),
            session_id: session_id.clone(),
            parent_session: parent_session.to_string(),
            task: task.to_string(),
            cancel: cancel.child_token(),
            agent,
        });

        self.registry
            .write()
            .await
            .insert(id.clone(), Arc::clone(&subagent));
        info!(subagent_id = %id, session_id = %session_id, "spawned subagent");
        subagent
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Subagent>> {
        self.registry.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Subagent>> {
        self.registry.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Stop one subagent: cancel it, delete its session, remove it from
    /// the registry. Unknown ids are an error.
    pub async fn stop(&self, id: &str) -> Result<(), SubagentError> {
        let removed = self
            .registry
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SubagentError::UnknownId(id.to_string()))?;

        removed.cancel.cancel();
        if let Err(e) = self.sessions.delete(&removed.session_id).await {
            warn!(subagent_id = %id, error = %e, "failed to delete subagent session");
        }
        debug!(subagent_id = %id, "stopped subagent");
        Ok(())
    }

    /// Stop every subagent. Safe to call repeatedly.
    pub async fn stop_all(&self) {
        let drained: Vec<Arc<Subagent>> = {
            let mut registry = self.registry.write().await;
            registry.drain().map(|(_, s)| s).collect()
        };
        for subagent in drained {
            subagent.cancel.cancel();
            if let Err(e) = self.sessions.delete(&subagent.session_id).await {
                warn!(
                    subagent_id = %subagent.id,
                    error = %e,
                    "failed to delete subagent session"
                );
            }
        }
    }

    /// Spawn, run one task, then stop — the subagent and its session are
    /// cleaned up whatever the task's outcome.
    pub async fn execute_task(
        &self,
        cancel: &CancellationToken,
        parent_session: &str,
        task: &str,
        timeout: Option<Duration>,
    ) -> Result<String, SubagentError> {
        let subagent = self.spawn(cancel, parent_session, task).await;
        let result = subagent.process(task, timeout).await;
        if let Err(e) = self.stop(&subagent.id).await {
            warn!(subagent_id = %subagent.id, error = %e, "subagent cleanup failed");
        }
        result
    }
}

/// Strictly-increasing nanosecond stamps, so session ids stay unique even
/// for spawns within one clock tick.
fn next_session_nanos() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let mut stamped = 0;
    let _ = LAST.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        stamped = now.max(last + 1);
        Some(stamped)
    });
    stamped
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nexbot_core::config::AgentConfig;
    use nexbot_core::types::{LlmResponse, Message};
    use nexbot_providers::{ChatRequest, Provider, ProviderError};
    use tempfile::tempdir;

    use crate::context::ContextBuilder;
    use crate::tools::ToolRegistry;

    /// Provider answering with the text of the last user message.
    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, ProviderError> {
            let text = request
                .messages
                .iter()
                .rev()
                .find_map(|m| match m {
                    Message::User { content } => Some(content.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            Ok(LlmResponse {
                content: Some(format!("echo: {text}")),
                finish_reason: Some("stop".into()),
                ..Default::default()
            })
        }

        fn supports_tool_calling(&self) -> bool {
            false
        }
        fn default_model(&self) -> &str {
            "echo"
        }
        fn display_name(&self) -> &str {
            "EchoProvider"
        }
    }

    fn make_manager() -> (SubagentManager, Arc<SessionStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let sessions =
            Arc::new(SessionStore::new(dir.path().join("sessions").join("subagents")).unwrap());
        let workspace = dir.path().to_path_buf();

        let factory_sessions = Arc::clone(&sessions);
        let factory: LoopFactory = Arc::new(move |_session_id| {
            AgentLoop::new(
                Arc::new(EchoProvider),
                Arc::clone(&factory_sessions),
                Arc::new(ToolRegistry::new()),
                ContextBuilder::new(&workspace),
                AgentConfig::default(),
            )
        });

        (
            SubagentManager::new(Arc::clone(&sessions), factory),
            sessions,
            dir,
        )
    }

    #[tokio::test]
    async fn test_spawn_assigns_distinct_ids() {
        let (mgr, _sessions, _dir) = make_manager();
        let cancel = CancellationToken::new();

        let a = mgr.spawn(&cancel, "parent", "task a").await;
        let b = mgr.spawn(&cancel, "parent", "task b").await;

        assert_ne!(a.id, b.id);
        assert_ne!(a.session_id, b.session_id);
        assert!(a.session_id.starts_with("subagent-"));
        assert!(b.session_id.starts_with("subagent-"));
        assert_eq!(mgr.count().await, 2);
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let (mgr, _sessions, _dir) = make_manager();
        let cancel = CancellationToken::new();

        let spawned = mgr.spawn(&cancel, "p", "t").await;
        assert!(mgr.get(&spawned.id).await.is_some());
        assert!(mgr.get("missing").await.is_none());
        assert_eq!(mgr.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_subagent_processes_in_own_session() {
        let (mgr, sessions, _dir) = make_manager();
        let cancel = CancellationToken::new();

        let subagent = mgr.spawn(&cancel, "parent", "count the beans").await;
        let output = subagent.process("count the beans", None).await.unwrap();
        assert_eq!(output, "echo: count the beans");

        let log = sessions.read(&subagent.session_id).await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_cancels_and_deletes_session() {
        let (mgr, sessions, _dir) = make_manager();
        let cancel = CancellationToken::new();

        let subagent = mgr.spawn(&cancel, "p", "t").await;
        subagent.process("t", None).await.unwrap();
        assert!(sessions.file_size(&subagent.session_id).await.unwrap() > 0);

        mgr.stop(&subagent.id).await.unwrap();

        assert!(subagent.is_stopped());
        assert_eq!(mgr.count().await, 0);
        assert!(sessions.read(&subagent.session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_id_is_error() {
        let (mgr, _sessions, _dir) = make_manager();
        let err = mgr.stop("nope").await.unwrap_err();
        assert!(matches!(err, SubagentError::UnknownId(_)));
    }

    #[tokio::test]
    async fn test_stop_all_idempotent() {
        let (mgr, _sessions, _dir) = make_manager();
        let cancel = CancellationToken::new();

        mgr.spawn(&cancel, "p", "a").await;
        mgr.spawn(&cancel, "p", "b").await;
        assert_eq!(mgr.count().await, 2);

        mgr.stop_all().await;
        assert_eq!(mgr.count().await, 0);
        mgr.stop_all().await;
        assert_eq!(mgr.count().await, 0);
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_subagent() {
        let (mgr, _sessions, _dir) = make_manager();
        let cancel = CancellationToken::new();
        let subagent = mgr.spawn(&cancel, "p", "t").await;

        cancel.cancel();
        assert!(subagent.is_stopped());

        let err = subagent.process("t", None).await.unwrap_err();
        assert!(matches!(err, SubagentError::Agent(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_execute_task_cleans_up() {
        let (mgr, sessions, dir) = make_manager();
        let cancel = CancellationToken::new();

        let output = mgr
            .execute_task(&cancel, "parent", "sweep the floor", None)
            .await
            .unwrap();
        assert_eq!(output, "echo: sweep the floor");
        assert_eq!(mgr.count().await, 0);

        // No session files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("sessions").join("subagents"))
            .unwrap()
            .flatten()
            .collect();
        assert!(leftovers.is_empty());
        drop(sessions);
    }

    #[tokio::test]
    async fn test_two_subagents_isolated() {
        let (mgr, sessions, _dir) = make_manager();
        let cancel = CancellationToken::new();

        let a = mgr.spawn(&cancel, "parent", "task a").await;
        let b = mgr.spawn(&cancel, "parent", "task b").await;

        let out_a = a.process("task a", None).await.unwrap();
        let out_b = b.process("task b", None).await.unwrap();
        assert_eq!(out_a, "echo: task a");
        assert_eq!(out_b, "echo: task b");

        // Each session holds only its own exchange.
        assert_eq!(sessions.read(&a.session_id).await.unwrap().len(), 2);
        assert_eq!(sessions.read(&b.session_id).await.unwrap().len(), 2);
    }

    #[test]
    fn test_session_nanos_strictly_increase() {
        let mut last = 0;
        for _ in 0..1000 {
            let next = next_session_nanos();
            assert!(next > last);
            last = next;
        }
    }
}
