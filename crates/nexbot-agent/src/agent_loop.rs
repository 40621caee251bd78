//! Agent loop — the chat ↔ tool-calling state machine.
//!
//! One `process` invocation: append the user message, then iterate model
//! calls bounded by `max_iterations`. A `tool_calls` turn appends the
//! assistant message and one tool result per call (in order) before the
//! next model call; any other turn appends the assistant message and
//! returns its content. Provider failures propagate — retry policy lives
//! a layer up, in the orchestrator.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use nexbot_core::config::AgentConfig;
use nexbot_core::error::SessionError;
use nexbot_core::session::SessionStore;
use nexbot_core::types::Message;
use nexbot_providers::{ChatRequest, Provider, ProviderError};

use crate::context::ContextBuilder;
use crate::tools::{ExecConfig, SecretsResolver, ToolExecutor, ToolRegistry};

/// Errors surfaced by [`AgentLoop::process`].
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The chat ↔ tool loop hit its iteration bound without a final
    /// response.
    #[error("tool iteration limit reached after {0} iterations")]
    IterationLimit(usize),

    #[error("processing cancelled")]
    Cancelled,
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The reasoning loop bound to one provider, session store, and tool
/// registry. Cheap to share; subagents get their own instances.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    sessions: Arc<SessionStore>,
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    context: ContextBuilder,
    config: AgentConfig,
    secrets: Option<Arc<dyn SecretsResolver>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        sessions: Arc<SessionStore>,
        registry: Arc<ToolRegistry>,
        context: ContextBuilder,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            sessions,
            registry: Arc::clone(&registry),
            executor: ToolExecutor::new(registry),
            context,
            config,
            secrets: None,
        }
    }

    /// Attach the optional secrets-resolver hook handed to tools.
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretsResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    // ────────────── Processing ──────────────

    /// Process one user message: append it to the session, then run the
    /// iteration loop to a final response.
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        user_text: &str,
    ) -> Result<String, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        self.sessions.get_or_create(session_id).await?;
        self.sessions
            .append(session_id, &Message::user(user_text))
            .await?;
        self.run(cancel, session_id).await
    }

    /// Re-run the iteration loop over the session as it stands, without
    /// appending a user message. Used by retry: the failed attempt already
    /// put the user message (and any completed tool exchanges) on record.
    pub async fn resume(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Result<String, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        self.run(cancel, session_id).await
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Result<String, AgentError> {
        let history = self.sessions.read(session_id).await?;
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(
            self.context.build_for_session(session_id, &history),
        ));
        messages.extend(history);

        // Tool schemas only go out when the provider can act on them.
        let tools = (self.provider.supports_tool_calling() && !self.registry.is_empty())
            .then(|| self.registry.definitions());

        let mut exec_cfg = ExecConfig::for_session(session_id);
        exec_cfg.secrets = self.secrets.clone();

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            debug!(session_id = %session_id, iteration = iteration, "model call");

            let mut request = ChatRequest::new(messages.clone(), &self.config.model);
            request.tools = tools.clone();
            request.max_tokens = self.config.max_tokens;
            request.temperature = self.config.temperature;

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                resp = self.provider.chat(request) => resp?,
            };

            if response.wants_tools() {
                let calls = self.executor.prepare_tool_calls(&response.tool_calls);
                let assistant =
                    Message::assistant_tool_calls(response.content.clone(), calls.clone());
                self.sessions.append(session_id, &assistant).await?;
                messages.push(assistant);

                let outcomes = self
                    .executor
                    .process_tool_calls(cancel, &calls, &exec_cfg)
                    .await;
                for outcome in &outcomes {
                    let tool_msg = Message::tool_result(&outcome.call_id, outcome.formatted());
                    self.sessions.append(session_id, &tool_msg).await?;
                    messages.push(tool_msg);
                }
            } else {
                let content = response.content.unwrap_or_default();
                self.sessions
                    .append(session_id, &Message::assistant(&content))
                    .await?;
                return Ok(content);
            }
        }

        Err(AgentError::IterationLimit(self.config.max_iterations))
    }

    /// One tool-free model call asking for a short user-facing note about
    /// an internal failure. The orchestrator invokes this after its
    /// retries are exhausted.
    pub async fn recover(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        error_excerpt: &str,
    ) -> Result<String, AgentError> {
        let history = self.sessions.read(session_id).await?;
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(
            self.context.build_for_session(session_id, &history),
        ));
        messages.extend(history);
        messages.push(Message::user(format!(
            "The last attempt to answer hit an internal error. Write a short, friendly \
             reply letting the user know something went wrong and suggesting they try \
             again. Error detail: {error_excerpt}"
        )));

        let mut request = ChatRequest::new(messages, &self.config.model);
        request.max_tokens = self.config.max_tokens;
        request.temperature = self.config.temperature;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            resp = self.provider.chat(request) => resp?,
        };

        let content = response
            .content
            .unwrap_or_else(|| "Something went wrong on my side — please try again.".into());
        self.sessions
            .append(session_id, &Message::assistant(&content))
            .await?;
        Ok(content)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
