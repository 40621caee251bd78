//! Tool executor — runs tool calls with timeout enforcement, panic
//! isolation, and per-call error classification.
//!
//! Every tool call produces exactly one [`ToolCallOutcome`] carrying the
//! originating call id, so the agent loop can pair results 1:1 with the
//! calls the model issued.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use nexbot_core::types::ToolCall;

use super::base::ExecConfig;
use super::registry::ToolRegistry;

/// Structured failure attached to a tool outcome.
#[derive(Clone, Debug)]
pub struct ToolFailure {
    pub message: String,
    /// Set when the per-call timeout fired.
    pub timed_out: bool,
}

/// Outcome of one tool call.
#[derive(Clone, Debug)]
pub struct ToolCallOutcome {
    /// Matches the id of the originating [`ToolCall`].
    pub call_id: String,
    pub content: String,
    pub error: Option<ToolFailure>,
}

impl ToolCallOutcome {
    fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ToolCallOutcome {
            call_id: call_id.into(),
            content: content.into(),
            error: None,
        }
    }

    fn err(call_id: impl Into<String>, message: impl Into<String>, timed_out: bool) -> Self {
        ToolCallOutcome {
            call_id: call_id.into(),
            content: String::new(),
            error: Some(ToolFailure {
                message: message.into(),
                timed_out,
            }),
        }
    }

    /// The text delivered to the model as the tool-result message.
    pub fn formatted(&self) -> String {
        match &self.error {
            None => self.content.clone(),
            Some(f) if f.timed_out => format!("Error: tool timed out: {}", f.message),
            Some(f) => format!("Error: {}", f.message),
        }
    }
}

// ─────────────────────────────────────────────
// ToolExecutor
// ─────────────────────────────────────────────

/// Dispatches tool calls against a registry.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Normalize the model's call objects: skip calls without a function
    /// name, fill in missing call ids.
    pub fn prepare_tool_calls(&self, llm_calls: &[ToolCall]) -> Vec<ToolCall> {
        llm_calls
            .iter()
            .filter(|c| !c.function.name.is_empty())
            .enumerate()
            .map(|(i, c)| {
                let mut call = c.clone();
                if call.id.is_empty() {
                    call.id = format!("call_{i}");
                }
                call
            })
            .collect()
    }

    /// Execute one tool call with timeout and panic isolation.
    pub async fn execute_tool_call(
        &self,
        cancel: &CancellationToken,
        call: &ToolCall,
        cfg: &ExecConfig,
    ) -> ToolCallOutcome {
        let name = call.function.name.clone();
        let Some(tool) = self.registry.get(&name) else {
            warn!(tool = %name, "unknown tool");
            return ToolCallOutcome::err(&call.id, format!("unknown tool: {name}"), false);
        };

        let params: HashMap<String, Value> = if call.function.arguments.trim().is_empty() {
            HashMap::new()
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(p) => p,
                Err(e) => {
                    return ToolCallOutcome::err(
                        &call.id,
                        format!("invalid tool arguments: {e}"),
                        false,
                    );
                }
            }
        };

        debug!(tool = %name, call_id = %call.id, "executing tool call");
        let timeout = cfg.default_timeout;

        // Spawned so a panicking tool unwinds in its own task and is
        // reported as a classified error instead of poisoning the loop.
        let fut = {
            let tool = Arc::clone(&tool);
            let cfg = cfg.clone();
            async move { tool.execute(params, cfg).await }
        };
        let mut join = tokio::spawn(fut);

        tokio::select! {
            _ = cancel.cancelled() => {
                join.abort();
                ToolCallOutcome::err(&call.id, "cancelled", false)
            }
            joined = tokio::time::timeout(timeout, &mut join) => match joined {
                Ok(Ok(Ok(content))) => ToolCallOutcome::ok(&call.id, content),
                Ok(Ok(Err(e))) => ToolCallOutcome::err(&call.id, format!("{e:#}"), false),
                Ok(Err(join_err)) if join_err.is_panic() => {
                    warn!(tool = %name, "tool panicked");
                    ToolCallOutcome::err(&call.id, format!("panic: {}", panic_text(join_err)), false)
                }
                Ok(Err(_)) => ToolCallOutcome::err(&call.id, "tool task aborted", false),
                Err(_) => {
                    join.abort();
                    ToolCallOutcome::err(
                        &call.id,
                        format!("'{name}' exceeded {}s", timeout.as_secs()),
                        true,
                    )
                }
            },
        }
    }

    /// Execute a batch of tool calls sequentially, in the given order.
    /// Every call produces exactly one outcome with the matching call id.
    pub async fn process_tool_calls(
        &self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
        cfg: &ExecConfig,
    ) -> Vec<ToolCallOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            outcomes.push(self.execute_tool_call(cancel, call, cfg).await);
        }
        outcomes
    }
}

fn panic_text(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
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
