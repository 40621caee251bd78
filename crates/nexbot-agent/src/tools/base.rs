//! Tool trait — the interface every agent tool implements.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use nexbot_core::types::ToolDefinition;

/// Default per-call execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the tool registry and executor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Narrow capability for resolving per-session secrets inside tools.
pub trait SecretsResolver: Send + Sync {
    fn resolve(&self, session_id: &str, name: &str) -> Option<String>;
}

/// Per-call execution settings handed to tools.
#[derive(Clone)]
pub struct ExecConfig {
    /// Timeout applied around each tool call.
    pub default_timeout: Duration,
    /// Session the current conversation belongs to.
    pub session_id: String,
    /// Optional secrets hook; most tools never touch it.
    pub secrets: Option<Arc<dyn SecretsResolver>>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            session_id: String::new(),
            secrets: None,
        }
    }
}

impl ExecConfig {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
///
/// The loop discovers tools via `name()`, sends their schemas to the model
/// via `to_definition()`, and the executor dispatches calls to `execute()`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used by the model to call this tool (e.g. `"spawn"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema fragment describing the parameters.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute the tool.
    ///
    /// Returns the tool output as a string (the model reads this). On
    /// failure return an `Err` — the executor converts it into an error
    /// result for the model.
    async fn execute(&self, params: HashMap<String, Value>, cfg: ExecConfig)
        -> anyhow::Result<String>;

    /// Build the definition sent to the model. Rarely overridden.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required `String` param, with a user-friendly error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract an optional `String` param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}
