//! Provider trait — the single seam between the agent core and any
//! language-model backend.

use async_trait::async_trait;
use thiserror::Error;

use nexbot_core::types::{LlmResponse, Message, ToolDefinition};

/// One chat completion request.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Conversation history, system prompt first.
    pub messages: Vec<Message>,
    /// Tool definitions the model may call; `None` disables tool calling
    /// for this request.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, model: impl Into<String>) -> Self {
        ChatRequest {
            messages,
            tools: None,
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Provider failures. These propagate to the orchestrator, whose retry
/// policy decides what happens next.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure (connect, timeout, TLS, …).
    #[error("provider transport: {0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("provider api error {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("provider response decode: {0}")]
    Decode(String),
}

/// A language-model endpoint.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a chat completion request. Failures are returned, not folded
    /// into the response, so callers can retry.
    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse, ProviderError>;

    /// Whether this provider accepts tool definitions. When `false`, the
    /// agent loop omits tool schemas from its requests.
    fn supports_tool_calling(&self) -> bool;

    /// The default model for this provider instance.
    fn default_model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("display_name", &self.display_name())
            .finish()
    }
}
