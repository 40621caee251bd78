//! Message tool — lets the agent push a message to a channel mid-turn,
//! through the sender bridge (correlated delivery, fire-and-forget).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use nexbot_channels::MessageSender;

use super::base::{optional_string, require_string, ExecConfig, Tool};

pub struct MessageTool {
    sender: Arc<MessageSender>,
    /// Channel used when the model does not name one.
    default_channel: String,
}

impl MessageTool {
    pub fn new(sender: Arc<MessageSender>, default_channel: impl Into<String>) -> Self {
        Self {
            sender,
            default_channel: default_channel.into(),
        }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user immediately, before your final response. \
         Useful for progress updates during long tasks."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message text to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Optional channel override"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(
        &self,
        params: HashMap<String, Value>,
        cfg: ExecConfig,
    ) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        let channel =
            optional_string(&params, "channel").unwrap_or_else(|| self.default_channel.clone());

        // Fire-and-forget: the agent should not stall mid-turn waiting for
        // the adapter's delivery result.
        let correlation_id = self
            .sender
            .send_message_async(&channel, "", &cfg.session_id, &content)
            .map_err(|e| anyhow::anyhow!("failed to publish message: {e}"))?;

        Ok(format!("Message dispatched (correlation {correlation_id})."))
    }
}
