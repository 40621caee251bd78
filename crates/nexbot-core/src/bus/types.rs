//! Bus event types — the payloads flowing on each topic.
//!
//! Every payload carries the same addressing envelope (channel kind,
//! user id, session id, timestamp, opaque metadata) so consumers can
//! route without knowing where a message originated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key carrying a control command on inbound messages.
///
/// Recognized values: `new_session`, `status`, `restart`.
pub const COMMAND_METADATA_KEY: &str = "command";

/// An inbound message from a channel to the agent.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel kind (e.g. "telegram", "cli").
    pub channel: String,
    /// Sender identifier within the channel.
    pub user_id: String,
    /// Conversation/session identifier.
    pub session_id: String,
    /// Text content of the message.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Channel-specific metadata (may carry [`COMMAND_METADATA_KEY`]).
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Builder-style metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The command carried in metadata, if any.
    pub fn command(&self) -> Option<&str> {
        self.metadata.get(COMMAND_METADATA_KEY).map(|s| s.as_str())
    }
}

/// An outbound message from the agent to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel kind.
    pub channel: String,
    /// Target user identifier.
    pub user_id: String,
    /// Conversation/session identifier.
    pub session_id: String,
    /// Text content to deliver.
    pub content: String,
    /// Ties this publication to its [`SendResult`].
    pub correlation_id: String,
    /// Optional formatting hint for the channel adapter (e.g. "markdown").
    pub format: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            content: content.into(),
            correlation_id: correlation_id.into(),
            format: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Kind of a lifecycle event on the event topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ProcessingStart,
    ProcessingEnd,
}

/// A lifecycle event published by the processing loop.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub channel: String,
    pub user_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        channel: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Event {
            kind,
            channel: channel.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// Delivery outcome for one outbound publication, matched by correlation id.
#[derive(Clone, Debug)]
pub struct SendResult {
    /// Correlation id of the outbound message this result answers.
    pub correlation_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub channel: String,
    pub user_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl SendResult {
    /// A successful delivery result.
    pub fn ok(correlation_id: impl Into<String>, channel: impl Into<String>) -> Self {
        SendResult {
            correlation_id: correlation_id.into(),
            success: true,
            error: None,
            channel: channel.into(),
            user_id: String::new(),
            session_id: String::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// A failed delivery result.
    pub fn failed(
        correlation_id: impl Into<String>,
        channel: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        SendResult {
            correlation_id: correlation_id.into(),
            success: false,
            error: Some(error.into()),
            channel: channel.into(),
            user_id: String::new(),
            session_id: String::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}
