//! Control commands carried in inbound-message metadata.
//!
//! Recognized commands: `new_session`, `status`, `restart`. The handler
//! depends on narrow capability traits rather than the concrete loop or
//! bus types, so either side can be swapped or mocked independently.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use nexbot_core::bus::{InboundMessage, OutboundMessage};
use nexbot_core::error::BusError;
use nexbot_core::utils::human_size;

/// Reply sent after `new_session`.
pub const SESSION_CLEARED_REPLY: &str = "✅ Session cleared. Starting a fresh conversation!";

/// Reply sent when a restart begins.
pub const RESTARTING_REPLY: &str = "🔄 Restarting...";

/// Snapshot answered by [`SessionControl::session_status`].
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub session_id: String,
    pub message_count: usize,
    pub file_size: u64,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl SessionStatus {
    /// The user-visible status report.
    pub fn render(&self) -> String {
        format!(
            "📊 **Session Status**\n\n\
             **Session ID:** `{id}`\n\
             **Messages:** {messages}\n\
             **Session Size:** {size}\n\n\
             **LLM Configuration:**\n\
             **Model:** {model}\n\
             **Temperature:** {temperature:.2}\n\
             **Max Tokens:** {max_tokens}\n",
            id = self.session_id,
            messages = self.message_count,
            size = human_size(self.file_size),
            model = self.model,
            temperature = self.temperature,
            max_tokens = self.max_tokens,
        )
    }
}

// ─────────────────────────────────────────────
// Capability traits
// ─────────────────────────────────────────────

/// What the handler needs from the session side.
#[async_trait]
pub trait SessionControl: Send + Sync {
    async fn clear_session(&self, session_id: &str) -> anyhow::Result<()>;
    async fn session_status(&self, session_id: &str) -> anyhow::Result<SessionStatus>;
}

/// What the handler needs from the bus side.
pub trait OutboundPublisher: Send + Sync {
    fn publish(&self, msg: OutboundMessage) -> Result<(), BusError>;
}

/// Callback requesting a service restart.
pub type RestartRequestFn = Arc<dyn Fn() + Send + Sync>;

/// Errors from command handling.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Not a recognized command; the caller logs it and sends no reply.
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─────────────────────────────────────────────
// CommandHandler
// ─────────────────────────────────────────────

pub struct CommandHandler {
    sessions: Arc<dyn SessionControl>,
    publisher: Arc<dyn OutboundPublisher>,
    on_restart: RestartRequestFn,
}

impl CommandHandler {
    pub fn new(
        sessions: Arc<dyn SessionControl>,
        publisher: Arc<dyn OutboundPublisher>,
        on_restart: RestartRequestFn,
    ) -> Self {
        Self {
            sessions,
            publisher,
            on_restart,
        }
    }

    /// Dispatch one command extracted from inbound metadata.
    pub async fn handle(&self, msg: &InboundMessage, command: &str) -> Result<(), CommandError> {
        info!(command = %command, session_id = %msg.session_id, "handling command");
        match command {
            "new_session" => {
                self.sessions.clear_session(&msg.session_id).await?;
                self.reply(msg, SESSION_CLEARED_REPLY);
                Ok(())
            }
            "status" => {
                let status = self.sessions.session_status(&msg.session_id).await?;
                self.reply(msg, &status.render());
                Ok(())
            }
            "restart" => {
                self.reply(msg, RESTARTING_REPLY);
                (self.on_restart)();
                Ok(())
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    fn reply(&self, msg: &InboundMessage, text: &str) {
        let out = OutboundMessage::new(
            &msg.channel,
            &msg.user_id,
            &msg.session_id,
            text,
            // Command replies correlate on the session, like agent replies.
            &msg.session_id,
        );
        if let Err(e) = self.publisher.publish(out) {
            error!(error = %e, "failed to publish command reply");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubSessions {
        cleared: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionControl for StubSessions {
        async fn clear_session(&self, session_id: &str) -> anyhow::Result<()> {
            self.cleared.lock().unwrap().push(session_id.to_string());
            Ok(())
        }

        async fn session_status(&self, session_id: &str) -> anyhow::Result<SessionStatus> {
            Ok(SessionStatus {
                session_id: session_id.to_string(),
                message_count: 7,
                file_size: 2048,
                model: "glm-4.7".into(),
                temperature: 0.7,
                max_tokens: 4096,
            })
        }
    }

    #[derive(Default)]
    struct StubPublisher {
        published: Mutex<Vec<OutboundMessage>>,
    }

    impl OutboundPublisher for StubPublisher {
        fn publish(&self, msg: OutboundMessage) -> Result<(), BusError> {
            self.published.lock().unwrap().push(msg);
            Ok(())
        }
    }

    fn make_handler() -> (
        CommandHandler,
        Arc<StubSessions>,
        Arc<StubPublisher>,
        Arc<AtomicUsize>,
    ) {
        let sessions = Arc::new(StubSessions::default());
        let publisher = Arc::new(StubPublisher::default());
        let restarts = Arc::new(AtomicUsize::new(0));
        let restarts_clone = Arc::clone(&restarts);
        let handler = CommandHandler::new(
            sessions.clone(),
            publisher.clone(),
            Arc::new(move || {
                restarts_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (handler, sessions, publisher, restarts)
    }

    fn inbound() -> InboundMessage {
        InboundMessage::new("telegram", "u1", "s1", "")
    }

    #[tokio::test]
    async fn test_new_session() {
        let (handler, sessions, publisher, _) = make_handler();

        handler.handle(&inbound(), "new_session").await.unwrap();

        assert_eq!(*sessions.cleared.lock().unwrap(), vec!["s1"]);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].content, SESSION_CLEARED_REPLY);
        assert_eq!(published[0].correlation_id, "s1");
    }

    #[tokio::test]
    async fn test_status_report_format() {
        let (handler, _sessions, publisher, _) = make_handler();

        handler.handle(&inbound(), "status").await.unwrap();

        let published = publisher.published.lock().unwrap();
        let report = &published[0].content;
        assert!(report.starts_with("📊 **Session Status**\n\n"));
        assert!(report.contains("**Session ID:** `s1`"));
        assert!(report.contains("**Messages:** 7"));
        assert!(report.contains("**Session Size:** 2.0 KB"));
        assert!(report.contains("**Model:** glm-4.7"));
        assert!(report.contains("**Temperature:** 0.70"));
        assert!(report.contains("**Max Tokens:** 4096"));
    }

    #[tokio::test]
    async fn test_restart_fires_callback() {
        let (handler, _sessions, publisher, restarts) = make_handler();

        handler.handle(&inbound(), "restart").await.unwrap();

        assert_eq!(restarts.load(Ordering::SeqCst), 1);
        assert_eq!(
            publisher.published.lock().unwrap()[0].content,
            RESTARTING_REPLY
        );
    }

    #[tokio::test]
    async fn test_unknown_command_errors_without_reply() {
        let (handler, sessions, publisher, restarts) = make_handler();

        let err = handler.handle(&inbound(), "self_destruct").await.unwrap_err();
        assert!(matches!(err, CommandError::Unknown(_)));

        // No side effects at all.
        assert!(sessions.cleared.lock().unwrap().is_empty());
        assert!(publisher.published.lock().unwrap().is_empty());
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }
}
