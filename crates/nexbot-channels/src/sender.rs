//! Message sender — turns synchronous send intent into correlated
//! pub/sub exchanges on the bus.
//!
//! Every operation publishes an [`OutboundMessage`] with a fresh
//! correlation id and waits (bounded) for the channel adapter's
//! [`SendResult`] to come back through the correlation tracker. The
//! `*_async` variants publish without registering or waiting.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use nexbot_core::bus::{MessageBus, OutboundMessage, SendResult};
use nexbot_core::error::BusError;

/// Default wait for a delivery result.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata key naming the requested channel operation.
pub const ACTION_KEY: &str = "action";
/// Metadata key carrying the target message id (edit/delete).
pub const MESSAGE_ID_KEY: &str = "message_id";
/// Metadata key carrying a local media path (photo/document).
pub const MEDIA_PATH_KEY: &str = "media_path";
/// Metadata key carrying an inline-keyboard description.
pub const KEYBOARD_KEY: &str = "keyboard";

/// Errors from the sender bridge.
#[derive(Debug, Error)]
pub enum SendError {
    /// No result arrived within the wait window.
    #[error("send timed out waiting for delivery result")]
    Timeout,

    /// The registration was dropped before a result arrived (bus stopped
    /// or the registration expired).
    #[error("send interrupted before a delivery result arrived")]
    Interrupted,

    #[error(transparent)]
    Bus(#[from] BusError),
}

// ─────────────────────────────────────────────
// MessageSender
// ─────────────────────────────────────────────

/// Correlation-tracked outbound dispatch.
pub struct MessageSender {
    bus: Arc<MessageBus>,
    default_timeout: Duration,
}

impl MessageSender {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        MessageSender {
            bus,
            default_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    // ────────────── Core dispatch ──────────────

    /// Publish `msg` and wait for its result.
    async fn dispatch(
        &self,
        msg: OutboundMessage,
        timeout: Option<Duration>,
    ) -> Result<SendResult, SendError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let correlation_id = msg.correlation_id.clone();

        // Register before publishing so the result cannot race past us.
        let rx = self.bus.tracker().register(&correlation_id, timeout);
        self.bus.publish_outbound(msg)?;
        debug!(correlation_id = %correlation_id, "outbound dispatched, awaiting result");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(SendError::Interrupted),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Publish `msg` without waiting. Returns the correlation id.
    fn dispatch_async(&self, msg: OutboundMessage) -> Result<String, SendError> {
        let correlation_id = msg.correlation_id.clone();
        self.bus.publish_outbound(msg)?;
        Ok(correlation_id)
    }

    fn outbound(
        channel: &str,
        user_id: &str,
        session_id: &str,
        content: &str,
    ) -> OutboundMessage {
        OutboundMessage::new(
            channel,
            user_id,
            session_id,
            content,
            Uuid::new_v4().to_string(),
        )
    }

    // ────────────── Send ──────────────

    pub async fn send_message(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        content: &str,
        timeout: Option<Duration>,
    ) -> Result<SendResult, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, content);
        msg.metadata.insert(ACTION_KEY.into(), "send".into());
        self.dispatch(msg, timeout).await
    }

    pub fn send_message_async(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        content: &str,
    ) -> Result<String, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, content);
        msg.metadata.insert(ACTION_KEY.into(), "send".into());
        self.dispatch_async(msg)
    }

    // ────────────── Edit ──────────────

    pub async fn edit_message(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        message_id: &str,
        content: &str,
        timeout: Option<Duration>,
    ) -> Result<SendResult, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, content);
        msg.metadata.insert(ACTION_KEY.into(), "edit".into());
        msg.metadata.insert(MESSAGE_ID_KEY.into(), message_id.into());
        self.dispatch(msg, timeout).await
    }

    pub fn edit_message_async(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<String, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, content);
        msg.metadata.insert(ACTION_KEY.into(), "edit".into());
        msg.metadata.insert(MESSAGE_ID_KEY.into(), message_id.into());
        self.dispatch_async(msg)
    }

    // ────────────── Delete ──────────────

    pub async fn delete_message(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        message_id: &str,
        timeout: Option<Duration>,
    ) -> Result<SendResult, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, "");
        msg.metadata.insert(ACTION_KEY.into(), "delete".into());
        msg.metadata.insert(MESSAGE_ID_KEY.into(), message_id.into());
        self.dispatch(msg, timeout).await
    }

    pub fn delete_message_async(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        message_id: &str,
    ) -> Result<String, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, "");
        msg.metadata.insert(ACTION_KEY.into(), "delete".into());
        msg.metadata.insert(MESSAGE_ID_KEY.into(), message_id.into());
        self.dispatch_async(msg)
    }

    // ────────────── Photo / document ──────────────

    pub async fn send_photo(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        caption: &str,
        photo_path: &str,
        timeout: Option<Duration>,
    ) -> Result<SendResult, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, caption);
        msg.metadata.insert(ACTION_KEY.into(), "photo".into());
        msg.metadata.insert(MEDIA_PATH_KEY.into(), photo_path.into());
        self.dispatch(msg, timeout).await
    }

    pub fn send_photo_async(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        caption: &str,
        photo_path: &str,
    ) -> Result<String, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, caption);
        msg.metadata.insert(ACTION_KEY.into(), "photo".into());
        msg.metadata.insert(MEDIA_PATH_KEY.into(), photo_path.into());
        self.dispatch_async(msg)
    }

    pub async fn send_document(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        caption: &str,
        document_path: &str,
        timeout: Option<Duration>,
    ) -> Result<SendResult, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, caption);
        msg.metadata.insert(ACTION_KEY.into(), "document".into());
        msg.metadata.insert(MEDIA_PATH_KEY.into(), document_path.into());
        self.dispatch(msg, timeout).await
    }

    pub fn send_document_async(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        caption: &str,
        document_path: &str,
    ) -> Result<String, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, caption);
        msg.metadata.insert(ACTION_KEY.into(), "document".into());
        msg.metadata.insert(MEDIA_PATH_KEY.into(), document_path.into());
        self.dispatch_async(msg)
    }

    // ────────────── Keyboard ──────────────

    pub async fn send_with_keyboard(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        content: &str,
        keyboard_json: &str,
        timeout: Option<Duration>,
    ) -> Result<SendResult, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, content);
        msg.metadata.insert(ACTION_KEY.into(), "keyboard".into());
        msg.metadata.insert(KEYBOARD_KEY.into(), keyboard_json.into());
        self.dispatch(msg, timeout).await
    }

    pub fn send_with_keyboard_async(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        content: &str,
        keyboard_json: &str,
    ) -> Result<String, SendError> {
        let mut msg = Self::outbound(channel, user_id, session_id, content);
        msg.metadata.insert(ACTION_KEY.into(), "keyboard".into());
        msg.metadata.insert(KEYBOARD_KEY.into(), keyboard_json.into());
        self.dispatch_async(msg)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Start an adapter stand-in that answers every outbound message with
    /// a successful SendResult.
    fn spawn_responder(bus: Arc<MessageBus>) {
        let mut rx = bus.subscribe_outbound();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let _ = bus.publish_send_result(SendResult::ok(&msg.correlation_id, &msg.channel));
            }
        });
    }

    fn started_bus() -> Arc<MessageBus> {
        let bus = Arc::new(MessageBus::new(32));
        bus.start();
        bus
    }

    #[tokio::test]
    async fn test_send_message_round_trip() {
        let bus = started_bus();
        spawn_responder(bus.clone());
        let sender = MessageSender::new(bus);

        let result = sender
            .send_message("telegram", "u1", "s1", "hello", None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.channel, "telegram");
    }

    #[tokio::test]
    async fn test_each_dispatch_gets_fresh_correlation_id() {
        let bus = started_bus();
        let sender = MessageSender::new(bus.clone());
        let mut rx = bus.subscribe_outbound();

        sender.send_message_async("cli", "u", "s", "one").unwrap();
        sender.send_message_async("cli", "u", "s", "two").unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[tokio::test]
    async fn test_send_timeout_without_responder() {
        let bus = started_bus();
        let sender = MessageSender::new(bus);

        let err = sender
            .send_message("telegram", "u1", "s1", "hello", Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Timeout));
    }

    #[tokio::test]
    async fn test_failed_delivery_is_reported() {
        let bus = started_bus();
        {
            let bus = bus.clone();
            let mut rx = bus.subscribe_outbound();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let _ = bus.publish_send_result(SendResult::failed(
                        &msg.correlation_id,
                        &msg.channel,
                        "blocked by user",
                    ));
                }
            });
        }
        let sender = MessageSender::new(bus);

        let result = sender
            .send_message("telegram", "u1", "s1", "hello", None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("blocked by user"));
    }

    #[tokio::test]
    async fn test_async_variant_skips_waiting() {
        let bus = started_bus();
        let sender = MessageSender::new(bus.clone());
        let mut rx = bus.subscribe_outbound();

        let correlation_id = sender
            .send_message_async("telegram", "u1", "s1", "fire and forget")
            .unwrap();

        let published = rx.recv().await.unwrap();
        assert_eq!(published.correlation_id, correlation_id);
        assert_eq!(published.metadata[ACTION_KEY], "send");
        // Nothing was registered for this id: a late result is unmatched.
        bus.publish_send_result(SendResult::ok(&correlation_id, "telegram"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.tracker().unmatched_results(), 1);
    }

    #[tokio::test]
    async fn test_edit_and_delete_metadata() {
        let bus = started_bus();
        let sender = MessageSender::new(bus.clone());
        let mut rx = bus.subscribe_outbound();

        sender
            .edit_message_async("telegram", "u1", "s1", "msg_9", "edited")
            .unwrap();
        let edit = rx.recv().await.unwrap();
        assert_eq!(edit.metadata[ACTION_KEY], "edit");
        assert_eq!(edit.metadata[MESSAGE_ID_KEY], "msg_9");
        assert_eq!(edit.content, "edited");

        sender
            .delete_message_async("telegram", "u1", "s1", "msg_9")
            .unwrap();
        let delete = rx.recv().await.unwrap();
        assert_eq!(delete.metadata[ACTION_KEY], "delete");
        assert_eq!(delete.metadata[MESSAGE_ID_KEY], "msg_9");
    }

    #[tokio::test]
    async fn test_media_and_keyboard_metadata() {
        let bus = started_bus();
        let sender = MessageSender::new(bus.clone());
        let mut rx = bus.subscribe_outbound();

        sender
            .send_photo_async("telegram", "u", "s", "look", "/tmp/p.jpg")
            .unwrap();
        let photo = rx.recv().await.unwrap();
        assert_eq!(photo.metadata[ACTION_KEY], "photo");
        assert_eq!(photo.metadata[MEDIA_PATH_KEY], "/tmp/p.jpg");

        sender
            .send_document_async("telegram", "u", "s", "report", "/tmp/r.pdf")
            .unwrap();
        let doc = rx.recv().await.unwrap();
        assert_eq!(doc.metadata[ACTION_KEY], "document");

        sender
            .send_with_keyboard_async("telegram", "u", "s", "pick one", r#"[["a","b"]]"#)
            .unwrap();
        let kb = rx.recv().await.unwrap();
        assert_eq!(kb.metadata[ACTION_KEY], "keyboard");
        assert_eq!(kb.metadata[KEYBOARD_KEY], r#"[["a","b"]]"#);
    }

    #[tokio::test]
    async fn test_send_on_stopped_bus() {
        let bus = started_bus();
        bus.stop().await;
        let sender = MessageSender::new(bus);

        let err = sender
            .send_message("cli", "u", "s", "late", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Bus(BusError::Stopped)));
    }
}
