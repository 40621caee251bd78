//! Channel bridge for Nexbot.
//!
//! Concrete chat-channel adapters live outside this workspace; they
//! subscribe to outbound messages on the bus and answer with send
//! results. This crate provides the caller-facing half: the
//! [`MessageSender`], which correlates each outbound publication with its
//! delivery result.

pub mod sender;

pub use sender::{MessageSender, SendError, DEFAULT_SEND_TIMEOUT};
