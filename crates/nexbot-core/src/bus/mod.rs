//! In-process pub/sub fabric: topical queues, fan-out delivery, and the
//! correlation tracker matching outbound messages to their send results.

pub mod queue;
pub mod tracker;
pub mod types;

pub use queue::MessageBus;
pub use tracker::ResultTracker;
pub use types::{Event, EventKind, InboundMessage, OutboundMessage, SendResult};
