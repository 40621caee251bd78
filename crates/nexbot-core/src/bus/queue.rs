//! Async message bus — the central nervous system of Nexbot.
//!
//! Four topics (inbound, outbound, event, send-result) each back onto a
//! bounded central queue. A per-topic dispatcher task fans messages out to
//! every subscriber's own bounded channel. Publishing never blocks: a full
//! central queue rejects with [`BusError::BufferFull`], and a slow
//! subscriber loses the newest message for that subscriber only (counted,
//! never back-pressuring publishers).
//!
//! Send results are routed into the [`ResultTracker`] rather than to
//! subscribers; callers that published an outbound message wait on their
//! registered one-shot channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::tracker::ResultTracker;
use super::types::{Event, InboundMessage, OutboundMessage, SendResult};
use crate::error::BusError;

/// Interval between correlation-registration sweeps.
const TRACKER_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────
// Topic
// ─────────────────────────────────────────────

/// One bounded topic: a central queue plus fan-out subscribers.
struct Topic<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<T>>>>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> Topic<T> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Topic {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Non-blocking publish onto the central queue.
    fn publish(&self, msg: T) -> Result<(), BusError> {
        let tx = self.tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) => tx.try_send(msg).map_err(|e| match e {
                TrySendError::Full(_) => BusError::BufferFull,
                TrySendError::Closed(_) => BusError::Stopped,
            }),
            None => Err(BusError::Stopped),
        }
    }

    /// Register a new subscriber and return its delivery channel.
    fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Spawn the dispatcher that drains the central queue into every
    /// subscriber channel. Deliveries to one subscriber are FIFO; a full
    /// subscriber buffer drops that message for that subscriber only.
    fn spawn_dispatcher(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().unwrap().take()?;
        let subscribers = Arc::clone(&self.subscribers);
        let dropped = Arc::clone(&self.dropped);

        Some(tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let mut subs = subscribers.lock().unwrap();
                subs.retain(|sub| match sub.try_send(msg.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        true
                    }
                    // Receiver dropped: prune the subscription.
                    Err(TrySendError::Closed(_)) => false,
                });
            }
            // Queue closed and drained; closing the senders terminates
            // every subscriber sequence.
            subscribers.lock().unwrap().clear();
        }))
    }

    /// Close the central queue; the dispatcher drains and exits.
    fn close(&self) {
        *self.tx.lock().unwrap() = None;
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────
// MessageBus
// ─────────────────────────────────────────────

/// The message bus connecting channels, the agent, and the sender bridge.
pub struct MessageBus {
    inbound: Topic<InboundMessage>,
    outbound: Topic<OutboundMessage>,
    events: Topic<Event>,
    send_results: Topic<SendResult>,
    tracker: Arc<ResultTracker>,
    stopped: AtomicBool,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageBus {
    /// Create a new message bus; every topic buffer holds `capacity`
    /// messages.
    pub fn new(capacity: usize) -> Self {
        MessageBus {
            inbound: Topic::new(capacity),
            outbound: Topic::new(capacity),
            events: Topic::new(capacity),
            send_results: Topic::new(capacity),
            tracker: Arc::new(ResultTracker::new()),
            stopped: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the per-topic dispatchers and the tracker sweep.
    ///
    /// Publishing before `start` buffers into the central queues; nothing
    /// is delivered until the dispatchers run. Calling `start` twice is a
    /// no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().unwrap();
        tasks.extend(self.inbound.spawn_dispatcher());
        tasks.extend(self.outbound.spawn_dispatcher());
        tasks.extend(self.events.spawn_dispatcher());

        // Send results feed the correlation tracker, not subscribers.
        if let Some(mut rx) = self.send_results.rx.lock().unwrap().take() {
            let tracker = Arc::clone(&self.tracker);
            tasks.push(tokio::spawn(async move {
                while let Some(result) = rx.recv().await {
                    tracker.deliver(result);
                }
            }));
        }

        let tracker = Arc::clone(&self.tracker);
        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(TRACKER_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        tracker.sweep_expired();
                    }
                }
            }
        }));

        info!("message bus started");
    }

    /// Stop the bus: reject further publishes, drain the central queues,
    /// and close every subscriber sequence.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inbound.close();
        self.outbound.close();
        self.events.close();
        self.send_results.close();
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.tracker.clear();
        debug!("message bus stopped");
    }

    /// Whether [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // ────────────── Publish ──────────────

    pub fn publish_inbound(&self, msg: InboundMessage) -> Result<(), BusError> {
        self.check_running()?;
        self.inbound.publish(msg)
    }

    pub fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), BusError> {
        self.check_running()?;
        self.outbound.publish(msg)
    }

    pub fn publish_event(&self, event: Event) -> Result<(), BusError> {
        self.check_running()?;
        self.events.publish(event)
    }

    /// Publish a delivery result; it is routed to the waiter registered
    /// under the same correlation id. Results with no registration are
    /// discarded (observable via the tracker's unmatched counter).
    pub fn publish_send_result(&self, result: SendResult) -> Result<(), BusError> {
        self.check_running()?;
        self.send_results.publish(result)
    }

    fn check_running(&self) -> Result<(), BusError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(BusError::Stopped)
        } else {
            Ok(())
        }
    }

    // ────────────── Subscribe ──────────────

    /// Subscribe to inbound messages. Each subscriber sees every message
    /// (fan-out); dropping the receiver unsubscribes.
    pub fn subscribe_inbound(&self) -> mpsc::Receiver<InboundMessage> {
        self.guarded_subscribe(&self.inbound)
    }

    pub fn subscribe_outbound(&self) -> mpsc::Receiver<OutboundMessage> {
        self.guarded_subscribe(&self.outbound)
    }

    pub fn subscribe_events(&self) -> mpsc::Receiver<Event> {
        self.guarded_subscribe(&self.events)
    }

    fn guarded_subscribe<T: Clone + Send + 'static>(&self, topic: &Topic<T>) -> mpsc::Receiver<T> {
        if self.is_stopped() {
            // A closed receiver: the sender is dropped immediately.
            let (_tx, rx) = mpsc::channel(1);
            return rx;
        }
        topic.subscribe()
    }

    // ────────────── Observability ──────────────

    /// The correlation tracker (register waits here).
    pub fn tracker(&self) -> &ResultTracker {
        &self.tracker
    }

    /// Total messages dropped for slow subscribers, across all topics.
    pub fn dropped_messages(&self) -> u64 {
        self.inbound.dropped() + self.outbound.dropped() + self.events.dropped()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::types::EventKind;

    #[tokio::test]
    async fn test_inbound_flow() {
        let bus = MessageBus::new(16);
        bus.start();
        let mut rx = bus.subscribe_inbound();

        bus.publish_inbound(InboundMessage::new("telegram", "u1", "s1", "Hello!"))
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.channel, "telegram");
        assert_eq!(received.content, "Hello!");
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = MessageBus::new(16);
        bus.start();
        let mut rx = bus.subscribe_inbound();

        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("cli", "local", "s1", format!("msg-{i}")))
                .unwrap();
        }

        assert_eq!(rx.recv().await.unwrap().content, "msg-1");
        assert_eq!(rx.recv().await.unwrap().content, "msg-2");
        assert_eq!(rx.recv().await.unwrap().content, "msg-3");
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let bus = MessageBus::new(16);
        bus.start();
        let mut a = bus.subscribe_events();
        let mut b = bus.subscribe_events();

        bus.publish_event(Event::new(EventKind::ProcessingStart, "cli", "u", "s"))
            .unwrap();

        assert_eq!(a.recv().await.unwrap().kind, EventKind::ProcessingStart);
        assert_eq!(b.recv().await.unwrap().kind, EventKind::ProcessingStart);
    }

    #[tokio::test]
    async fn test_buffer_full_before_start() {
        // Without a dispatcher draining, the central queue fills up.
        let bus = MessageBus::new(2);
        bus.publish_inbound(InboundMessage::new("cli", "u", "s", "1"))
            .unwrap();
        bus.publish_inbound(InboundMessage::new("cli", "u", "s", "2"))
            .unwrap();
        let err = bus
            .publish_inbound(InboundMessage::new("cli", "u", "s", "3"))
            .unwrap_err();
        assert_eq!(err, BusError::BufferFull);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_newest() {
        let bus = MessageBus::new(2);
        bus.start();
        let mut rx = bus.subscribe_outbound();

        // Publish more than the subscriber buffer holds, without consuming.
        for i in 0..10 {
            // The central queue may momentarily fill while the dispatcher
            // catches up; yield and retry.
            loop {
                let msg = OutboundMessage::new("cli", "u", "s", format!("m{i}"), format!("c{i}"));
                match bus.publish_outbound(msg) {
                    Ok(()) => break,
                    Err(BusError::BufferFull) => tokio::task::yield_now().await,
                    Err(e) => panic!("unexpected: {e}"),
                }
            }
        }

        // Let the dispatcher run dry.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bus.dropped_messages() > 0);

        // The subscriber still gets the oldest messages, in order.
        assert_eq!(rx.recv().await.unwrap().content, "m0");
        assert_eq!(rx.recv().await.unwrap().content, "m1");
    }

    #[tokio::test]
    async fn test_publish_after_stop() {
        let bus = MessageBus::new(16);
        bus.start();
        bus.stop().await;

        let err = bus
            .publish_inbound(InboundMessage::new("cli", "u", "s", "late"))
            .unwrap_err();
        assert_eq!(err, BusError::Stopped);
        let err = bus
            .publish_send_result(SendResult::ok("c", "cli"))
            .unwrap_err();
        assert_eq!(err, BusError::Stopped);
    }

    #[tokio::test]
    async fn test_stop_terminates_subscriber_sequences() {
        let bus = MessageBus::new(16);
        bus.start();
        let mut rx = bus.subscribe_inbound();

        bus.publish_inbound(InboundMessage::new("cli", "u", "s", "pre-stop"))
            .unwrap();
        bus.stop().await;

        // Buffered message still delivered (drain), then the sequence ends.
        assert_eq!(rx.recv().await.unwrap().content, "pre-stop");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_result_reaches_registered_waiter() {
        let bus = MessageBus::new(16);
        bus.start();

        let rx = bus.tracker().register("corr-7", Duration::from_secs(5));
        bus.publish_send_result(SendResult::ok("corr-7", "telegram"))
            .unwrap();

        let result = rx.await.unwrap();
        assert!(result.success);
        assert_eq!(result.correlation_id, "corr-7");
    }

    #[tokio::test]
    async fn test_unmatched_send_result_discarded() {
        let bus = MessageBus::new(16);
        bus.start();

        bus.publish_send_result(SendResult::ok("ghost", "telegram"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.tracker().unmatched_results(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_after_stop_is_closed() {
        let bus = MessageBus::new(16);
        bus.start();
        bus.stop().await;

        let mut rx = bus.subscribe_inbound();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_no_drops_under_normal_load() {
        let bus = MessageBus::new(32);
        bus.start();
        let mut rx = bus.subscribe_inbound();

        for i in 0..20 {
            bus.publish_inbound(InboundMessage::new("cli", "u", "s", format!("m{i}")))
                .unwrap();
            let _ = rx.recv().await.unwrap();
        }
        assert_eq!(bus.dropped_messages(), 0);
    }
}
