//! Correlation tracker — matches outbound publications to their SendResult.
//!
//! Callers register a correlation id and receive a one-shot channel; when
//! the matching result is published on the bus it is delivered there and
//! the registration removed. Registrations carry a deadline and are swept
//! periodically so abandoned waits do not leak.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::types::SendResult;

struct Pending {
    tx: oneshot::Sender<SendResult>,
    deadline: Instant,
}

/// Tracks in-flight correlation ids awaiting a [`SendResult`].
#[derive(Default)]
pub struct ResultTracker {
    pending: Mutex<HashMap<String, Pending>>,
    unmatched: AtomicU64,
    expired: AtomicU64,
}

impl ResultTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a correlation id. The returned receiver yields the matching
    /// result exactly once; registrations unclaimed after `ttl` are evicted
    /// by [`sweep_expired`](Self::sweep_expired).
    pub fn register(&self, correlation_id: impl Into<String>, ttl: Duration) -> oneshot::Receiver<SendResult> {
        let (tx, rx) = oneshot::channel();
        let entry = Pending {
            tx,
            deadline: Instant::now() + ttl,
        };
        let mut pending = self.pending.lock().unwrap();
        if pending.insert(correlation_id.into(), entry).is_some() {
            // A duplicate id orphans the previous waiter; its receiver sees
            // a closed channel.
            warn!("correlation id re-registered, dropping previous waiter");
        }
        rx
    }

    /// Deliver a result to its registered waiter. Returns `false` (and
    /// bumps the unmatched counter) when no registration matches.
    pub fn deliver(&self, result: SendResult) -> bool {
        let entry = {
            let mut pending = self.pending.lock().unwrap();
            pending.remove(&result.correlation_id)
        };
        match entry {
            Some(p) => {
                // The waiter may have given up; a dropped receiver is not
                // an error here.
                let _ = p.tx.send(result);
                true
            }
            None => {
                self.unmatched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %result.correlation_id,
                    "discarding unmatched send result"
                );
                false
            }
        }
    }

    /// Evict registrations whose deadline has passed. Returns how many
    /// were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|_, p| p.deadline > now);
        let removed = before - pending.len();
        if removed > 0 {
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed = removed, "swept expired correlation registrations");
        }
        removed
    }

    /// Number of registrations currently awaiting a result.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Total results delivered with no matching registration.
    pub fn unmatched_results(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    /// Total registrations evicted by the sweep.
    pub fn expired_registrations(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    /// Drop all registrations (bus shutdown). Waiters see closed channels.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }
}
