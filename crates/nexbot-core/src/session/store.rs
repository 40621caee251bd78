//! Session persistence — one append-only JSONL file per conversation.
//!
//! File format: `<base>/<safe_id>.jsonl`, one envelope per line:
//! `{"message":{…},"timestamp":"<RFC3339>","metadata":null}`
//!
//! Mutations on one session serialize under that session's lock from a
//! lazily-populated lock map; operations on distinct sessions run
//! concurrently. Readers tolerate CRLF line endings, blank lines, and
//! malformed records (skipped with a warning).

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::types::Message;
use crate::utils;

/// Envelope written as one line per appended message.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    message: Message,
    timestamp: DateTime<Utc>,
    metadata: Option<HashMap<String, String>>,
}

/// Handle returned by [`SessionStore::get_or_create`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub id: String,
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// SessionStore
// ─────────────────────────────────────────────

/// File-backed store of per-conversation message logs.
pub struct SessionStore {
    base_dir: PathBuf,
    /// fsync after each append (durability over throughput).
    fsync: bool,
    /// Per-session locks, created on first touch.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionStore {
    /// Create a store rooted at `base_dir`; the directory is created if
    /// missing.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(SessionStore {
            base_dir,
            fsync: false,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Enable fsync-per-append.
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// A child store rooted at `<base>/<name>` (used for subagent
    /// sessions). Lock maps are independent; ids never overlap across
    /// stores.
    pub fn subdir(&self, name: &str) -> Result<SessionStore, SessionError> {
        let mut child = SessionStore::new(self.base_dir.join(name))?;
        child.fsync = self.fsync;
        Ok(child)
    }

    /// The directory this store writes into.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", utils::safe_filename(id)))
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // ────────────── Operations ──────────────

    /// Get a session handle, creating the backing file when absent.
    /// Returns `true` when the session was created by this call.
    pub async fn get_or_create(&self, id: &str) -> Result<(SessionHandle, bool), SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let path = self.session_path(id);
        let created = !path.exists();
        if created {
            std::fs::File::create(&path)?;
            debug!(session_id = %id, "created session file");
        }
        Ok((
            SessionHandle {
                id: id.to_string(),
                path,
            },
            created,
        ))
    }

    /// Append one message. After a successful return the message is on
    /// disk at the tail of the log.
    pub async fn append(&self, id: &str, message: &Message) -> Result<(), SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = SessionRecord {
            message: message.clone(),
            timestamp: Utc::now(),
            metadata: None,
        };
        let line = serde_json::to_string(&record)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(id))?;
        writeln!(file, "{}", line)?;
        if self.fsync {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Read the full message sequence, in append order. A missing file
    /// reads as the empty sequence.
    pub async fn read(&self, id: &str) -> Result<Vec<Message>, SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.read_unlocked(id)
    }

    fn read_unlocked(&self, id: &str) -> Result<Vec<Message>, SessionError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)?;
        let mut messages = Vec::new();
        for line in content.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionRecord>(line) {
                Ok(record) => messages.push(record.message),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "skipping malformed session record");
                }
            }
        }
        Ok(messages)
    }

    /// Empty the session's message sequence, keeping the session itself.
    pub async fn clear(&self, id: &str) -> Result<(), SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.session_path(id))?;
        debug!(session_id = %id, "cleared session");
        Ok(())
    }

    /// Remove the session's backing file. Returns `true` if it existed.
    pub async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        match std::fs::remove_file(self.session_path(id)) {
            Ok(()) => {
                debug!(session_id = %id, "deleted session");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of messages currently in the session.
    pub async fn message_count(&self, id: &str) -> Result<usize, SessionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        Ok(self.read_unlocked(id)?.len())
    }

    /// Size of the backing file in bytes (0 when absent).
    pub async fn file_size(&self, id: &str) -> Result<u64, SessionError> {
        let path = self.session_path(id);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
