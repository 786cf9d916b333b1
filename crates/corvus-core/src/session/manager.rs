//! Session persistence and caching.
//!
//! File format: a single JSON document per session at
//! `~/.corvus/sessions/{safe_key}.json`, written atomically (tmp file +
//! rename) after every append so a crash never leaves a partial file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils;

/// Summarize the session once its estimated token usage crosses this
/// fraction of the model's context window.
pub const SUMMARIZATION_THRESHOLD: f64 = 0.75;
/// Number of most-recent messages kept verbatim across a summarization pass.
pub const SUMMARIZATION_TAIL: usize = 4;

/// Cheap token estimate: ~4 characters per token for English-centric text.
/// Good enough to drive the summarization trigger; never meant to match a
/// real tokenizer exactly.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(|m| message_char_len(m)).sum();
    chars / 4
}

fn message_char_len(message: &Message) -> usize {
    serde_json::to_string(message).map(|s| s.len()).unwrap_or(0)
}

/// What `Stop` observed for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    Idle,
}

impl StopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopOutcome::Stopped => "stopped",
            StopOutcome::Idle => "idle",
        }
    }
}

// ─────────────────────────────────────────────
// SessionManager
// ─────────────────────────────────────────────

/// Manages conversation sessions with in-memory caching and single-file
/// JSON persistence, plus the per-key cancellation handles used by the
/// agent loop's single-flight dispatch.
///
/// Thread-safe via `RwLock` — multiple readers, exclusive writer. The
/// cancellation map is guarded by its own lock, independent of the session
/// history lock, so a `Stop` never has to wait on an in-flight history
/// write.
pub struct SessionManager {
    /// Directory where `.json` session files are stored.
    sessions_dir: PathBuf,
    /// In-memory cache of active sessions.
    cache: RwLock<HashMap<String, Session>>,
    /// Cancellation token per session key, present only while a run is
    /// in flight (Running state); absent means Idle.
    running: RwLock<HashMap<String, CancellationToken>>,
}

impl SessionManager {
    /// Create a new session manager.
    ///
    /// `sessions_dir` defaults to `~/.corvus/sessions/` if `None`.
    /// The directory is created if it doesn't exist.
    pub fn new(sessions_dir: Option<PathBuf>) -> std::io::Result<Self> {
        let dir = sessions_dir.unwrap_or_else(utils::get_sessions_path);
        std::fs::create_dir_all(&dir)?;

        Ok(SessionManager {
            sessions_dir: dir,
            cache: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
        })
    }

    /// Get an existing session or create a new one.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let cache = self.cache.read().unwrap();
            if let Some(session) = cache.get(key) {
                return session.clone();
            }
        }

        if let Some(session) = self.load_from_disk(key) {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
            return session;
        }

        let session = Session::new(key);
        let mut cache = self.cache.write().unwrap();
        cache.insert(key.to_string(), session.clone());
        session
    }

    /// Add a message to a session and persist to disk.
    pub fn add_message(&self, key: &str, message: Message) {
        let mut session = self.get_or_create(key);
        session.messages.push(message);
        session.updated_at = Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }

        if let Err(e) = self.save_to_disk(&session) {
            warn!("Failed to persist session {}: {}", key, e);
        }
    }

    /// Summarize `key`'s history if its estimated token count exceeds
    /// `SUMMARIZATION_THRESHOLD` of `context_window` tokens.
    ///
    /// `summarize` is invoked with the prefix to collapse (everything
    /// except the last `SUMMARIZATION_TAIL` messages) and must return the
    /// summary text. On failure, falls back to FIFO-truncating the oldest
    /// messages until the estimate fits the budget.
    pub async fn maybe_summarize<F, Fut>(
        &self,
        key: &str,
        context_window: usize,
        summarize: F,
    ) where
        F: FnOnce(Vec<Message>) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<String>>,
    {
        let session = self.get_or_create(key);
        let budget = (context_window as f64 * SUMMARIZATION_THRESHOLD) as usize;
        if estimate_tokens(&session.messages) <= budget || session.messages.len() <= SUMMARIZATION_TAIL {
            return;
        }

        let split = session.messages.len() - SUMMARIZATION_TAIL;
        let (prefix, tail) = session.messages.split_at(split);
        let tail = tail.to_vec();

        match summarize(prefix.to_vec()).await {
            Ok(summary) => {
                let mut messages = vec![Message::system(format!(
                    "Summary of earlier conversation: {summary}"
                ))];
                messages.extend(tail);
                self.replace_history(key, messages);
                debug!(session_key = %key, "summarized session history");
            }
            Err(e) => {
                warn!(session_key = %key, error = %e, "summarization failed, truncating FIFO");
                let mut messages = session.messages.clone();
                while estimate_tokens(&messages) > budget && messages.len() > SUMMARIZATION_TAIL {
                    messages.remove(0);
                }
                self.replace_history(key, messages);
            }
        }
    }

    /// Replace a session's message list wholesale (used by summarization).
    fn replace_history(&self, key: &str, messages: Vec<Message>) {
        let mut session = self.get_or_create(key);
        session.messages = messages;
        session.updated_at = Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }

        if let Err(e) = self.save_to_disk(&session) {
            warn!("Failed to persist summarized session {}: {}", key, e);
        }
    }

    /// Get the last `max_messages` from a session's history.
    pub fn get_history(&self, key: &str, max_messages: usize) -> Vec<Message> {
        let session = self.get_or_create(key);
        let len = session.messages.len();
        if len <= max_messages {
            session.messages
        } else {
            session.messages[len - max_messages..].to_vec()
        }
    }

    /// Clear all messages in a session (reset conversation).
    pub fn clear(&self, key: &str) {
        let mut session = self.get_or_create(key);
        session.messages.clear();
        session.updated_at = Utc::now();

        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(key.to_string(), session.clone());
        }

        if let Err(e) = self.save_to_disk(&session) {
            warn!("Failed to persist cleared session {}: {}", key, e);
        }
    }

    /// Delete a session entirely (from cache and disk).
    pub fn delete(&self, key: &str) -> bool {
        {
            let mut cache = self.cache.write().unwrap();
            cache.remove(key);
        }
        {
            let mut running = self.running.write().unwrap();
            running.remove(key);
        }

        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to delete session file: {}", e);
                return false;
            }
            debug!("Deleted session file: {}", path.display());
            true
        } else {
            false
        }
    }

    /// List all sessions from disk, optionally filtered to those whose key
    /// starts with `prefix`. Sorted by `updated_at` (newest first).
    pub fn list_sessions(&self, prefix: Option<&str>) -> Vec<SessionSummary> {
        let mut summaries = Vec::new();

        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read sessions directory: {}", e);
                return summaries;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            if let Ok(content) = std::fs::read_to_string(&path) {
                if let Ok(session) = serde_json::from_str::<Session>(&content) {
                    if let Some(p) = prefix {
                        if !session.key.starts_with(p) {
                            continue;
                        }
                    }
                    summaries.push(SessionSummary {
                        key: session.key.clone(),
                        created_at: session.created_at,
                        updated_at: session.updated_at,
                        message_count: session.messages.len(),
                        path: path.clone(),
                    });
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Begin a Running state for `key`: stores and returns a fresh
    /// cancellation token. Callers must call `end_run` when done.
    pub fn begin_run(&self, key: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut running = self.running.write().unwrap();
        running.insert(key.to_string(), token.clone());
        token
    }

    /// Atomically check-and-set: begin a Running state for `key` only if it
    /// isn't already running. Returns `None` (reject with `Busy`) if a run
    /// is already in flight for this key.
    pub fn try_begin_run(&self, key: &str) -> Option<CancellationToken> {
        let mut running = self.running.write().unwrap();
        if running.contains_key(key) {
            return None;
        }
        let token = CancellationToken::new();
        running.insert(key.to_string(), token.clone());
        Some(token)
    }

    /// Whether `key` currently has an in-flight agent-loop invocation.
    pub fn is_running(&self, key: &str) -> bool {
        self.running.read().unwrap().contains_key(key)
    }

    /// End the Running state for `key` (transition back to Idle).
    pub fn end_run(&self, key: &str) {
        self.running.write().unwrap().remove(key);
    }

    /// Cancel the in-flight invocation for `key`, if any.
    pub fn stop(&self, key: &str) -> StopOutcome {
        let running = self.running.read().unwrap();
        match running.get(key) {
            Some(token) => {
                token.cancel();
                StopOutcome::Stopped
            }
            None => StopOutcome::Idle,
        }
    }

    /// Number of sessions with an in-flight agent-loop invocation.
    pub fn running_count(&self) -> usize {
        self.running.read().unwrap().len()
    }

    /// Cancel every in-flight invocation, across all session keys.
    pub fn cancel_all(&self) {
        for token in self.running.read().unwrap().values() {
            token.cancel();
        }
    }

    /// Get the JSON file path for a session key.
    fn session_path(&self, key: &str) -> PathBuf {
        let safe_key = utils::safe_filename(&key.replace(':', "_"));
        self.sessions_dir.join(format!("{}.json", safe_key))
    }

    /// Load a session from its JSON file.
    fn load_from_disk(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read session file {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Session>(&content) {
            Ok(session) => {
                debug!(
                    "Loaded session '{}' with {} messages from disk",
                    key,
                    session.messages.len()
                );
                Some(session)
            }
            Err(e) => {
                warn!("Failed to parse session file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Save a session to disk atomically: write to a sibling `.tmp` file,
    /// then rename over the target. A reader never observes a partial file.
    fn save_to_disk(&self, session: &Session) -> std::io::Result<()> {
        let path = self.session_path(&session.key);
        let tmp_path = path.with_extension("json.tmp");

        let body = serde_json::to_string_pretty(session)?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &path)?;

        debug!(
            "Saved session '{}' ({} messages) to {}",
            session.key,
            session.messages.len(),
            path.display()
        );
        Ok(())
    }
}

/// Summary of a session for listing purposes.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SessionSummary {
    /// Session key (e.g. `"telegram:12345"`).
    pub key: String,
    /// When the session was created.
    pub created_at: chrono::DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: chrono::DateTime<Utc>,
    /// Number of messages currently in the session.
    pub message_count: usize,
    /// Path to the JSON file.
    pub path: PathBuf,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
