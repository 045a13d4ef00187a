//! Append-only per-session message logs.
//!
//! Messages are deep-copied on the way in and on the way out, so a
//! caller mutating its own copies can never corrupt stored history.
//! Each session persists to its own JSON file under
//! `<state>/sessions/`; writes replace the whole file via a temp-file
//! rename so a crash mid-write never leaves a torn log.
//!
//! The store serializes access to the key→log map; serializing turns
//! *within* one key is the caller's job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use px_domain::chat::Message;
use px_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One session's log plus bookkeeping counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionLog {
    session_key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    messages: Vec<Message>,
}

impl SessionLog {
    fn new(session_key: &str) -> Self {
        let now = Utc::now();
        Self {
            session_key: session_key.to_owned(),
            created_at: now,
            updated_at: now,
            input_tokens: 0,
            output_tokens: 0,
            messages: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory message logs with per-key JSON persistence.
pub struct MessageStore {
    dir: PathBuf,
    logs: RwLock<HashMap<String, SessionLog>>,
}

impl MessageStore {
    /// Create the store rooted at `<state_path>/sessions/`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        Ok(Self {
            dir,
            logs: RwLock::new(HashMap::new()),
        })
    }

    /// Append a message to a session's log. The message is cloned on
    /// entry; later mutation by the caller cannot reach the log.
    pub fn append(&self, session_key: &str, message: &Message) {
        let mut logs = self.logs.write();
        let log = logs
            .entry(session_key.to_owned())
            .or_insert_with(|| self.load_or_create(session_key));
        log.messages.push(message.clone());
        log.updated_at = Utc::now();
    }

    /// Load a session's messages as deep copies. An unknown key yields
    /// an empty history (falling back to disk on first touch).
    pub fn load(&self, session_key: &str) -> Vec<Message> {
        {
            let logs = self.logs.read();
            if let Some(log) = logs.get(session_key) {
                return log.messages.clone();
            }
        }

        let loaded = self.load_or_create(session_key);
        let messages = loaded.messages.clone();
        self.logs.write().insert(session_key.to_owned(), loaded);
        messages
    }

    /// Persist a session's log: serialize, write to a temp file in the
    /// same directory, rename over the target.
    pub fn save(&self, session_key: &str) -> Result<()> {
        let logs = self.logs.read();
        let Some(log) = logs.get(session_key) else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(log)?;
        let path = self.session_path(session_key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &path).map_err(Error::Io)?;

        tracing::debug!(
            session = session_key,
            messages = log.messages.len(),
            "session log saved"
        );
        Ok(())
    }

    /// Update token counters for a session.
    pub fn record_usage(&self, session_key: &str, input_tokens: u64, output_tokens: u64) {
        let mut logs = self.logs.write();
        if let Some(log) = logs.get_mut(session_key) {
            log.input_tokens += input_tokens;
            log.output_tokens += output_tokens;
            log.updated_at = Utc::now();
        }
    }

    /// Session keys currently held in memory.
    pub fn list_keys(&self) -> Vec<String> {
        self.logs.read().keys().cloned().collect()
    }

    // ── Internal ───────────────────────────────────────────────────

    fn session_path(&self, session_key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(session_key)))
    }

    fn load_or_create(&self, session_key: &str) -> SessionLog {
        let path = self.session_path(session_key);
        if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| serde_json::from_str(&raw).map_err(Error::Json))
            {
                Ok(log) => return log,
                Err(e) => {
                    tracing::warn!(
                        session = session_key,
                        error = %e,
                        "unreadable session log, starting fresh"
                    );
                }
            }
        }
        SessionLog::new(session_key)
    }
}

/// Make a session key filesystem-safe.
fn sanitize_key(key: &str) -> String {
    key.replace(['/', ':'], "_")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
