//! Conversation sessions: a rolling transcript per chat thread, kept in the
//! remote KV store.
//!
//! Sessions are keyed by a platform-derived id (thread root id or chat id) and
//! hold an ordered list of user/assistant turns. The stored value expires six
//! hours after the last write, so active threads never lapse mid-conversation
//! while abandoned ones self-clean. Missing or unparseable stored data reads
//! as an empty transcript; state here is advisory, never fatal.

use crate::kv::{KvClient, KvError};
use serde::{Deserialize, Serialize};

/// Transcript length cap. Older turns are dropped from the head on save.
pub const MAX_HISTORY: usize = 50;

/// Sliding expiry for a session's stored transcript (seconds).
const SESSION_TTL_SECS: u64 = 21_600;

/// A single turn in a session (role + content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
}

impl SessionMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// KV-backed store for session transcripts (load, save, clear).
#[derive(Clone)]
pub struct SessionStore {
    kv: KvClient,
}

impl SessionStore {
    pub fn new(kv: KvClient) -> Self {
        Self { kv }
    }

    fn key(session_id: &str) -> String {
        format!("session:{}", session_id)
    }

    /// Load the transcript for a session. Absent key or unparseable stored
    /// value yields an empty transcript; only transport errors surface, so the
    /// caller can decide to proceed without history.
    pub async fn load(&self, session_id: &str) -> Result<Vec<SessionMessage>, KvError> {
        let Some(raw) = self.kv.get(&Self::key(session_id)).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                log::warn!(
                    "session {}: stored transcript unparseable, treating as empty: {}",
                    session_id,
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    /// Persist the transcript, keeping only the most recent turns, and refresh
    /// the expiry (sliding window).
    pub async fn save(&self, session_id: &str, messages: &[SessionMessage]) -> Result<(), KvError> {
        let recent = trim_to_recent(messages);
        let raw = serde_json::to_string(recent)
            .map_err(|e| KvError::Api(format!("serializing transcript: {}", e)))?;
        self.kv
            .set(&Self::key(session_id), &raw, Some(SESSION_TTL_SECS))
            .await
    }

    /// Delete the stored transcript. Clearing an absent session is fine.
    pub async fn clear(&self, session_id: &str) -> Result<(), KvError> {
        self.kv.delete(&Self::key(session_id)).await
    }
}

/// Last MAX_HISTORY turns of a transcript, oldest dropped first.
fn trim_to_recent(messages: &[SessionMessage]) -> &[SessionMessage] {
    let start = messages.len().saturating_sub(MAX_HISTORY);
    &messages[start..]
}
