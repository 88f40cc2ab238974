//! Conversation sessions and the stores that hold them.
//!
//! A session is keyed by a caller-supplied (or generated) string and holds an append-only list
//! of question/answer turns. Two stores share the [`SessionStore`] contract: an in-process map
//! ([`MemorySessionStore`]) and Redis/Valkey ([`RedisSessionStore`]). Both treat records older
//! than the configured time-to-live as absent.

mod memory;
mod redis_store;

pub use self::memory::MemorySessionStore;
pub use self::redis_store::RedisSessionStore;

use crate::llm::Provenance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session key (opaque string).
pub type SessionKey = String;

/// Generate a fresh session key.
pub fn new_session_key() -> SessionKey {
    format!("sess-{}", uuid::Uuid::new_v4())
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub provenance: Provenance,
    pub asked_at: DateTime<Utc>,
}

/// A conversation: key, ordered turns, and when it was last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    key: SessionKey,
    turns: Vec<Turn>,
    last_accessed: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(key: impl Into<SessionKey>) -> Self {
        Self {
            key: key.into(),
            turns: Vec::new(),
            last_accessed: Utc::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    /// Append a turn. Existing turns are never modified.
    pub fn push_turn(&mut self, turn: Turn) {
        self.last_accessed = turn.asked_at.max(Utc::now());
        self.turns.push(turn);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Key → session mapping with time-to-live.
///
/// `get` on a missing or expired key returns `Ok(None)` and never changes stored state.
/// `upsert` replaces the whole record for the key (last writer wins) and restarts its TTL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ConversationSession>, SessionStoreError>;

    async fn upsert(
        &self,
        key: &str,
        session: &ConversationSession,
    ) -> Result<(), SessionStoreError>;

    /// Remove the record now. Missing keys are not an error.
    async fn expire(&self, key: &str) -> Result<(), SessionStoreError>;

    /// Short name for logs and health output ("memory", "redis").
    fn name(&self) -> &'static str;
}
