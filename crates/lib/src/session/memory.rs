//! In-process session store.

use super::{ConversationSession, SessionKey, SessionStore, SessionStoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    session: ConversationSession,
    written_at: Instant,
}

/// Process-local map with TTL measured from the last upsert. Expired records are ignored on
/// read and removed by [`MemorySessionStore::purge_expired`].
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<SessionKey, Entry>>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn is_live(&self, entry: &Entry, now: Instant) -> bool {
        now.duration_since(entry.written_at) <= self.ttl
    }

    /// Drop expired records; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut g = self.inner.write().await;
        let before = g.len();
        g.retain(|_, e| self.is_live(e, now));
        before - g.len()
    }

    /// Number of records held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<ConversationSession>, SessionStoreError> {
        let now = Instant::now();
        let g = self.inner.read().await;
        Ok(g
            .get(key)
            .filter(|e| self.is_live(e, now))
            .map(|e| e.session.clone()))
    }

    async fn upsert(
        &self,
        key: &str,
        session: &ConversationSession,
    ) -> Result<(), SessionStoreError> {
        let entry = Entry {
            session: session.clone(),
            written_at: Instant::now(),
        };
        self.inner.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn expire(&self, key: &str) -> Result<(), SessionStoreError> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
