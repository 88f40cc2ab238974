//! Redis / Valkey session store.

use super::{ConversationSession, SessionStore, SessionStoreError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

/// Sessions stored as JSON under `<prefix>:<key>` with `SET ... EX ttl`, so the cache enforces expiry.
pub struct RedisSessionStore {
    client: redis::Client,
    key_prefix: String,
    ttl_secs: u64,
    connection: Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisSessionStore {
    /// Parse the URL; no connection is opened until the first command (see [`Self::ping`]).
    pub fn new(url: &str, key_prefix: impl Into<String>, ttl: Duration) -> Result<Self, SessionStoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| SessionStoreError::Unavailable(format!("invalid redis url {}: {}", url, e)))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            ttl_secs: ttl.as_secs().max(1),
            connection: Mutex::new(None),
        })
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Shared multiplexed connection, opened on first use. The lock is released before any
    /// command runs so requests for different keys proceed in parallel.
    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, SessionStoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SessionStoreError::Unavailable(format!("redis connect failed: {}", e)))?;
        log::debug!("session store connected to redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Run `cmd`; on failure drop the cached connection and retry once on a fresh one.
    async fn run<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
        what: &str,
    ) -> Result<T, SessionStoreError> {
        let mut last_err = None;
        for attempt in 0..2 {
            let mut conn = self.connection().await?;
            let result: redis::RedisResult<T> = cmd.query_async(&mut conn).await;
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    log::warn!(
                        "session store: redis {} failed (attempt {}): {}; reconnecting",
                        what,
                        attempt + 1,
                        err
                    );
                    *self.connection.lock().await = None;
                    last_err = Some(err);
                }
            }
        }
        Err(SessionStoreError::Unavailable(format!(
            "redis {} failed: {}",
            what,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// PING the server. Used at startup to decide between redis and the in-process store.
    pub async fn ping(&self) -> Result<(), SessionStoreError> {
        let _: String = self.run(&redis::cmd("PING"), "PING").await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, key: &str) -> Result<Option<ConversationSession>, SessionStoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.storage_key(key));
        let raw: Option<String> = self.run(&cmd, "GET").await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                log::warn!("session store: ignoring undecodable session {}: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn upsert(
        &self,
        key: &str,
        session: &ConversationSession,
    ) -> Result<(), SessionStoreError> {
        let json = serde_json::to_string(session)
            .map_err(|e| SessionStoreError::Unavailable(format!("encoding session: {}", e)))?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.storage_key(key))
            .arg(json)
            .arg("EX")
            .arg(self.ttl_secs);
        let _: () = self.run(&cmd, "SET").await?;
        Ok(())
    }

    async fn expire(&self, key: &str) -> Result<(), SessionStoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.storage_key(key));
        let _: i64 = self.run(&cmd, "DEL").await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
