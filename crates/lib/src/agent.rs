//! Follow-up turn: load session history, build a prompt, ask the gateway, append the answer.

use crate::config::{AgentConfig, GatewayConfig};
use crate::llm::{BackendError, LlmGateway, ModelRequest, ModelResponse, QUESTION_MARKER};
use crate::session::{ConversationSession, SessionStore, SessionStoreError, Turn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

const INSTRUCTION: &str = "Provide a clear, simple, educational explanation for the question below.";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("session store unavailable: {0}")]
    SessionStoreUnavailable(String),
    #[error("model failure: {0}")]
    Model(#[from] BackendError),
}

impl From<SessionStoreError> for AgentError {
    fn from(e: SessionStoreError) -> Self {
        match e {
            SessionStoreError::Unavailable(msg) => AgentError::SessionStoreUnavailable(msg),
        }
    }
}

/// Per-key async locks so follow-ups on one session run one at a time; other keys are unaffected.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    fn lease(&self, key: &str) -> KeyLease<'_> {
        let lock = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();
        KeyLease {
            locks: self,
            key: key.to_string(),
            lock: Some(lock),
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Holds a key's lock handle; the map entry is removed when the last holder goes away,
/// including when the request future is dropped mid-flight.
struct KeyLease<'a> {
    locks: &'a KeyLocks,
    key: String,
    lock: Option<Arc<tokio::sync::Mutex<()>>>,
}

impl KeyLease<'_> {
    /// `lock` is only `None` while the lease is being dropped.
    async fn lock(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.lock {
            Some(m) => Some(m.lock().await),
            None => None,
        }
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        self.lock.take();
        let mut g = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if g.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            g.remove(&self.key);
        }
    }
}

/// Handles follow-up questions against a session store and the LLM gateway.
pub struct FollowUpAgent {
    store: Arc<dyn SessionStore>,
    gateway: Arc<LlmGateway>,
    max_tokens: u32,
    temperature: f32,
    max_prompt_chars: usize,
    locks: KeyLocks,
}

impl FollowUpAgent {
    pub fn new(
        store: Arc<dyn SessionStore>,
        gateway: Arc<LlmGateway>,
        gateway_config: &GatewayConfig,
        agent_config: &AgentConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            max_tokens: gateway_config.max_tokens,
            temperature: gateway_config.temperature,
            max_prompt_chars: agent_config.max_prompt_chars,
            locks: KeyLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<LlmGateway> {
        &self.gateway
    }

    /// Answer `question` in the context of session `key`, used exactly as given.
    ///
    /// On success exactly one turn is appended and the session is written back. If the
    /// gateway fails, the session is left untouched and the error is returned as is.
    pub async fn handle_follow_up(
        &self,
        key: &str,
        question: &str,
    ) -> Result<ModelResponse, AgentError> {
        let question = question.trim();
        if key.trim().is_empty() {
            return Err(AgentError::MalformedRequest("missing session key".to_string()));
        }
        if question.is_empty() {
            return Err(AgentError::MalformedRequest("empty question".to_string()));
        }
        let limit = question_budget(self.max_prompt_chars);
        if question.chars().count() > limit {
            return Err(AgentError::MalformedRequest(format!(
                "question is longer than {} characters",
                limit
            )));
        }

        let lease = self.locks.lease(key);
        let _guard = lease.lock().await;

        let mut session = match self.store.get(key).await? {
            Some(s) => s,
            None => {
                log::info!("agent: new session {}", key);
                ConversationSession::new(key)
            }
        };
        log::debug!("agent: session {} has {} turn(s)", key, session.turns().len());

        let prompt = build_prompt(session.turns(), question, self.max_prompt_chars);
        let request = ModelRequest::new(prompt, self.max_tokens, self.temperature);
        let response = self.gateway.answer(request).await?;
        log::info!(
            "agent: session {} answered by {} backend in {:?}",
            key,
            response.provenance,
            response.latency
        );

        session.push_turn(Turn {
            question: question.to_string(),
            answer: response.answer.clone(),
            provenance: response.provenance,
            asked_at: chrono::Utc::now(),
        });
        self.store.upsert(key, &session).await?;
        Ok(response)
    }
}

const HISTORY_HEADER: &str = "Previous conversation:\n";

/// Longest question that still fits in a `max_chars` prompt next to the instruction.
pub fn question_budget(max_chars: usize) -> usize {
    max_chars
        .saturating_sub(INSTRUCTION.chars().count() + 2)
        .saturating_sub(QUESTION_MARKER.chars().count() + 1)
}

/// Instruction, as many recent turns as fit, then the question; never longer than `max_chars`.
/// Oldest turns are dropped first. A question over [`question_budget`] is cut at the end, and
/// below the instruction's own size only the marker and the (cut) question remain.
pub fn build_prompt(turns: &[Turn], question: &str, max_chars: usize) -> String {
    let marker_len = QUESTION_MARKER.chars().count() + 1;
    let instruction_len = INSTRUCTION.chars().count() + 2;
    if max_chars < instruction_len + marker_len + 1 {
        let q: String = question.chars().take(max_chars.saturating_sub(marker_len)).collect();
        let out = format!("{}\n{}", QUESTION_MARKER, q);
        return out.chars().take(max_chars).collect();
    }

    let question: String = question.chars().take(question_budget(max_chars)).collect();
    let tail = format!("{}\n{}", QUESTION_MARKER, question);
    let mut budget = max_chars - instruction_len - tail.chars().count();

    let mut history: Vec<String> = Vec::new();
    // header plus the blank line after the last block
    let overhead = HISTORY_HEADER.len() + 1;
    if budget > overhead {
        budget -= overhead;
        for turn in turns.iter().rev() {
            let block = format!("user: {}\nassistant: {}\n", turn.question, turn.answer);
            let len = block.chars().count();
            if len > budget {
                break;
            }
            budget -= len;
            history.push(block);
        }
    }
    if history.len() < turns.len() {
        log::debug!(
            "agent: prompt keeps {} of {} turn(s)",
            history.len(),
            turns.len()
        );
    }

    let mut out = String::from(INSTRUCTION);
    out.push_str("\n\n");
    if !history.is_empty() {
        out.push_str(HISTORY_HEADER);
        for block in history.iter().rev() {
            out.push_str(block);
        }
        out.push('\n');
    }
    out.push_str(&tail);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockBackend, ModelBackend, Provenance};
    use crate::session::{MemorySessionStore, RedisSessionStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn turn(q: &str, a: &str) -> Turn {
        Turn {
            question: q.to_string(),
            answer: a.to_string(),
            provenance: Provenance::Mock,
            asked_at: chrono::Utc::now(),
        }
    }

    fn mock_agent(store: Arc<MemorySessionStore>) -> FollowUpAgent {
        let gw_config = GatewayConfig {
            force_mock: true,
            ..GatewayConfig::default()
        };
        let gateway = LlmGateway::new(
            &gw_config,
            Arc::new(MockBackend::new()),
            Arc::new(MockBackend::new()),
        );
        FollowUpAgent::new(store, Arc::new(gateway), &gw_config, &AgentConfig::default())
    }

    struct BrokenBackend;

    #[async_trait]
    impl ModelBackend for BrokenBackend {
        async fn generate(
            &self,
            _request: &ModelRequest,
            _deadline: Duration,
        ) -> Result<ModelResponse, BackendError> {
            Err(BackendError::Api("broken".to_string()))
        }
    }

    #[test]
    fn prompt_without_history() {
        let p = build_prompt(&[], "Is 5.6 mmol/L glucose high?", 8000);
        assert!(p.starts_with(INSTRUCTION));
        assert!(!p.contains("Previous conversation"));
        assert!(p.ends_with("User question:\nIs 5.6 mmol/L glucose high?"));
    }

    #[test]
    fn prompt_keeps_turns_in_order() {
        let turns = vec![turn("q1", "a1"), turn("q2", "a2")];
        let p = build_prompt(&turns, "q3", 8000);
        let i1 = p.find("user: q1").unwrap();
        let i2 = p.find("user: q2").unwrap();
        assert!(i1 < i2);
        assert!(p.find(QUESTION_MARKER).unwrap() > i2);
    }

    #[test]
    fn oldest_turns_are_dropped_first() {
        let long = "x".repeat(200);
        let turns = vec![turn("old", &long), turn("mid", &long), turn("new", &long)];
        let max = INSTRUCTION.len() + 2 + "User question:\nq".len() + 2 + 23 + 2 * 230;
        let p = build_prompt(&turns, "q", max);
        assert!(!p.contains("user: old"));
        assert!(p.contains("user: mid"));
        assert!(p.contains("user: new"));
        assert!(p.chars().count() <= max);
    }

    #[test]
    fn long_question_is_cut_to_the_limit() {
        let p = build_prompt(&[turn("q1", "a1")], &"x".repeat(20_000), 8000);
        assert!(p.chars().count() <= 8000);
        assert!(p.starts_with(INSTRUCTION));
        assert!(!p.contains("user: q1"));
        let budget = question_budget(8000);
        assert!(p.ends_with(&format!("{}\n{}", QUESTION_MARKER, "x".repeat(budget))));
    }

    #[test]
    fn tiny_limit_keeps_marker_and_question_start() {
        let max = QUESTION_MARKER.len() + 1 + 4;
        let p = build_prompt(&[turn("q1", "a1")], "What is LDL?", max);
        assert_eq!(p, "User question:\nWhat");
        for max in [0, 5, 10, 40, 120] {
            assert!(build_prompt(&[turn("q1", "a1")], "What is LDL?", max).chars().count() <= max);
        }
    }

    #[tokio::test]
    async fn oversized_question_is_rejected_before_the_gateway() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let agent = mock_agent(store.clone());
        let too_long = "x".repeat(question_budget(AgentConfig::default().max_prompt_chars) + 1);
        assert!(matches!(
            agent.handle_follow_up("s", &too_long).await,
            Err(AgentError::MalformedRequest(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn session_keys_are_stored_as_given() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let agent = mock_agent(store.clone());
        agent.handle_follow_up("a", "q1").await.unwrap();
        agent.handle_follow_up(" a", "q2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().turns().len(), 1);
        let spaced = store.get(" a").await.unwrap().unwrap();
        assert_eq!(spaced.key(), " a");
        assert_eq!(spaced.turns().len(), 1);
    }

    /// Counts calls; always answers.
    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelBackend for CountingBackend {
        async fn generate(
            &self,
            request: &ModelRequest,
            deadline: Duration,
        ) -> Result<ModelResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            MockBackend::new().generate(request, deadline).await
        }
    }

    #[tokio::test]
    async fn store_outage_is_reported_and_model_never_called() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let store = RedisSessionStore::new(
            &format!("redis://127.0.0.1:{}", port),
            "insights:test",
            Duration::from_secs(60),
        )
        .unwrap();
        let backend = Arc::new(CountingBackend::default());
        let gw_config = GatewayConfig::default();
        let gateway = LlmGateway::new(&gw_config, backend.clone(), backend.clone());
        let agent = FollowUpAgent::new(
            Arc::new(store),
            Arc::new(gateway),
            &gw_config,
            &AgentConfig::default(),
        );
        let err = agent.handle_follow_up("s", "What is HDL?").await.unwrap_err();
        assert!(matches!(err, AgentError::SessionStoreUnavailable(_)), "{:?}", err);
        assert_eq!(agent.store().name(), "redis");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn n_calls_give_n_turns_in_order() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let agent = mock_agent(store.clone());
        for i in 0..4 {
            let res = agent
                .handle_follow_up("s1", &format!("question {}", i))
                .await
                .unwrap();
            assert_eq!(res.provenance, Provenance::Mock);
        }
        let s = store.get("s1").await.unwrap().unwrap();
        let qs: Vec<&str> = s.turns().iter().map(|t| t.question.as_str()).collect();
        assert_eq!(qs, vec!["question 0", "question 1", "question 2", "question 3"]);
    }

    #[tokio::test]
    async fn malformed_requests_touch_nothing() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let agent = mock_agent(store.clone());
        assert!(matches!(
            agent.handle_follow_up("  ", "q").await,
            Err(AgentError::MalformedRequest(_))
        ));
        assert!(matches!(
            agent.handle_follow_up("s", " \n").await,
            Err(AgentError::MalformedRequest(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn gateway_failure_leaves_session_unmodified() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let mut existing = ConversationSession::new("s");
        existing.push_turn(turn("q0", "a0"));
        store.upsert("s", &existing).await.unwrap();

        let gw_config = GatewayConfig {
            force_mock: true,
            ..GatewayConfig::default()
        };
        let gateway = LlmGateway::new(&gw_config, Arc::new(BrokenBackend), Arc::new(BrokenBackend));
        let agent = FollowUpAgent::new(
            store.clone(),
            Arc::new(gateway),
            &gw_config,
            &AgentConfig::default(),
        );
        let err = agent.handle_follow_up("s", "q1").await.unwrap_err();
        assert!(matches!(err, AgentError::Model(BackendError::Api(_))));
        assert_eq!(store.get("s").await.unwrap().unwrap(), existing);
    }

    #[tokio::test]
    async fn concurrent_follow_ups_on_one_key_all_land() {
        let store = Arc::new(MemorySessionStore::new(Duration::from_secs(60)));
        let agent = Arc::new(mock_agent(store.clone()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                agent.handle_follow_up("shared", &format!("q{}", i)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("shared").await.unwrap().unwrap().turns().len(), 8);
        assert_eq!(agent.locks.len(), 0);
    }
}
