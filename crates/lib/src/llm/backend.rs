//! Model backend contract shared by the real (Ollama) and mock variants.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_TOKENS_LIMIT: u32 = 4096;
const MAX_TEMPERATURE: f32 = 2.0;

/// A prompt plus bounded generation parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl ModelRequest {
    /// Build a request; `max_tokens` is clamped to 1..=4096 and `temperature` to 0.0..=2.0.
    pub fn new(prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        let temperature = if temperature.is_finite() {
            temperature.clamp(0.0, MAX_TEMPERATURE)
        } else {
            0.0
        };
        Self {
            prompt: prompt.into(),
            max_tokens: max_tokens.clamp(1, MAX_TOKENS_LIMIT),
            temperature,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Same parameters, different prompt text.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }
}

/// Which backend variant produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Real,
    Mock,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Real => "real",
            Provenance::Mock => "mock",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generated text with provenance and observed latency.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub answer: String,
    pub provenance: Provenance,
    pub latency: Duration,
}

impl ModelResponse {
    /// True when the answer did not come from the real model.
    pub fn is_degraded(&self) -> bool {
        self.provenance == Provenance::Mock
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("model backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("model backend unreachable: {0}")]
    Connectivity(String),
    #[error("model backend api error: {0}")]
    Api(String),
    #[error("model backend request failed: {0}")]
    Request(String),
}

impl BackendError {
    /// Timeout and connectivity failures: the runtime is not answering at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::Connectivity(_))
    }
}

/// Turns a prompt into generated text. Must return within `deadline` or fail with `Timeout`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        request: &ModelRequest,
        deadline: Duration,
    ) -> Result<ModelResponse, BackendError>;
}
