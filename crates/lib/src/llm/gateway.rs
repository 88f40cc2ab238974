//! LLM gateway: the single entry point for model answers.
//!
//! Selection runs as a small state machine: `Idle -> AttemptingReal -> Done` on success,
//! `AttemptingReal -> FallbackToMock -> Done` on any real-backend failure, and
//! `Idle -> FallbackToMock -> Done` when mock mode is forced. Real-backend failures are
//! never surfaced to callers; they show up as `Provenance::Mock` and a warning log line.

use super::backend::{BackendError, ModelBackend, ModelRequest, ModelResponse, Provenance};
use super::mock::MockBackend;
use super::ollama::{OllamaBackend, OllamaClient};
use super::safety;
use crate::config::GatewayConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Phase of one `answer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Idle,
    AttemptingReal,
    FallbackToMock,
    Done,
}

enum Step {
    Idle,
    AttemptingReal,
    FallbackToMock,
    Done(Result<ModelResponse, BackendError>),
}

impl Step {
    fn state(&self) -> GatewayState {
        match self {
            Step::Idle => GatewayState::Idle,
            Step::AttemptingReal => GatewayState::AttemptingReal,
            Step::FallbackToMock => GatewayState::FallbackToMock,
            Step::Done(_) => GatewayState::Done,
        }
    }
}

/// Chooses between the real and mock backends and applies the timeout/fallback policy.
pub struct LlmGateway {
    real: Arc<dyn ModelBackend>,
    fallback: Arc<dyn ModelBackend>,
    force_mock: bool,
    timeout: Duration,
}

impl LlmGateway {
    /// Gateway over explicit backends. `real` is never called when `config.force_mock` is set.
    pub fn new(
        config: &GatewayConfig,
        real: Arc<dyn ModelBackend>,
        fallback: Arc<dyn ModelBackend>,
    ) -> Self {
        Self {
            real,
            fallback,
            force_mock: config.force_mock,
            timeout: config.real_backend_timeout(),
        }
    }

    /// Ollama at `realBackendEndpoint` as the real backend, [`MockBackend`] as fallback.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let client = OllamaClient::new(Some(config.real_backend_endpoint.clone()));
        let real = OllamaBackend::new(client, config.model.clone());
        Self::new(config, Arc::new(real), Arc::new(MockBackend::new()))
    }

    pub fn force_mock(&self) -> bool {
        self.force_mock
    }

    pub fn real_backend_timeout(&self) -> Duration {
        self.timeout
    }

    /// Answer `request`. Errors only if the fallback backend itself fails. The reported
    /// latency covers the whole call, including a failed real attempt.
    pub async fn answer(&self, request: ModelRequest) -> Result<ModelResponse, BackendError> {
        let started = Instant::now();
        let mut step = Step::Idle;
        loop {
            let from = step.state();
            step = match step {
                Step::Idle if self.force_mock => Step::FallbackToMock,
                Step::Idle => Step::AttemptingReal,
                Step::AttemptingReal => match self.attempt_real(&request).await {
                    Ok(res) => Step::Done(Ok(res)),
                    Err(e) => {
                        if e.is_unavailable() {
                            log::warn!("gateway: real backend unavailable ({}), falling back to mock", e);
                        } else {
                            log::warn!("gateway: real backend failed ({}), falling back to mock", e);
                        }
                        Step::FallbackToMock
                    }
                },
                Step::FallbackToMock => Step::Done(self.attempt_fallback(&request).await),
                Step::Done(result) => {
                    return result.map(|res| ModelResponse {
                        latency: started.elapsed(),
                        ..res
                    });
                }
            };
            log::debug!("gateway: {:?} -> {:?}", from, step.state());
        }
    }

    async fn attempt_real(&self, request: &ModelRequest) -> Result<ModelResponse, BackendError> {
        let guarded = request.with_prompt(safety::with_safety_preamble(request.prompt()));
        // The backend enforces the deadline itself; this outer bound covers backends that do not.
        let res = tokio::time::timeout(self.timeout, self.real.generate(&guarded, self.timeout))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;
        let violations = safety::check_answer(&res.answer);
        if !violations.is_empty() {
            let phrases: Vec<&str> = violations.iter().map(|v| v.phrase).collect();
            log::warn!("gateway: real answer flagged by safety check: {:?}", phrases);
        }
        log::info!("gateway: real backend answered in {:?}", res.latency);
        Ok(ModelResponse {
            provenance: Provenance::Real,
            ..res
        })
    }

    async fn attempt_fallback(&self, request: &ModelRequest) -> Result<ModelResponse, BackendError> {
        let res = tokio::time::timeout(self.timeout, self.fallback.generate(request, self.timeout))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;
        Ok(ModelResponse {
            provenance: Provenance::Mock,
            ..res
        })
    }
}
