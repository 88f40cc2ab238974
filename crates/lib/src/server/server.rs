//! HTTP server: follow-up API, health probe and the manual test page.

use crate::agent::{AgentError, FollowUpAgent};
use crate::config::{Config, SessionBackend, SessionConfig};
use crate::llm::{LlmGateway, OllamaClient};
use crate::server::protocol::{ErrorBody, FollowUpParams, FollowUpReply};
use crate::session::{new_session_key, MemorySessionStore, RedisSessionStore, SessionStore};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

const SERVICE_NAME: &str = "Health Insights AI";
const TEST_PAGE: &str = include_str!("test_page.html");
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub agent: Arc<FollowUpAgent>,
}

impl AppState {
    /// Build the store, gateway and agent from config. Store selection happens here, once.
    pub async fn from_config(config: Config) -> Self {
        let store = build_session_store(&config.session).await;
        let gateway = Arc::new(LlmGateway::from_config(&config.gateway));
        let agent = FollowUpAgent::new(store, gateway, &config.gateway, &config.agent);
        Self {
            config: Arc::new(config),
            agent: Arc::new(agent),
        }
    }
}

/// Redis when configured and reachable; otherwise the in-process store. A redis outage at
/// startup is logged, not fatal. Later outages surface per request.
pub async fn build_session_store(config: &SessionConfig) -> Arc<dyn SessionStore> {
    if config.backend == SessionBackend::Redis {
        let probe = match RedisSessionStore::new(&config.redis_url, config.key_prefix.clone(), config.ttl()) {
            Ok(store) => match store.ping().await {
                Ok(()) => Ok(store),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        match probe {
            Ok(store) => {
                log::info!("session store: redis at {}", config.redis_url);
                return Arc::new(store);
            }
            Err(e) => {
                log::warn!("session store: {}; using in-process store instead", e);
            }
        }
    }
    log::info!("session store: in-process (ttl {}s)", config.ttl_secs);
    let memory = MemorySessionStore::new(config.ttl());
    spawn_sweeper(memory.clone(), config.ttl().min(MAX_SWEEP_INTERVAL));
    Arc::new(memory)
}

fn spawn_sweeper(store: MemorySessionStore, every: Duration) {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.purge_expired().await;
            if removed > 0 {
                log::debug!("session store: purged {} expired session(s)", removed);
            }
        }
    });
}

/// Routes under `/api`, with CORS for the configured browser origins.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    Router::new()
        .route("/api/followup", post(followup))
        .route("/api/health", get(health))
        .route("/api/test-followup", get(test_page))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("cors: ignoring invalid origin {:?}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Start the server and run until Ctrl+C / SIGTERM.
pub async fn run_server(config: Config) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);

    if config.gateway.force_mock {
        log::info!("llm gateway: mock backend forced");
    } else {
        let ollama = OllamaClient::new(Some(config.gateway.real_backend_endpoint.clone()));
        let model = config.gateway.model.clone();
        tokio::spawn(async move {
            match ollama.list_models().await {
                Ok(list) if list.iter().any(|m| m.name == model) => {
                    log::info!("ollama reachable at {}, model {} available", ollama.base_url(), model);
                }
                Ok(_) => {
                    log::warn!("ollama reachable at {} but model {} is not pulled; answers will fall back to mock", ollama.base_url(), model);
                }
                Err(e) => {
                    log::warn!("ollama probe failed ({}); answers will fall back to mock until it is up", e);
                }
            }
        });
    }

    let state = AppState::from_config(config).await;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited")?;
    log::info!("server stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM. If a handler cannot be installed, that signal is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn error_response(status: StatusCode, error: &str, details: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(error, details))).into_response()
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        match &self {
            AgentError::MalformedRequest(_) => {
                error_response(StatusCode::BAD_REQUEST, "Malformed Request", self.to_string())
            }
            AgentError::SessionStoreUnavailable(_) => {
                log::error!("followup: {}", self);
                error_response(StatusCode::SERVICE_UNAVAILABLE, "Session Store Unavailable", self.to_string())
            }
            AgentError::Model(_) => {
                log::error!("followup: {}", self);
                error_response(StatusCode::BAD_GATEWAY, "Model Unavailable", self.to_string())
            }
        }
    }
}

/// POST /api/followup: answer one question in a session.
async fn followup(
    State(state): State<AppState>,
    payload: Result<Json<FollowUpParams>, JsonRejection>,
) -> Response {
    let params = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "Malformed Request", rejection.body_text());
        }
    };
    match state
        .agent
        .handle_follow_up(&params.session_key, &params.question)
        .await
    {
        Ok(res) => Json(FollowUpReply::from(res)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/health: liveness plus the startup decisions worth seeing from outside.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "forceMock": state.agent.gateway().force_mock(),
        "realBackendTimeoutMs": state.config.gateway.real_backend_timeout_ms,
        "sessionStore": state.agent.store().name(),
    }))
}

/// GET /api/test-followup: manual test form with a fresh session key.
async fn test_page() -> Html<String> {
    Html(TEST_PAGE.replace("{{SESSION_KEY}}", &new_session_key()))
}
