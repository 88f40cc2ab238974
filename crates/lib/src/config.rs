//! Configuration types and loading.
//!
//! Config is loaded once at startup from a JSON file (e.g. `~/.insights/config.json`), then
//! environment overrides are applied. The resulting value is read-only and threaded into the
//! gateway, session store and server constructors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server bind and port.
    #[serde(default)]
    pub server: ServerConfig,

    /// LLM gateway: real backend endpoint, timeout, forced mock mode.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session store selection and time-to-live.
    #[serde(default)]
    pub session: SessionConfig,

    /// Follow-up agent prompt limits.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// HTTP bind address, port and allowed browser origins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for HTTP (default 8000).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Origins allowed to call the API from a browser (default the dev frontend).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_server_port() -> u16 {
    8000
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// LLM gateway settings. `forceMock`, `realBackendTimeoutMs` and `realBackendEndpoint` decide
/// backend selection; the rest shape every request sent to the real backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Always answer with the mock backend. Overridden by USE_MOCK_LLM env.
    #[serde(default)]
    pub force_mock: bool,

    /// Deadline for one real-backend call, in milliseconds. Overridden by LLM_TIMEOUT_MS env.
    #[serde(default = "default_real_backend_timeout_ms")]
    pub real_backend_timeout_ms: u64,

    /// Base URL of the local Ollama runtime. Overridden by OLLAMA_URL env.
    #[serde(default = "default_real_backend_endpoint")]
    pub real_backend_endpoint: String,

    /// Model name as listed by `ollama list`. Overridden by OLLAMA_MODEL env.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_real_backend_timeout_ms() -> u64 {
    30_000
}

fn default_real_backend_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    "gemma2:2b".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    512
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            force_mock: false,
            real_backend_timeout_ms: default_real_backend_timeout_ms(),
            real_backend_endpoint: default_real_backend_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl GatewayConfig {
    pub fn real_backend_timeout(&self) -> Duration {
        Duration::from_millis(self.real_backend_timeout_ms)
    }
}

/// Which session store variant to build at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Process-local map with TTL.
    #[default]
    Memory,

    /// Redis / Valkey at `redisUrl`.
    Redis,
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// "memory" (default) or "redis". USE_MOCK_REDIS=false selects redis.
    #[serde(default)]
    pub backend: SessionBackend,

    /// Seconds after the last write before a session is treated as absent. Overridden by SESSION_TTL_SECS env.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// Overridden by REDIS_URL env.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for redis keys (`<prefix>:<sessionKey>`).
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "insights:session".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            ttl_secs: default_session_ttl_secs(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Follow-up agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Upper bound on prompt length in characters. Older turns are dropped first to fit;
    /// longer questions are rejected.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

fn default_max_prompt_chars() -> usize {
    8000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

/// Trimmed, non-empty value for `key` from `lookup`.
fn lookup_value(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            log::warn!("ignoring {}: expected true/false, got {:?}", key, value);
            None
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            log::warn!("ignoring {}: not a number: {:?}", key, value);
            None
        }
    }
}

/// Apply environment overrides using `lookup` (normally `std::env::var`).
/// Unparseable values are logged and ignored so the file value stays in effect.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup_value(&lookup, "USE_MOCK_LLM") {
        if let Some(b) = parse_flag("USE_MOCK_LLM", &v) {
            config.gateway.force_mock = b;
        }
    }
    if let Some(v) = lookup_value(&lookup, "OLLAMA_URL") {
        config.gateway.real_backend_endpoint = v;
    }
    if let Some(v) = lookup_value(&lookup, "OLLAMA_MODEL") {
        config.gateway.model = v;
    }
    if let Some(v) = lookup_value(&lookup, "LLM_TIMEOUT_MS") {
        if let Some(ms) = parse_number("LLM_TIMEOUT_MS", &v) {
            config.gateway.real_backend_timeout_ms = ms;
        }
    }
    if let Some(v) = lookup_value(&lookup, "USE_MOCK_REDIS") {
        if let Some(mock) = parse_flag("USE_MOCK_REDIS", &v) {
            config.session.backend = if mock {
                SessionBackend::Memory
            } else {
                SessionBackend::Redis
            };
        }
    }
    if let Some(v) = lookup_value(&lookup, "REDIS_URL") {
        config.session.redis_url = v;
    }
    if let Some(v) = lookup_value(&lookup, "SESSION_TTL_SECS") {
        if let Some(secs) = parse_number("SESSION_TTL_SECS", &v) {
            config.session.ttl_secs = secs;
        }
    }
    if let Some(v) = lookup_value(&lookup, "INSIGHTS_PORT") {
        if let Some(port) = parse_number("INSIGHTS_PORT", &v) {
            config.server.port = port;
        }
    }
    if let Some(v) = lookup_value(&lookup, "INSIGHTS_BIND") {
        config.server.bind = v;
    }
    if let Some(v) = lookup_value(&lookup, "CORS_ORIGINS") {
        config.server.cors_origins = v
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("INSIGHTS_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".insights").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default path), then apply environment overrides.
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_overrides(&mut config, |k| std::env::var(k).ok());
    Ok((config, path))
}
