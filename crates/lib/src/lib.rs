//! Health Insights core library: session stores, model backends, the LLM gateway with mock
//! fallback, the follow-up agent, and the HTTP server used by the CLI.

pub mod agent;
pub mod config;
pub mod llm;
pub mod server;
pub mod session;
