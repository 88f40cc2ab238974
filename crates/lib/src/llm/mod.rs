//! Model backends (Ollama and mock) and the gateway that picks between them.

mod backend;
mod gateway;
mod mock;
mod ollama;
pub mod safety;

pub use backend::{BackendError, ModelBackend, ModelRequest, ModelResponse, Provenance};
pub use gateway::{GatewayState, LlmGateway};
pub use mock::{MockBackend, QUESTION_MARKER};
pub use ollama::{
    ChatMessage, ChatOptions, ChatResponse, OllamaBackend, OllamaClient, OllamaError, OllamaModel,
};
