//! LLM routing across Claude, GPT, Gemini and Ollama.
//!
//! Endpoints:
//! - POST /llm/complete - Route and complete a conversation
//! - GET /llm/usage - Per provider:model usage tally
//! - GET /llm/models - Model catalog with rates
//! - POST /agents/{agent_id}/chat - Talk to a named agent with memory
//! - DELETE /agents/{agent_id}/history - Reset an agent conversation

mod agents;
mod catalog;
mod classify;
mod handlers;
mod providers;
mod router;
mod types;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::AppState;

pub use agents::AgentRegistry;
pub use catalog::{catalog, ModelInfo, Rates};
pub use classify::{classify, detect_task_type};
pub use providers::{ClaudeClient, GeminiClient, GptClient, OllamaClient, ProviderClient, ProviderError};
pub use router::{LlmError, LlmRouter};
pub use types::{
    ChatMessage, Classification, Complexity, LlmResponse, MessageRole, Model, Provider, RouteRequest, Strategy,
    TaskType, UsageStats,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/llm/complete", post(handlers::complete))
        .route("/llm/usage", get(handlers::usage))
        .route("/llm/models", get(handlers::models))
        .route("/agents/{agent_id}/chat", post(handlers::agent_chat))
        .route("/agents/{agent_id}/history", delete(handlers::reset_agent))
}
