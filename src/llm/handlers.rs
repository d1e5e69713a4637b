use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::agents::{with_context, DEFAULT_AGENT_ROLE};
use super::catalog::{catalog, ModelInfo};
use super::router::agent_task_type;
use super::types::{LlmResponse, RouteRequest, Strategy, UsageStats};
use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::error::{AppError, AppJson};

#[derive(Debug, Deserialize)]
pub struct AgentChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub agent_level: Option<String>,
    #[serde(default)]
    pub strategy: Strategy,
}

#[derive(Debug, Serialize)]
pub struct AgentChatResponse {
    pub agent_id: String,
    #[serde(flatten)]
    pub response: LlmResponse,
    pub history_length: usize,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub default_provider: String,
    pub default_model: String,
    pub models: Vec<ModelInfo>,
}

async fn route_and_record(state: &AppState, request: &RouteRequest) -> Result<LlmResponse, AppError> {
    let response = state.llm.complete(request).await?;
    state
        .metrics
        .record_llm(response.provider.as_str(), response.model.as_str(), response.cost);
    Ok(response)
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(request): AppJson<RouteRequest>,
) -> Result<Json<LlmResponse>, AppError> {
    if request.messages.is_empty() {
        return Err(AppError::validation("messages", "must not be empty"));
    }

    let response = route_and_record(&state, &request).await?;
    info!(
        user = user.id(),
        provider = %response.provider,
        model = %response.model,
        cost = response.cost,
        "LLM completion"
    );
    Ok(Json(response))
}

pub async fn usage(State(state): State<Arc<AppState>>, _user: CurrentUser) -> Json<BTreeMap<String, UsageStats>> {
    Json(state.llm.usage())
}

pub async fn models(State(state): State<Arc<AppState>>, _user: CurrentUser) -> Json<ModelsResponse> {
    let (provider, model) = state.llm.default_pair();
    Json(ModelsResponse {
        default_provider: provider.to_string(),
        default_model: model.to_string(),
        models: catalog(),
    })
}

pub async fn agent_chat(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(agent_id): Path<String>,
    AppJson(request): AppJson<AgentChatRequest>,
) -> Result<Json<AgentChatResponse>, AppError> {
    if request.prompt.trim().is_empty() {
        return Err(AppError::validation("prompt", "must not be empty"));
    }

    let role = request.role.as_deref().unwrap_or(DEFAULT_AGENT_ROLE);
    let prompt = with_context(&request.prompt, request.context.as_ref());
    let route = RouteRequest {
        messages: state.agents.conversation(user.id(), &agent_id, role, &prompt),
        task_type: Some(agent_task_type(&request.prompt)),
        strategy: request.strategy,
        agent_level: request.agent_level.clone(),
        temperature: Some(0.7),
        ..Default::default()
    };

    let response = route_and_record(&state, &route).await?;
    state.agents.record(user.id(), &agent_id, &prompt, &response.content);

    Ok(Json(AgentChatResponse {
        history_length: state.agents.history(user.id(), &agent_id).len(),
        agent_id,
        response,
    }))
}

pub async fn reset_agent(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    state.agents.reset(user.id(), &agent_id);
    StatusCode::NO_CONTENT
}
