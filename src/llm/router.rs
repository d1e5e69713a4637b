//! Model selection, dispatch with retry, provider fallback and usage tally.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::catalog::{self, FALLBACK_ORDER, LATENCY_RANK, QUALITY_RANK};
use super::classify::{classify, detect_task_type};
use super::providers::{clients_from_config, ProviderClient, ProviderError};
use super::types::{
    Complexity, CompletionRequest, LlmResponse, Model, Provider, ProviderReply, RouteRequest, Strategy, TaskType,
    UsageStats,
};
use crate::config::LlmConfig;
use crate::error::AppError;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0}")]
    InvalidSelection(String),
    #[error("provider {0} is not configured")]
    NotConfigured(Provider),
    #[error("{provider} failed: {source}")]
    Provider {
        provider: Provider,
        #[source]
        source: ProviderError,
    },
    #[error("all providers failed, last error: {0}")]
    AllProvidersFailed(String),
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::InvalidSelection(msg) => AppError::BadRequest(msg),
            LlmError::NotConfigured(_) => AppError::Unavailable(err.to_string()),
            LlmError::Provider { .. } | LlmError::AllProvidersFailed(_) => AppError::Upstream(err.to_string()),
        }
    }
}

pub struct LlmRouter {
    clients: BTreeMap<Provider, Arc<dyn ProviderClient>>,
    default_pair: (Provider, Model),
    max_retries: u32,
    retry_base_delay: Duration,
    usage: Mutex<BTreeMap<String, UsageStats>>,
}

impl LlmRouter {
    pub fn new(config: &LlmConfig, http: reqwest::Client) -> Self {
        Self::with_clients(config, clients_from_config(config, http))
    }

    /// Build a router over explicit clients. Providers without a client are
    /// treated as unconfigured.
    pub fn with_clients(config: &LlmConfig, clients: Vec<Arc<dyn ProviderClient>>) -> Self {
        let model = config.default_model.parse::<Model>().unwrap_or_else(|_| {
            warn!(model = %config.default_model, "Unknown default model, using {}", Model::ClaudeSonnet);
            Model::ClaudeSonnet
        });
        if config.default_provider != model.provider().as_str() {
            warn!(
                provider = %config.default_provider,
                model = %model,
                "Default provider does not own the default model, using the model's provider"
            );
        }

        Self {
            clients: clients.into_iter().map(|c| (c.provider(), c)).collect(),
            default_pair: (model.provider(), model),
            max_retries: config.max_retries.max(1),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            usage: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn default_pair(&self) -> (Provider, Model) {
        self.default_pair
    }

    pub fn is_configured(&self, provider: Provider) -> bool {
        self.clients.get(&provider).is_some_and(|c| c.is_configured())
    }

    /// Pick a pair from the routing tables.
    pub fn select_model(
        &self,
        task_type: Option<TaskType>,
        complexity: Complexity,
        strategy: Strategy,
        budget: Option<f64>,
    ) -> (Provider, Model) {
        let table = match task_type {
            Some(task) => catalog::task_candidates(task),
            None => catalog::complexity_candidates(complexity),
        };
        let mut candidates: Vec<Model> = table.to_vec();

        if let Some(ceiling) = budget {
            candidates.retain(|m| m.rates().output / 1000.0 <= ceiling);
        }

        match strategy {
            Strategy::CostOptimized => candidates.sort_by(|a, b| a.rates().output.total_cmp(&b.rates().output)),
            Strategy::QualityOptimized => candidates.sort_by_key(|m| catalog::rank(QUALITY_RANK, *m)),
            Strategy::LatencyOptimized => candidates.sort_by_key(|m| catalog::rank(LATENCY_RANK, *m)),
            Strategy::Balanced | Strategy::Fallback => {}
        }

        candidates
            .first()
            .map(|m| (m.provider(), *m))
            .unwrap_or(self.default_pair)
    }

    /// Resolve the pair for a request: explicit choices are validated,
    /// otherwise the conversation is classified and a pair selected.
    pub fn resolve(&self, request: &RouteRequest) -> Result<(Provider, Model), LlmError> {
        let provider = request
            .provider
            .as_deref()
            .map(|p| {
                p.parse::<Provider>()
                    .map_err(|_| LlmError::InvalidSelection(format!("Unknown provider: {p}")))
            })
            .transpose()?;
        let model = request
            .model
            .as_deref()
            .map(|m| {
                m.parse::<Model>()
                    .map_err(|_| LlmError::InvalidSelection(format!("Unknown model: {m}")))
            })
            .transpose()?;

        match (provider, model) {
            (Some(provider), Some(model)) if model.provider() != provider => Err(LlmError::InvalidSelection(
                format!("Model {model} does not belong to provider {provider}"),
            )),
            (Some(provider), Some(model)) => Ok((provider, model)),
            (Some(provider), None) => Ok((provider, provider.fallback_model())),
            (None, Some(model)) => Ok((model.provider(), model)),
            (None, None) => {
                let classification = classify(&request.messages, request.agent_level.as_deref());
                let task_type = request.task_type.or(classification.task_type);
                debug!(
                    complexity = %classification.complexity,
                    domain = classification.domain,
                    task_type = ?task_type,
                    "Classified request"
                );
                Ok(self.select_model(task_type, classification.complexity, request.strategy, request.budget))
            }
        }
    }

    pub async fn complete(&self, request: &RouteRequest) -> Result<LlmResponse, LlmError> {
        let (provider, model) = self.resolve(request)?;
        let client = self
            .clients
            .get(&provider)
            .filter(|c| c.is_configured())
            .ok_or(LlmError::NotConfigured(provider))?;

        let completion = CompletionRequest {
            messages: request.messages.clone(),
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        let started = Instant::now();
        let err = match self.dispatch_with_retry(client.as_ref(), model, &completion).await {
            Ok(reply) => return Ok(self.finish(provider, model, reply, started, false)),
            Err(err) => err,
        };

        if !err.is_retryable() || request.strategy != Strategy::Fallback {
            return Err(LlmError::Provider { provider, source: err });
        }

        warn!(%provider, %model, error = %err, "Primary provider exhausted, falling back");
        let mut last_error = err.to_string();
        for fallback in FALLBACK_ORDER.iter().copied().filter(|p| *p != provider) {
            let Some(client) = self.clients.get(&fallback).filter(|c| c.is_configured()) else {
                continue;
            };
            let fallback_model = fallback.fallback_model();
            let started = Instant::now();
            match client.complete(fallback_model, &completion).await {
                Ok(reply) => {
                    info!(provider = %fallback, model = %fallback_model, "Fallback succeeded");
                    return Ok(self.finish(fallback, fallback_model, reply, started, true));
                }
                Err(e) => {
                    warn!(provider = %fallback, error = %e, "Fallback provider failed");
                    last_error = format!("{fallback}: {e}");
                }
            }
        }

        Err(LlmError::AllProvidersFailed(last_error))
    }

    async fn dispatch_with_retry(
        &self,
        client: &dyn ProviderClient,
        model: Model,
        request: &CompletionRequest,
    ) -> Result<ProviderReply, ProviderError> {
        let mut attempt = 0;
        loop {
            match client.complete(model, request).await {
                Ok(reply) => return Ok(reply),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        provider = %client.provider(),
                        %model,
                        attempt,
                        error = %err,
                        "Provider call failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn finish(
        &self,
        provider: Provider,
        model: Model,
        reply: ProviderReply,
        started: Instant,
        fallback_used: bool,
    ) -> LlmResponse {
        let latency_ms = started.elapsed().as_millis() as u64;
        let cost = model.cost(reply.input_tokens, reply.output_tokens);

        if let Ok(mut usage) = self.usage.lock() {
            usage
                .entry(format!("{provider}:{model}"))
                .or_default()
                .record(reply.input_tokens, reply.output_tokens, cost, latency_ms as f64);
        }

        LlmResponse {
            content: reply.content,
            provider,
            model,
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            cost,
            latency_ms,
            finish_reason: reply.finish_reason,
            fallback_used,
        }
    }

    /// Snapshot of the running tally keyed by `provider:model`.
    pub fn usage(&self) -> BTreeMap<String, UsageStats> {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

/// Task type for an agent prompt; plain conversation when nothing matches.
pub fn agent_task_type(prompt: &str) -> TaskType {
    detect_task_type(prompt).unwrap_or(TaskType::Chat)
}
