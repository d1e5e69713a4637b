//! Prometheus metrics for the HTTP surface and the LLM router.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `http_requests_total` | Counter | `method`, `endpoint`, `status` |
//! | `http_request_duration_seconds` | Histogram | `method`, `endpoint` |
//! | `llm_requests_total` | Counter | `provider`, `model` |
//! | `llm_cost_usd_total` | Counter | `provider`, `model` |
//! | `calculator_uses_total` | Counter | `calculator_type` |
//!
//! Each [`Metrics`] owns its own registry, so tests can build independent
//! instances without colliding on metric names.

use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::api::AppState;

pub const PROCESS_TIME_HEADER: &str = "x-process-time";

const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration: HistogramVec,
    llm_requests_total: CounterVec,
    llm_cost_total: CounterVec,
    calculator_uses_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(http_request_duration.clone()))?;

        let llm_requests_total = CounterVec::new(
            Opts::new("llm_requests_total", "Successful LLM completions"),
            &["provider", "model"],
        )?;
        registry.register(Box::new(llm_requests_total.clone()))?;

        let llm_cost_total = CounterVec::new(
            Opts::new("llm_cost_usd_total", "Accumulated LLM spend in USD"),
            &["provider", "model"],
        )?;
        registry.register(Box::new(llm_cost_total.clone()))?;

        let calculator_uses_total = CounterVec::new(
            Opts::new("calculator_uses_total", "Calculator invocations"),
            &["calculator_type"],
        )?;
        registry.register(Box::new(calculator_uses_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            llm_requests_total,
            llm_cost_total,
            calculator_uses_total,
        })
    }

    pub fn record_http(&self, method: &str, endpoint: &str, status: u16, elapsed_secs: f64) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, endpoint])
            .observe(elapsed_secs);
    }

    pub fn record_llm(&self, provider: &str, model: &str, cost_usd: f64) {
        self.llm_requests_total.with_label_values(&[provider, model]).inc();
        self.llm_cost_total.with_label_values(&[provider, model]).inc_by(cost_usd);
    }

    pub fn record_calculator(&self, calculator: &str) {
        self.calculator_uses_total.with_label_values(&[calculator]).inc();
    }

    pub fn http_request_count(&self, method: &str, endpoint: &str, status: u16) -> f64 {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .get()
    }

    pub fn llm_request_count(&self, provider: &str, model: &str) -> f64 {
        self.llm_requests_total.with_label_values(&[provider, model]).get()
    }

    pub fn calculator_use_count(&self, calculator: &str) -> f64 {
        self.calculator_uses_total.with_label_values(&[calculator]).get()
    }

    /// Prometheus text exposition of every registered family.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

/// Middleware recording request count and latency, and stamping
/// `X-Process-Time` (seconds) on the response.
pub async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let mut response = next.run(request).await;

    let elapsed = started.elapsed().as_secs_f64();
    state
        .metrics
        .record_http(&method, &endpoint, response.status().as_u16(), elapsed);
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed:.6}")) {
        response.headers_mut().insert(PROCESS_TIME_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_http_requests_by_label() {
        let metrics = Metrics::new().unwrap();
        metrics.record_http("GET", "/health", 200, 0.002);
        metrics.record_http("GET", "/health", 200, 0.003);
        metrics.record_http("GET", "/health", 503, 0.001);

        assert_eq!(metrics.http_request_count("GET", "/health", 200), 2.0);
        assert_eq!(metrics.http_request_count("GET", "/health", 503), 1.0);
    }

    #[test]
    fn records_llm_usage() {
        let metrics = Metrics::new().unwrap();
        metrics.record_llm("claude", "claude-haiku-4-5-20250514", 0.0015);

        assert_eq!(metrics.llm_request_count("claude", "claude-haiku-4-5-20250514"), 1.0);
    }

    #[test]
    fn encodes_prometheus_text() {
        let metrics = Metrics::new().unwrap();
        metrics.record_http("POST", "/auth/login", 200, 0.05);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("http_request_duration_seconds_bucket"));
        assert!(text.contains("endpoint=\"/auth/login\""));
    }

    #[test]
    fn instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_http("GET", "/ready", 200, 0.01);

        assert_eq!(b.http_request_count("GET", "/ready", 200), 0.0);
    }
}
