//! Application state and router assembly.
//!
//! Endpoints owned here:
//! - GET /health - Liveness
//! - GET /ready - Store and cache readiness
//! - GET /metrics - Prometheus exposition
//!
//! Every feature module contributes a `routes()` router that is merged below.

mod handlers;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::TokenService;
use crate::billing::StripeClient;
use crate::cache::{RemoteStore, TieredCache};
use crate::config::Config;
use crate::error::AppError;
use crate::http::{create_client, create_client_with_timeout};
use crate::llm::{AgentRegistry, LlmRouter};
use crate::metrics::{self, Metrics, MetricsError};
use crate::notifications::{ConnectionRegistry, NotificationService};
use crate::security;
use crate::store::Store;

pub use handlers::{HealthResponse, ReadyResponse};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Mutex<Store>>,
    pub tokens: TokenService,
    pub cache: TieredCache,
    pub llm: LlmRouter,
    pub agents: AgentRegistry,
    pub connections: Arc<ConnectionRegistry>,
    pub notifier: NotificationService,
    pub stripe: StripeClient,
    /// Client for non-LLM vendor calls, on the default timeout.
    pub http: reqwest::Client,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, store: Store, remote: Arc<dyn RemoteStore>) -> Result<Self, StartupError> {
        let config = Arc::new(config);
        let http = create_client()?;
        let llm_http = create_client_with_timeout(Duration::from_secs(config.llm.timeout_secs))?;
        let db = Arc::new(Mutex::new(store));
        let connections = Arc::new(ConnectionRegistry::new());

        Ok(Self {
            tokens: TokenService::new(&config.auth),
            cache: TieredCache::new(&config.cache, remote),
            llm: LlmRouter::new(&config.llm, llm_http),
            agents: AgentRegistry::new(&config.llm),
            notifier: NotificationService::new(
                db.clone(),
                connections.clone(),
                http.clone(),
                config.notifications.clone(),
            ),
            stripe: StripeClient::new(&config.billing, http.clone()),
            metrics: Metrics::new()?,
            connections,
            http,
            db,
            config,
        })
    }

    /// Lock the store; a poisoned mutex becomes a 500.
    pub fn lock_db(&self) -> Result<MutexGuard<'_, Store>, AppError> {
        self.db
            .lock()
            .map_err(|e| AppError::Internal(format!("Database lock error: {e}")))
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    AppError::Internal(format!("Handler panicked: {detail}")).into_response()
}

/// Build the full application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics_text))
        .merge(crate::auth::routes())
        .merge(crate::projects::routes())
        .merge(crate::calculators::routes())
        .merge(crate::llm::routes())
        .merge(crate::billing::routes())
        .merge(crate::notifications::routes())
        .merge(crate::oauth::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), security::rate_limit))
        .route_layer(middleware::from_fn_with_state(state.clone(), metrics::track_requests));

    let router = security::security_headers(&state.config)
        .into_iter()
        .fold(router, |router, layer| router.layer(layer));

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}
