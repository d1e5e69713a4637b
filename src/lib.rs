//! ROADY - Construction management backend.
//!
//! Features:
//! - JWT authentication with role-based permissions
//! - Projects and tasks with company scoping and cached reads
//! - Concrete quantity and cost calculator
//! - Multi-provider LLM routing with retries, fallback and agent memory
//! - Stripe subscriptions mirrored from signed webhooks
//! - Push, email, SMS, websocket and in-app notifications
//! - Social account connections over OAuth2
//! - Per-client rate limiting and security response headers
//! - Health, readiness and Prometheus metrics

#[macro_use]
mod macros;

pub mod api;
pub mod auth;
pub mod billing;
pub mod cache;
pub mod calculators;
pub mod config;
pub mod error;
pub mod http;
pub mod llm;
pub mod metrics;
pub mod notifications;
pub mod oauth;
pub mod projects;
pub mod security;
pub mod store;

#[cfg(test)]
mod testing;
