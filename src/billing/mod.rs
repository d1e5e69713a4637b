//! Subscription billing backed by Stripe.
//!
//! Endpoints:
//! - GET /billing/plans - Plans with Quebec taxes applied
//! - POST /billing/checkout - Start a subscription checkout (finance:edit)
//! - POST /billing/portal - Customer portal session (finance:edit)
//! - POST /billing/webhook - Signed provider events
//! - GET /billing/subscription/{company_id} - Mirrored subscription (finance:view)
//! - GET /billing/invoices/{company_id} - Mirrored invoices (finance:view)
//!
//! Subscriptions and invoices are never written by the API directly; the
//! webhook keeps the local mirror in step with the provider.

mod handlers;
pub mod plans;
mod stripe;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::AppState;

pub use plans::{quebec_taxes, BillingInterval, Plan, PlanTier, TaxBreakdown, PLANS};
pub use stripe::{StripeClient, StripeError};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/billing/plans", get(handlers::list_plans))
        .route("/billing/checkout", post(handlers::checkout))
        .route("/billing/portal", post(handlers::portal))
        .route("/billing/webhook", post(handlers::stripe_webhook))
        .route("/billing/subscription/{company_id}", get(handlers::get_subscription))
        .route("/billing/invoices/{company_id}", get(handlers::list_invoices))
}
