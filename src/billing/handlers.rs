use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::plans::{quebec_taxes, BillingInterval, Plan, PlanTier, TaxBreakdown, PLANS};
use super::webhook::{self, Event, WebhookError, SIGNATURE_HEADER};
use crate::api::AppState;
use crate::auth::{CurrentUser, Permission, UserRole};
use crate::error::{AppError, AppJson, AppQuery};
use crate::store::{Invoice, Subscription};

#[derive(Debug, Serialize)]
pub struct PlanView {
    #[serde(flatten)]
    pub plan: Plan,
    pub monthly_with_taxes: TaxBreakdown,
    pub yearly_with_taxes: TaxBreakdown,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan_tier: PlanTier,
    #[serde(default = "default_interval")]
    pub interval: BillingInterval,
    #[serde(default)]
    pub company_id: Option<String>,
}

fn default_interval() -> BillingInterval {
    BillingInterval::Monthly
}

#[derive(Debug, Deserialize, Default)]
pub struct PortalQuery {
    #[serde(default)]
    pub company_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub portal_url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub event: String,
}

/// The caller's company unless an explicit one is given; only super admins
/// may act for another company.
fn target_company(user: &CurrentUser, requested: Option<String>) -> Result<String, AppError> {
    let own = user.user.company_id.clone();
    match (requested, own) {
        (Some(requested), Some(own)) if requested == own => Ok(requested),
        (Some(requested), _) if user.user.role == UserRole::SuperAdmin => Ok(requested),
        (Some(_), _) => Err(AppError::NotFound("Company not found".to_string())),
        (None, Some(own)) => Ok(own),
        (None, None) => Err(AppError::validation("company_id", "user has no company")),
    }
}

pub async fn list_plans() -> Json<Vec<PlanView>> {
    Json(
        PLANS
            .iter()
            .map(|plan| PlanView {
                plan: *plan,
                monthly_with_taxes: quebec_taxes(plan.monthly_price),
                yearly_with_taxes: quebec_taxes(plan.yearly_price),
            })
            .collect(),
    )
}

pub async fn checkout(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppJson(request): AppJson<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    user.require(Permission::FinanceEdit)?;
    let company_id = target_company(&user, request.company_id)?;
    let plan = request.plan_tier.plan();
    let price_id = plan
        .price_id(request.interval)
        .ok_or_else(|| AppError::BadRequest("The free plan does not need a checkout".to_string()))?;

    let (existing, company_name) = {
        let db = state.lock_db()?;
        (db.billing_customer(&company_id)?, db.company_name(&company_id)?)
    };
    let customer_id = match existing {
        Some(id) => id,
        None => {
            let name = company_name.unwrap_or_else(|| user.user.full_name.clone());
            let id = state.stripe.create_customer(&company_id, &user.user.email, &name).await?;
            state.lock_db()?.save_billing_customer(&company_id, &id)?;
            id
        }
    };

    let checkout_url = state
        .stripe
        .create_checkout_session(&customer_id, &company_id, plan.tier, request.interval, price_id)
        .await?;
    info!(company_id = %company_id, plan = %plan.tier, interval = %request.interval, "Checkout session created");
    Ok(Json(CheckoutResponse { checkout_url }))
}

pub async fn portal(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    AppQuery(query): AppQuery<PortalQuery>,
) -> Result<Json<PortalResponse>, AppError> {
    user.require(Permission::FinanceEdit)?;
    let company_id = target_company(&user, query.company_id)?;

    let customer_id = state
        .lock_db()?
        .billing_customer(&company_id)?
        .ok_or_else(|| AppError::NotFound("No billing customer for this company".to_string()))?;
    let portal_url = state.stripe.create_portal_session(&customer_id).await?;
    Ok(Json(PortalResponse { portal_url }))
}

pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let billing = &state.config.billing;
    let secret = billing.webhook_secret.as_deref().ok_or(WebhookError::NotConfigured)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    if let Err(e) = webhook::verify_signature(
        &body,
        signature,
        secret,
        billing.webhook_tolerance_secs,
        Utc::now().timestamp(),
    ) {
        warn!(error = %e, "Rejected webhook");
        return Err(e.into());
    }
    let event: Event = serde_json::from_slice(&body).map_err(WebhookError::from)?;

    let outcome = {
        let db = state.lock_db()?;
        webhook::dispatch(&db, &event)
    };
    match outcome {
        Ok(true) => info!(event_id = %event.id, event = %event.kind, "Webhook handled"),
        Ok(false) => info!(event = %event.kind, "Webhook ignored"),
        // Handler failures are logged, never returned to the provider.
        Err(e) => error!(event_id = %event.id, event = %event.kind, error = %e, "Webhook handler failed"),
    }

    Ok(Json(WebhookAck {
        status: "success",
        event: event.kind,
    }))
}

pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(company_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    user.require(Permission::FinanceView)?;
    let company_id = target_company(&user, Some(company_id))?;
    let subscription = state.lock_db()?.subscription_for_company(&company_id)?;
    subscription
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No subscription for this company".to_string()))
}

pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(company_id): Path<String>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    user.require(Permission::FinanceView)?;
    let company_id = target_company(&user, Some(company_id))?;
    let invoices = state.lock_db()?.invoices_for_company(&company_id)?;
    Ok(Json(invoices))
}
