//! Minimal Stripe REST client: customers, checkout and portal sessions.
//!
//! Stripe takes form-encoded bodies with bracketed keys for nested fields
//! (`metadata[company_id]`, `line_items[0][price]`).

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::plans::{BillingInterval, PlanTier};
use crate::config::BillingConfig;
use crate::error::AppError;

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("Stripe is not configured")]
    NotConfigured,
    #[error("Stripe request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Stripe returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

impl From<StripeError> for AppError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::NotConfigured => AppError::Unavailable(err.to_string()),
            _ => AppError::Upstream(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

pub struct StripeClient {
    http: Client,
    base_url: String,
    secret_key: Option<String>,
    success_url: String,
    cancel_url: String,
    portal_return_url: String,
    trial_days: u32,
}

impl StripeClient {
    pub fn new(config: &BillingConfig, http: Client) -> Self {
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
            portal_return_url: config.portal_return_url.clone(),
            trial_days: config.trial_days,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret_key.is_some()
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> Result<Created, StripeError> {
        let key = self.secret_key.as_deref().ok_or(StripeError::NotConfigured)?;
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(key)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<Created>().await?)
    }

    pub async fn create_customer(&self, company_id: &str, email: &str, name: &str) -> Result<String, StripeError> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            ("name".to_string(), name.to_string()),
            ("metadata[company_id]".to_string(), company_id.to_string()),
        ];
        let created = self.post_form("/customers", &form).await?;
        info!(company_id, customer_id = %created.id, "Stripe customer created");
        Ok(created.id)
    }

    /// Subscription checkout with a trial; returns the hosted page URL.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        company_id: &str,
        tier: PlanTier,
        interval: BillingInterval,
        price_id: &str,
    ) -> Result<String, StripeError> {
        let form: Vec<(String, String)> = [
            ("customer", customer_id.to_string()),
            ("mode", "subscription".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][price]", price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "success_url",
                format!("{}?session_id={{CHECKOUT_SESSION_ID}}", self.success_url),
            ),
            ("cancel_url", self.cancel_url.clone()),
            ("subscription_data[trial_period_days]", self.trial_days.to_string()),
            ("subscription_data[metadata][company_id]", company_id.to_string()),
            ("subscription_data[metadata][plan_tier]", tier.to_string()),
            ("automatic_tax[enabled]", "true".to_string()),
            ("tax_id_collection[enabled]", "true".to_string()),
            ("metadata[company_id]", company_id.to_string()),
            ("metadata[plan_tier]", tier.to_string()),
            ("metadata[billing_interval]", interval.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let created = self.post_form("/checkout/sessions", &form).await?;
        created.url.ok_or_else(|| StripeError::Api {
            status: 200,
            message: "checkout session has no url".to_string(),
        })
    }

    pub async fn create_portal_session(&self, customer_id: &str) -> Result<String, StripeError> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), self.portal_return_url.clone()),
        ];
        let created = self.post_form("/billing_portal/sessions", &form).await?;
        created.url.ok_or_else(|| StripeError::Api {
            status: 200,
            message: "portal session has no url".to_string(),
        })
    }
}
