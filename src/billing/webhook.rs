//! Stripe webhook verification and the event → mirror table.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::AppError;
use crate::store::{Invoice, Store, StoreError, Subscription};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook secret is not configured")]
    NotConfigured,
    #[error("Missing Stripe-Signature header")]
    MissingSignature,
    #[error("Malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("Webhook timestamp outside tolerance")]
    StaleTimestamp,
    #[error("Invalid signature")]
    SignatureMismatch,
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Event object missing {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::NotConfigured => AppError::Unavailable(err.to_string()),
            WebhookError::Store(e) => e.into(),
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[cfg(test)]
pub(crate) fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `t=<unix>,v1=<hex>` against the payload. Any matching `v1` passes.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(WebhookError::StaleTimestamp);
    }

    let verified = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        HmacSha256::new_from_slice(secret.as_bytes())
            .map(|mut mac| {
                mac.update(timestamp.to_string().as_bytes());
                mac.update(b".");
                mac.update(payload);
                mac.verify_slice(&expected).is_ok()
            })
            .unwrap_or(false)
    });
    if verified {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

// ============================================================================
// Object mirroring
// ============================================================================

fn str_at<'a>(object: &'a Value, pointer: &str) -> Option<&'a str> {
    object.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn unix_at(object: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    object
        .pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn major_units(object: &Value, pointer: &str) -> f64 {
    object.pointer(pointer).and_then(Value::as_i64).unwrap_or(0) as f64 / 100.0
}

/// Company from the object's metadata, else from the customer mapping.
fn resolve_company(store: &Store, object: &Value, metadata_pointers: &[&str]) -> Result<String, WebhookError> {
    if let Some(company) = metadata_pointers.iter().find_map(|p| str_at(object, p)) {
        return Ok(company.to_string());
    }
    let customer = str_at(object, "/customer").ok_or(WebhookError::MissingField("customer"))?;
    store
        .company_for_customer(customer)?
        .ok_or(WebhookError::MissingField("metadata.company_id"))
}

fn mirror_subscription(store: &Store, object: &Value, forced_status: Option<&str>) -> Result<(), WebhookError> {
    let id = str_at(object, "/id").ok_or(WebhookError::MissingField("id"))?;
    let customer = str_at(object, "/customer").ok_or(WebhookError::MissingField("customer"))?;
    let company_id = resolve_company(store, object, &["/metadata/company_id"])?;
    if store.billing_customer(&company_id)?.is_none() {
        store.save_billing_customer(&company_id, customer)?;
    }

    let period = |field: &str| {
        unix_at(object, &format!("/{field}")).or_else(|| unix_at(object, &format!("/items/data/0/{field}")))
    };
    let subscription = Subscription {
        id: id.to_string(),
        company_id,
        customer_id: customer.to_string(),
        plan_tier: str_at(object, "/metadata/plan_tier").unwrap_or("starter").to_string(),
        billing_interval: str_at(object, "/items/data/0/price/recurring/interval")
            .unwrap_or("month")
            .to_string(),
        status: forced_status
            .or_else(|| str_at(object, "/status"))
            .unwrap_or("incomplete")
            .to_string(),
        current_period_start: period("current_period_start"),
        current_period_end: period("current_period_end"),
        cancel_at_period_end: object
            .get("cancel_at_period_end")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        trial_end: unix_at(object, "/trial_end"),
        updated_at: Utc::now(),
    };
    store.upsert_subscription(&subscription)?;
    info!(
        subscription_id = %subscription.id,
        company_id = %subscription.company_id,
        status = %subscription.status,
        "Subscription mirrored"
    );
    Ok(())
}

fn mirror_invoice(store: &Store, object: &Value) -> Result<Invoice, WebhookError> {
    let id = str_at(object, "/id").ok_or(WebhookError::MissingField("id"))?;
    let company_id = resolve_company(
        store,
        object,
        &["/metadata/company_id", "/subscription_details/metadata/company_id"],
    )?;
    let invoice = Invoice {
        id: id.to_string(),
        company_id,
        amount_subtotal: major_units(object, "/subtotal"),
        amount_tax: major_units(object, "/tax"),
        amount_total: major_units(object, "/total"),
        currency: str_at(object, "/currency").unwrap_or("cad").to_uppercase(),
        status: str_at(object, "/status").unwrap_or("open").to_string(),
        invoice_pdf: str_at(object, "/invoice_pdf").map(str::to_string),
        created_at: unix_at(object, "/created").unwrap_or_else(Utc::now),
        paid_at: unix_at(object, "/status_transitions/paid_at"),
    };
    store.upsert_invoice(&invoice)?;
    Ok(invoice)
}

fn on_checkout_completed(store: &Store, session: &Value) -> Result<(), WebhookError> {
    let company_id = str_at(session, "/metadata/company_id").ok_or(WebhookError::MissingField("metadata.company_id"))?;
    if let Some(customer) = str_at(session, "/customer") {
        store.save_billing_customer(company_id, customer)?;
    }
    // The subscription events carry the full record; only seed a row if none arrived yet.
    if let (Some(sub_id), Some(customer)) = (str_at(session, "/subscription"), str_at(session, "/customer")) {
        if store.subscription(sub_id)?.is_none() {
            store.upsert_subscription(&Subscription {
                id: sub_id.to_string(),
                company_id: company_id.to_string(),
                customer_id: customer.to_string(),
                plan_tier: str_at(session, "/metadata/plan_tier").unwrap_or("starter").to_string(),
                billing_interval: str_at(session, "/metadata/billing_interval").unwrap_or("month").to_string(),
                status: "incomplete".to_string(),
                current_period_start: None,
                current_period_end: None,
                cancel_at_period_end: false,
                trial_end: None,
                updated_at: Utc::now(),
            })?;
        }
    }
    Ok(())
}

fn on_subscription_changed(store: &Store, object: &Value) -> Result<(), WebhookError> {
    mirror_subscription(store, object, None)
}

fn on_subscription_deleted(store: &Store, object: &Value) -> Result<(), WebhookError> {
    match mirror_subscription(store, object, Some("canceled")) {
        Err(WebhookError::MissingField(_)) => {
            let id = str_at(object, "/id").ok_or(WebhookError::MissingField("id"))?;
            store.set_subscription_status(id, "canceled")?;
            Ok(())
        }
        other => other,
    }
}

fn on_invoice_paid(store: &Store, object: &Value) -> Result<(), WebhookError> {
    mirror_invoice(store, object).map(|_| ())
}

fn on_payment_failed(store: &Store, object: &Value) -> Result<(), WebhookError> {
    let invoice = mirror_invoice(store, object)?;
    warn!(
        invoice_id = %invoice.id,
        company_id = %invoice.company_id,
        amount = invoice.amount_total,
        "Invoice payment failed"
    );
    Ok(())
}

type EventHandler = fn(&Store, &Value) -> Result<(), WebhookError>;

const EVENT_HANDLERS: &[(&str, EventHandler)] = &[
    ("checkout.session.completed", on_checkout_completed),
    ("customer.subscription.created", on_subscription_changed),
    ("customer.subscription.updated", on_subscription_changed),
    ("customer.subscription.deleted", on_subscription_deleted),
    ("invoice.paid", on_invoice_paid),
    ("invoice.payment_failed", on_payment_failed),
];

pub fn handles(kind: &str) -> bool {
    EVENT_HANDLERS.iter().any(|(name, _)| *name == kind)
}

/// Apply a verified event. Returns whether a handler ran.
pub fn dispatch(store: &Store, event: &Event) -> Result<bool, WebhookError> {
    match EVENT_HANDLERS.iter().find(|(name, _)| *name == event.kind) {
        Some((_, handler)) => {
            handler(store, &event.data.object)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
