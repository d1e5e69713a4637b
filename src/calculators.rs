//! Construction quantity and cost calculators.
//!
//! Endpoints:
//! - POST /calculators/concrete - Slab volume and cost estimate (CAD)

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::error::{AppError, AppJson, Validator};

/// Ready-mix price per m³ in CAD by compressive strength.
const CONCRETE_PRICES: &[(u32, f64)] = &[(20, 165.0), (25, 175.0), (30, 185.0), (35, 200.0), (40, 215.0)];

pub const DEFAULT_STRENGTH_MPA: u32 = 30;
pub const DEFAULT_WASTE_PERCENT: f64 = 10.0;
pub const DEFAULT_REBAR_KG_PER_M3: f64 = 100.0;
pub const REBAR_PRICE_PER_KG: f64 = 2.10;
pub const DEFAULT_LABOUR_HOURS_PER_M3: f64 = 1.5;
pub const DEFAULT_LABOUR_RATE: f64 = 85.0;

pub fn concrete_price(strength_mpa: u32) -> Option<f64> {
    CONCRETE_PRICES
        .iter()
        .find(|(mpa, _)| *mpa == strength_mpa)
        .map(|(_, price)| *price)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcreteRequest {
    /// Metres.
    pub length: f64,
    pub width: f64,
    pub thickness: f64,
    #[serde(default = "default_waste")]
    pub waste_percent: f64,
    #[serde(default = "default_strength")]
    pub strength_mpa: u32,
    #[serde(default)]
    pub include_rebar: bool,
    #[serde(default)]
    pub rebar_kg_per_m3: Option<f64>,
    #[serde(default)]
    pub include_labour: bool,
    #[serde(default)]
    pub labour_hours_per_m3: Option<f64>,
    #[serde(default)]
    pub labour_rate: Option<f64>,
}

fn default_waste() -> f64 {
    DEFAULT_WASTE_PERCENT
}

fn default_strength() -> u32 {
    DEFAULT_STRENGTH_MPA
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LineItem {
    pub label: String,
    pub quantity: f64,
    pub unit: &'static str,
    pub unit_price: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConcreteEstimate {
    pub net_volume_m3: f64,
    pub volume_m3: f64,
    pub strength_mpa: u32,
    pub line_items: Vec<LineItem>,
    pub total: f64,
    pub currency: &'static str,
}

fn line(label: String, quantity: f64, unit: &'static str, unit_price: f64) -> LineItem {
    LineItem {
        label,
        quantity: round_to(quantity, 3),
        unit,
        unit_price,
        amount: round_to(quantity * unit_price, 2),
    }
}

/// Volume with waste allowance, then concrete plus optional rebar and labour lines.
pub fn estimate_concrete(request: &ConcreteRequest) -> Result<ConcreteEstimate, AppError> {
    let mut validator = Validator::new();
    validator
        .check(request.length > 0.0, "length", "must be greater than 0")
        .check(request.width > 0.0, "width", "must be greater than 0")
        .check(request.thickness > 0.0, "thickness", "must be greater than 0")
        .non_negative("waste_percent", Some(request.waste_percent))
        .non_negative("rebar_kg_per_m3", request.rebar_kg_per_m3)
        .non_negative("labour_hours_per_m3", request.labour_hours_per_m3)
        .non_negative("labour_rate", request.labour_rate);
    let price = concrete_price(request.strength_mpa);
    validator.check(price.is_some(), "strength_mpa", "must be one of 20, 25, 30, 35, 40");
    validator.finish()?;
    let price = price.unwrap_or_default();

    let net_volume = request.length * request.width * request.thickness;
    let volume = net_volume * (1.0 + request.waste_percent / 100.0);

    let mut line_items = vec![line(
        format!("Béton {} MPa", request.strength_mpa),
        volume,
        "m3",
        price,
    )];
    if request.include_rebar {
        let kg = volume * request.rebar_kg_per_m3.unwrap_or(DEFAULT_REBAR_KG_PER_M3);
        line_items.push(line("Armature".to_string(), kg, "kg", REBAR_PRICE_PER_KG));
    }
    if request.include_labour {
        let hours = volume * request.labour_hours_per_m3.unwrap_or(DEFAULT_LABOUR_HOURS_PER_M3);
        let rate = request.labour_rate.unwrap_or(DEFAULT_LABOUR_RATE);
        line_items.push(line("Main-d'oeuvre".to_string(), hours, "h", rate));
    }
    let total = round_to(line_items.iter().map(|item| item.amount).sum(), 2);

    Ok(ConcreteEstimate {
        net_volume_m3: round_to(net_volume, 3),
        volume_m3: round_to(volume, 3),
        strength_mpa: request.strength_mpa,
        line_items,
        total,
        currency: "CAD",
    })
}

pub async fn concrete(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    AppJson(request): AppJson<ConcreteRequest>,
) -> Result<Json<ConcreteEstimate>, AppError> {
    let estimate = estimate_concrete(&request)?;
    state.metrics.record_calculator("concrete");
    Ok(Json(estimate))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/calculators/concrete", post(concrete))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::testing::{seed_user, server, test_state};
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    fn slab() -> ConcreteRequest {
        ConcreteRequest {
            length: 10.0,
            width: 5.0,
            thickness: 0.15,
            waste_percent: 10.0,
            strength_mpa: 30,
            include_rebar: false,
            rebar_kg_per_m3: None,
            include_labour: false,
            labour_hours_per_m3: None,
            labour_rate: None,
        }
    }

    #[test]
    fn slab_volume_includes_waste() {
        let estimate = estimate_concrete(&slab()).unwrap();
        assert_eq!(estimate.net_volume_m3, 7.5);
        assert_eq!(estimate.volume_m3, 8.25);
        assert_eq!(estimate.line_items.len(), 1);
        // 8.25 m³ × 185 $
        assert_eq!(estimate.total, 1526.25);
    }

    #[test]
    fn optional_lines_add_to_total() {
        let mut request = slab();
        request.include_rebar = true;
        request.include_labour = true;

        let estimate = estimate_concrete(&request).unwrap();

        assert_eq!(estimate.line_items.len(), 3);
        let rebar = &estimate.line_items[1];
        assert_eq!(rebar.quantity, 825.0);
        assert_eq!(rebar.amount, 1732.5);
        let labour = &estimate.line_items[2];
        assert_eq!(labour.quantity, 12.375);
        let sum: f64 = estimate.line_items.iter().map(|i| i.amount).sum();
        assert!((estimate.total - sum).abs() < 0.005);
    }

    #[test]
    fn unknown_strength_is_rejected() {
        let mut request = slab();
        request.strength_mpa = 32;
        let err = estimate_concrete(&request).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn every_listed_strength_has_a_price() {
        for mpa in [20, 25, 30, 35, 40] {
            assert!(concrete_price(mpa).is_some());
        }
        assert_eq!(concrete_price(30), Some(185.0));
    }

    #[tokio::test]
    async fn endpoint_validates_and_counts_uses() {
        let state = test_state();
        let (_, token) = seed_user(&state, UserRole::Technicien);
        let server = server(&state);

        let ok: Value = server
            .post("/calculators/concrete")
            .authorization_bearer(&token)
            .json(&json!({"length": 10, "width": 5, "thickness": 0.15}))
            .await
            .json();
        assert_eq!(ok["volume_m3"], 8.25);
        assert_eq!(ok["currency"], "CAD");

        let response = server
            .post("/calculators/concrete")
            .authorization_bearer(&token)
            .json(&json!({"length": -1, "width": 5, "thickness": 0, "waste_percent": -3}))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["details"].as_array().unwrap().len(), 3);

        assert_eq!(state.metrics.calculator_use_count("concrete"), 1.0);
    }
}
