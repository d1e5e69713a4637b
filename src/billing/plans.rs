//! Subscription plans, feature limits and Quebec sales tax.

use serde::Serialize;

string_enum! {
    pub enum PlanTier {
        Free => "free",
        Starter => "starter",
        Professional => "professional",
        Enterprise => "enterprise",
    }
}

string_enum! {
    pub enum BillingInterval {
        Monthly => "month",
        Yearly => "year",
    }
}

/// Federal GST (TPS).
pub const TPS_RATE: f64 = 0.05;
/// Quebec QST (TVQ).
pub const TVQ_RATE: f64 = 0.09975;

/// `-1` means unlimited.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PlanFeatures {
    pub projects: i32,
    pub users: i32,
    pub storage_gb: i32,
    pub agents_included: bool,
    pub calculators: bool,
    pub reports: bool,
    pub api_access: bool,
    pub priority_support: bool,
    pub custom_branding: bool,
    pub sso: bool,
    pub audit_logs: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Plan {
    pub tier: PlanTier,
    pub name: &'static str,
    pub description: &'static str,
    pub monthly_price: f64,
    pub yearly_price: f64,
    #[serde(skip)]
    pub monthly_price_id: &'static str,
    #[serde(skip)]
    pub yearly_price_id: &'static str,
    pub features: PlanFeatures,
}

impl Plan {
    /// Provider price id for the interval; `None` for the free plan.
    pub fn price_id(&self, interval: BillingInterval) -> Option<&'static str> {
        let id = match interval {
            BillingInterval::Monthly => self.monthly_price_id,
            BillingInterval::Yearly => self.yearly_price_id,
        };
        (!id.is_empty()).then_some(id)
    }

    pub fn price(&self, interval: BillingInterval) -> f64 {
        match interval {
            BillingInterval::Monthly => self.monthly_price,
            BillingInterval::Yearly => self.yearly_price,
        }
    }
}

pub const PLANS: &[Plan] = &[
    Plan {
        tier: PlanTier::Free,
        name: "Gratuit",
        description: "Pour démarrer",
        monthly_price: 0.0,
        yearly_price: 0.0,
        monthly_price_id: "",
        yearly_price_id: "",
        features: PlanFeatures {
            projects: 2,
            users: 1,
            storage_gb: 1,
            agents_included: false,
            calculators: true,
            reports: false,
            api_access: false,
            priority_support: false,
            custom_branding: false,
            sso: false,
            audit_logs: false,
        },
    },
    Plan {
        tier: PlanTier::Starter,
        name: "Démarrage",
        description: "Pour les petites équipes",
        monthly_price: 49.0,
        yearly_price: 470.0,
        monthly_price_id: "price_starter_monthly",
        yearly_price_id: "price_starter_yearly",
        features: PlanFeatures {
            projects: 10,
            users: 5,
            storage_gb: 10,
            agents_included: true,
            calculators: true,
            reports: true,
            api_access: false,
            priority_support: false,
            custom_branding: false,
            sso: false,
            audit_logs: false,
        },
    },
    Plan {
        tier: PlanTier::Professional,
        name: "Professionnel",
        description: "Pour les équipes en croissance",
        monthly_price: 149.0,
        yearly_price: 1430.0,
        monthly_price_id: "price_pro_monthly",
        yearly_price_id: "price_pro_yearly",
        features: PlanFeatures {
            projects: 50,
            users: 25,
            storage_gb: 100,
            agents_included: true,
            calculators: true,
            reports: true,
            api_access: true,
            priority_support: true,
            custom_branding: true,
            sso: false,
            audit_logs: true,
        },
    },
    Plan {
        tier: PlanTier::Enterprise,
        name: "Entreprise",
        description: "Solutions sur mesure",
        monthly_price: 499.0,
        yearly_price: 4790.0,
        monthly_price_id: "price_enterprise_monthly",
        yearly_price_id: "price_enterprise_yearly",
        features: PlanFeatures {
            projects: -1,
            users: -1,
            storage_gb: -1,
            agents_included: true,
            calculators: true,
            reports: true,
            api_access: true,
            priority_support: true,
            custom_branding: true,
            sso: true,
            audit_logs: true,
        },
    },
];

impl PlanTier {
    pub fn plan(&self) -> &'static Plan {
        // PLANS is ordered like PlanTier::ALL
        &PLANS[*self as usize]
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TaxBreakdown {
    pub subtotal: f64,
    pub tps: f64,
    pub tvq: f64,
    pub total: f64,
}

fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn quebec_taxes(subtotal: f64) -> TaxBreakdown {
    let tps = cents(subtotal * TPS_RATE);
    let tvq = cents(subtotal * TVQ_RATE);
    TaxBreakdown {
        subtotal,
        tps,
        tvq,
        total: cents(subtotal + tps + tvq),
    }
}
