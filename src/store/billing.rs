use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{now_str, parse_opt_ts, parse_ts, Store, StoreResult};

/// Local mirror of a provider subscription.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub company_id: String,
    pub customer_id: String,
    pub plan_tier: String,
    pub billing_interval: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Amounts are in major currency units.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub company_id: String,
    pub amount_subtotal: f64,
    pub amount_tax: f64,
    pub amount_total: f64,
    pub currency: String,
    pub status: String,
    pub invoice_pdf: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

const SUBSCRIPTION_COLUMNS: &str = "id, company_id, customer_id, plan_tier, billing_interval, status, \
     current_period_start, current_period_end, cancel_at_period_end, trial_end, updated_at";

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        company_id: row.get(1)?,
        customer_id: row.get(2)?,
        plan_tier: row.get(3)?,
        billing_interval: row.get(4)?,
        status: row.get(5)?,
        current_period_start: parse_opt_ts(row.get(6)?)?,
        current_period_end: parse_opt_ts(row.get(7)?)?,
        cancel_at_period_end: row.get(8)?,
        trial_end: parse_opt_ts(row.get(9)?)?,
        updated_at: parse_ts(&row.get::<_, String>(10)?)?,
    })
}

fn ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

impl Store {
    pub fn billing_customer(&self, company_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT customer_id FROM billing_customers WHERE company_id = ?1",
                [company_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn company_for_customer(&self, customer_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT company_id FROM billing_customers WHERE customer_id = ?1",
                [customer_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn save_billing_customer(&self, company_id: &str, customer_id: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO billing_customers (company_id, customer_id) VALUES (?1, ?2) \
             ON CONFLICT(company_id) DO UPDATE SET customer_id = excluded.customer_id",
            params![company_id, customer_id],
        )?;
        Ok(())
    }

    pub fn upsert_subscription(&self, sub: &Subscription) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO subscriptions (id, company_id, customer_id, plan_tier, billing_interval, status, \
             current_period_start, current_period_end, cancel_at_period_end, trial_end, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(id) DO UPDATE SET company_id = excluded.company_id, \
             customer_id = excluded.customer_id, plan_tier = excluded.plan_tier, \
             billing_interval = excluded.billing_interval, status = excluded.status, \
             current_period_start = excluded.current_period_start, \
             current_period_end = excluded.current_period_end, \
             cancel_at_period_end = excluded.cancel_at_period_end, \
             trial_end = excluded.trial_end, updated_at = excluded.updated_at",
            params![
                sub.id,
                sub.company_id,
                sub.customer_id,
                sub.plan_tier,
                sub.billing_interval,
                sub.status,
                ts(sub.current_period_start),
                ts(sub.current_period_end),
                sub.cancel_at_period_end,
                ts(sub.trial_end),
                sub.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn set_subscription_status(&self, id: &str, status: &str) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "UPDATE subscriptions SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, now_str()],
        )?;
        Ok(changed > 0)
    }

    pub fn subscription(&self, id: &str) -> StoreResult<Option<Subscription>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_subscription).optional()?)
    }

    /// Most recently updated subscription for the company.
    pub fn subscription_for_company(&self, company_id: &str) -> StoreResult<Option<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE company_id = ?1 \
             ORDER BY updated_at DESC LIMIT 1"
        );
        Ok(self.conn.query_row(&sql, [company_id], row_to_subscription).optional()?)
    }

    pub fn upsert_invoice(&self, invoice: &Invoice) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO invoices (id, company_id, amount_subtotal, amount_tax, amount_total, currency, \
             status, invoice_pdf, created_at, paid_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, invoice_pdf = excluded.invoice_pdf, \
             paid_at = excluded.paid_at, amount_total = excluded.amount_total",
            params![
                invoice.id,
                invoice.company_id,
                invoice.amount_subtotal,
                invoice.amount_tax,
                invoice.amount_total,
                invoice.currency,
                invoice.status,
                invoice.invoice_pdf,
                invoice.created_at.to_rfc3339(),
                ts(invoice.paid_at)
            ],
        )?;
        Ok(())
    }

    pub fn invoices_for_company(&self, company_id: &str) -> StoreResult<Vec<Invoice>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, amount_subtotal, amount_tax, amount_total, currency, status, \
             invoice_pdf, created_at, paid_at FROM invoices WHERE company_id = ?1 ORDER BY created_at DESC",
        )?;
        let invoices = stmt
            .query_map([company_id], |row| {
                Ok(Invoice {
                    id: row.get(0)?,
                    company_id: row.get(1)?,
                    amount_subtotal: row.get(2)?,
                    amount_tax: row.get(3)?,
                    amount_total: row.get(4)?,
                    currency: row.get(5)?,
                    status: row.get(6)?,
                    invoice_pdf: row.get(7)?,
                    created_at: parse_ts(&row.get::<_, String>(8)?)?,
                    paid_at: parse_opt_ts(row.get(9)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(invoices)
    }
}
