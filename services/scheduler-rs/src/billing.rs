//! Billing usage reporting and reconciliation.
//!
//! The reporter closes out Pro billing periods: it snapshots the live Pro
//! counter, prices the overage, files an invoice item with the external
//! billing service, and records the period row. The reconciler is a
//! read-only audit that flags drift between what was reported and what the
//! counter holds now.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use common_rs::counter::WorkspaceCounters;

#[derive(Debug, Clone)]
pub struct BillingRates {
    pub included_clicks: i64,
    pub overage_unit_clicks: i64,
    pub overage_unit_price: i64,
}

/// Clicks over the allotment, rounded up to whole billing units.
pub fn overage_units(total_clicks: i64, included_clicks: i64, unit_clicks: i64) -> i64 {
    let over = (total_clicks - included_clicks).max(0);
    if over == 0 {
        0
    } else {
        (over + unit_clicks - 1) / unit_clicks
    }
}

pub struct InvoiceClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, serde::Deserialize)]
struct InvoiceItemResponse {
    id: String,
}

impl InvoiceClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// File an overage invoice item with the external billing service.
    pub async fn create_invoice_item(
        &self,
        workspace_id: &str,
        amount: i64,
        description: &str,
    ) -> Result<String> {
        let url = format!("{}/invoice-items", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "workspace_id": workspace_id,
                "amount": amount,
                "description": description,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<InvoiceItemResponse>()
            .await?;
        Ok(resp.id)
    }
}

#[derive(Debug, FromRow)]
struct DuePeriod {
    workspace_id: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
}

/// Close out every Pro workspace whose period has ended and is not yet
/// recorded. Per-workspace failures are logged and the run continues; the
/// unique period row makes the next daily tick a retry.
pub async fn run_reporter(
    pool: &PgPool,
    counters: &WorkspaceCounters,
    invoices: &InvoiceClient,
    rates: &BillingRates,
) -> Result<u32> {
    let due: Vec<DuePeriod> = sqlx::query_as(
        "SELECT w.id AS workspace_id, w.current_period_start AS period_start, \
                w.current_period_end AS period_end \
         FROM workspaces w \
         WHERE w.plan = 'pro' \
           AND w.current_period_start IS NOT NULL \
           AND w.current_period_end IS NOT NULL \
           AND w.current_period_end < now() \
           AND NOT EXISTS ( \
               SELECT 1 FROM billing_usage_periods b \
               WHERE b.workspace_id = w.id \
                 AND b.period_start = w.current_period_start \
                 AND b.period_end = w.current_period_end)",
    )
    .fetch_all(pool)
    .await?;

    let mut reported = 0u32;
    for period in &due {
        match report_period(pool, counters, invoices, rates, period).await {
            Ok(()) => reported += 1,
            Err(err) => {
                tracing::warn!(workspace_id = %period.workspace_id, "usage report failed: {err:#}");
            }
        }
    }
    Ok(reported)
}

async fn report_period(
    pool: &PgPool,
    counters: &WorkspaceCounters,
    invoices: &InvoiceClient,
    rates: &BillingRates,
    period: &DuePeriod,
) -> Result<()> {
    let usage = counters.get_pro_usage(&period.workspace_id).await?;
    let total_clicks = usage.tracked_clicks;
    let units = overage_units(total_clicks, rates.included_clicks, rates.overage_unit_clicks);
    let amount = units * rates.overage_unit_price;

    let invoice_item_id = if units > 0 {
        let description = format!(
            "Click overage: {total_clicks} tracked clicks, {} included",
            rates.included_clicks
        );
        Some(
            invoices
                .create_invoice_item(&period.workspace_id, amount, &description)
                .await?,
        )
    } else {
        None
    };

    sqlx::query(
        "INSERT INTO billing_usage_periods \
         (id, workspace_id, period_start, period_end, total_clicks, included_clicks, \
          overage_units, overage_amount, invoice_item_id, reported_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
         ON CONFLICT (workspace_id, period_start, period_end) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(&period.workspace_id)
    .bind(period.period_start)
    .bind(period.period_end)
    .bind(total_clicks)
    .bind(rates.included_clicks)
    .bind(units)
    .bind(amount)
    .bind(&invoice_item_id)
    .execute(pool)
    .await?;

    tracing::info!(
        workspace_id = %period.workspace_id,
        total_clicks,
        overage_units = units,
        overage_amount = amount,
        "billing usage period recorded"
    );
    Ok(())
}

#[derive(Debug, FromRow)]
struct ReportedPeriod {
    workspace_id: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    total_clicks: i64,
}

/// Compare recently reported periods against the live counter. Log-only:
/// this job never mutates counters or billing records.
pub async fn run_reconciler(
    pool: &PgPool,
    counters: &WorkspaceCounters,
    tolerance_clicks: i64,
) -> Result<u32> {
    let recent: Vec<ReportedPeriod> = sqlx::query_as(
        "SELECT workspace_id, period_start, period_end, total_clicks \
         FROM billing_usage_periods \
         WHERE reported_at > now() - interval '7 days'",
    )
    .fetch_all(pool)
    .await?;

    let mut mismatches = 0u32;
    for row in &recent {
        let usage = match counters.get_pro_usage(&row.workspace_id).await {
            Ok(usage) => usage,
            Err(err) => {
                tracing::warn!(workspace_id = %row.workspace_id, "counter read failed: {err:#}");
                continue;
            }
        };

        // Only comparable while the counter still holds the reported period;
        // after a webhook rolls it forward there is nothing to check against.
        if usage.period_start != Some(row.period_start)
            || usage.period_end != Some(row.period_end)
        {
            continue;
        }

        let drift = (usage.tracked_clicks - row.total_clicks).abs();
        if drift > tolerance_clicks {
            mismatches += 1;
            tracing::error!(
                workspace_id = %row.workspace_id,
                reported = row.total_clicks,
                live = usage.tracked_clicks,
                drift,
                "BILLING_MISMATCH"
            );
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_overage_under_or_at_the_allotment() {
        assert_eq!(overage_units(0, 2_000_000, 100_000), 0);
        assert_eq!(overage_units(1_999_999, 2_000_000, 100_000), 0);
        assert_eq!(overage_units(2_000_000, 2_000_000, 100_000), 0);
    }

    #[test]
    fn overage_rounds_up_to_whole_units() {
        // 150k over → 2 units; at unit price 100 that invoices 200.
        let units = overage_units(2_150_000, 2_000_000, 100_000);
        assert_eq!(units, 2);
        assert_eq!(units * 100, 200);

        assert_eq!(overage_units(2_000_001, 2_000_000, 100_000), 1);
        assert_eq!(overage_units(2_100_000, 2_000_000, 100_000), 1);
        assert_eq!(overage_units(2_100_001, 2_000_000, 100_000), 2);
    }
}
