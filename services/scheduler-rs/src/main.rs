/// Scheduled subsystem: aggregation, retention, billing report, reconciliation.
///
/// Aggregation runs on a short interval; the other three run once a day at a
/// fixed UTC hour. Job failures are logged and the next tick retries from
/// persisted state (the watermark, the unique period rows), so no job needs
/// its own recovery bookkeeping.
mod aggregate;
mod billing;
mod config;
mod retention;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use common_rs::counter::WorkspaceCounters;

// ── Metrics ───────────────────────────────────────────────────────────────────

struct SchedulerMetrics {
    jobs_run_total: IntCounterVec,
    job_failures_total: IntCounterVec,
    clicks_rolled_up_total: IntCounter,
    clicks_purged_total: IntCounter,
    periods_reported_total: IntCounter,
    billing_mismatches_total: IntCounter,
}

fn init_metrics(registry: &Registry) -> SchedulerMetrics {
    let runs = IntCounterVec::new(
        Opts::new("scheduler_jobs_run_total", "Job invocations by job"),
        &["job"],
    )
    .unwrap();
    let failures = IntCounterVec::new(
        Opts::new("scheduler_job_failures_total", "Failed job invocations by job"),
        &["job"],
    )
    .unwrap();
    let rolled_up =
        IntCounter::new("scheduler_clicks_rolled_up_total", "Raw clicks aggregated").unwrap();
    let purged =
        IntCounter::new("scheduler_clicks_purged_total", "Raw clicks deleted by retention")
            .unwrap();
    let reported =
        IntCounter::new("scheduler_periods_reported_total", "Billing periods recorded").unwrap();
    let mismatches =
        IntCounter::new("scheduler_billing_mismatches_total", "Reconciliation drift events")
            .unwrap();
    registry.register(Box::new(runs.clone())).ok();
    registry.register(Box::new(failures.clone())).ok();
    registry.register(Box::new(rolled_up.clone())).ok();
    registry.register(Box::new(purged.clone())).ok();
    registry.register(Box::new(reported.clone())).ok();
    registry.register(Box::new(mismatches.clone())).ok();
    SchedulerMetrics {
        jobs_run_total: runs,
        job_failures_total: failures,
        clicks_rolled_up_total: rolled_up,
        clicks_purged_total: purged,
        periods_reported_total: reported,
        billing_mismatches_total: mismatches,
    }
}

// ── Scheduling ────────────────────────────────────────────────────────────────

/// The next occurrence of `hour:00:00Z` strictly after `now`.
fn next_daily_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour.min(23), 0, 0)
        .expect("clamped hour is always valid")
        .and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

async fn sleep_until_daily(hour: u32) {
    let now = Utc::now();
    let next = next_daily_run(now, hour);
    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
    tokio::time::sleep(wait).await;
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("starting scheduler");

    // Database pool. The edge service owns the schema; this service assumes it.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    tracing::info!("database ready");

    let registry = Arc::new(Registry::new());
    let metrics = Arc::new(init_metrics(&registry));
    let counters = WorkspaceCounters::new(pool.clone());

    // Aggregation: every few minutes, drain the raw log into rollups.
    {
        let pool = pool.clone();
        let metrics = Arc::clone(&metrics);
        let interval_seconds = config.aggregation_interval_seconds;
        let batch_size = config.aggregation_batch_size;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
            interval.tick().await; // consume the immediate first tick
            loop {
                interval.tick().await;
                metrics.jobs_run_total.with_label_values(&["aggregation"]).inc();
                match aggregate::run(&pool, batch_size).await {
                    Ok(rows) => metrics.clicks_rolled_up_total.inc_by(rows),
                    Err(err) => {
                        metrics
                            .job_failures_total
                            .with_label_values(&["aggregation"])
                            .inc();
                        tracing::error!("aggregation failed: {err:#}");
                    }
                }
            }
        });
    }

    // Retention: daily purge of raw clicks past the horizon.
    {
        let pool = pool.clone();
        let metrics = Arc::clone(&metrics);
        let hour = config.retention_hour_utc;
        let days = config.retention_days_free;
        let batch_size = config.retention_batch_size;
        tokio::spawn(async move {
            loop {
                sleep_until_daily(hour).await;
                metrics.jobs_run_total.with_label_values(&["retention"]).inc();
                match retention::run(&pool, days, batch_size).await {
                    Ok(rows) => metrics.clicks_purged_total.inc_by(rows),
                    Err(err) => {
                        metrics
                            .job_failures_total
                            .with_label_values(&["retention"])
                            .inc();
                        tracing::error!("retention failed: {err:#}");
                    }
                }
            }
        });
    }

    // Billing report: close out ended Pro periods.
    {
        let pool = pool.clone();
        let metrics = Arc::clone(&metrics);
        let counters = counters.clone();
        let invoices = billing::InvoiceClient::new(config.billing_api_url.clone());
        let rates = billing::BillingRates {
            included_clicks: config.pro_included_clicks,
            overage_unit_clicks: config.pro_overage_unit_clicks,
            overage_unit_price: config.pro_overage_unit_price,
        };
        let hour = config.billing_report_hour_utc;
        tokio::spawn(async move {
            loop {
                sleep_until_daily(hour).await;
                metrics.jobs_run_total.with_label_values(&["billing_report"]).inc();
                match billing::run_reporter(&pool, &counters, &invoices, &rates).await {
                    Ok(reported) => metrics.periods_reported_total.inc_by(u64::from(reported)),
                    Err(err) => {
                        metrics
                            .job_failures_total
                            .with_label_values(&["billing_report"])
                            .inc();
                        tracing::error!("billing report failed: {err:#}");
                    }
                }
            }
        });
    }

    // Reconciliation: audit reported periods against the live counter.
    {
        let pool = pool.clone();
        let metrics = Arc::clone(&metrics);
        let counters = counters.clone();
        let hour = config.reconciliation_hour_utc;
        let tolerance = config.reconciliation_tolerance_clicks;
        tokio::spawn(async move {
            loop {
                sleep_until_daily(hour).await;
                metrics.jobs_run_total.with_label_values(&["reconciliation"]).inc();
                match billing::run_reconciler(&pool, &counters, tolerance).await {
                    Ok(mismatches) => {
                        metrics.billing_mismatches_total.inc_by(u64::from(mismatches));
                    }
                    Err(err) => {
                        metrics
                            .job_failures_total
                            .with_label_values(&["reconciliation"])
                            .inc();
                        tracing::error!("reconciliation failed: {err:#}");
                    }
                }
            }
        });
    }

    // Prometheus metrics server.
    let app = Router::new().route("/health", get(|| async { "ok" })).route(
        "/metrics",
        get(move || {
            let registry = Arc::clone(&registry);
            async move {
                use prometheus::Encoder;
                let encoder = prometheus::TextEncoder::new();
                let mut buf = Vec::new();
                encoder.encode(&registry.gather(), &mut buf).unwrap();
                String::from_utf8(buf).unwrap()
            }
        }),
    );
    let addr = format!("0.0.0.0:{}", config.metrics_port);
    tracing::info!("metrics server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_run_is_later_today_when_the_hour_is_ahead() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 1, 30, 0).unwrap();
        let next = next_daily_run(now, 3);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn next_run_rolls_to_tomorrow_once_the_hour_has_passed() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 4, 0, 1).unwrap();
        let next = next_daily_run(now, 4);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap());
    }

    #[test]
    fn next_run_at_the_exact_hour_schedules_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 5, 0, 0).unwrap();
        let next = next_daily_run(now, 5);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap());
    }
}
