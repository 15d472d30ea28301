//! Analytics read API.
//!
//! Every endpoint reads pre-aggregated rollups only — never the raw click
//! log, never the counters. Range validation runs before any rollup query.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;

use common_rs::enums::Plan;

use crate::auth::AuthedWorkspace;
use crate::error::ApiError;
use crate::models::{CountryStat, DailyClicks, DeviceStat, LinkStat, Overview, ReferrerStat};
use crate::state::AppState;

const FREE_LOOKBACK_DAYS: i64 = 30;
const PRO_LOOKBACK_DAYS: i64 = 730; // 24 months

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

/// Resolve a range token against the plan's lookback ceiling.
pub fn lookback_days(range: &str, plan: Plan) -> Result<i64, ApiError> {
    let ceiling = match plan {
        Plan::Free => FREE_LOOKBACK_DAYS,
        Plan::Pro => PRO_LOOKBACK_DAYS,
    };
    let days = match range {
        "7d" => Some(7),
        "30d" => Some(30),
        "90d" => Some(90),
        "all" => None,
        other => {
            return Err(ApiError::Validation(format!(
                "Unknown range '{other}'; expected one of 7d, 30d, 90d, all"
            )))
        }
    };
    match (days, plan) {
        (Some(d), _) if d <= ceiling => Ok(d),
        (None, Plan::Pro) => Ok(ceiling),
        _ => Err(ApiError::Validation(format!(
            "Range '{range}' exceeds the {ceiling}-day window available on the {} plan",
            plan.as_str()
        ))),
    }
}

fn range_start(query: &RangeQuery, plan: Plan) -> Result<NaiveDate, ApiError> {
    let range = query.range.as_deref().unwrap_or("7d");
    let days = lookback_days(range, plan)?;
    Ok(Utc::now().date_naive() - Duration::days(days - 1))
}

// ── GET /api/v1/analytics/overview ────────────────────────────────────────────

pub async fn overview(
    State(state): State<Arc<AppState>>,
    auth: AuthedWorkspace,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = range_start(&query, auth.plan)?;

    let total_clicks: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(total_clicks), 0)::BIGINT FROM rollup_workspace_daily \
         WHERE workspace_id = $1 AND date >= $2",
    )
    .bind(&auth.workspace_id)
    .bind(start)
    .fetch_one(&state.db)
    .await?;

    let trend_start = Utc::now().date_naive() - Duration::days(29);
    let daily_trend: Vec<DailyClicks> = sqlx::query_as(
        "SELECT date, total_clicks FROM rollup_workspace_daily \
         WHERE workspace_id = $1 AND date >= $2 ORDER BY date ASC",
    )
    .bind(&auth.workspace_id)
    .bind(trend_start)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(serde_json::json!({
        "data": Overview { total_clicks, daily_trend }
    })))
}

// ── GET /api/v1/analytics/links ───────────────────────────────────────────────

pub async fn links(
    State(state): State<Arc<AppState>>,
    auth: AuthedWorkspace,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = range_start(&query, auth.plan)?;

    let rows: Vec<LinkStat> = sqlx::query_as(
        "SELECT l.id, l.slug, l.destination_url, SUM(r.total_clicks)::BIGINT AS total_clicks \
         FROM rollup_link_daily r \
         JOIN links l ON l.id = r.link_id \
         WHERE l.workspace_id = $1 AND r.date >= $2 \
         GROUP BY l.id, l.slug, l.destination_url \
         ORDER BY total_clicks DESC \
         LIMIT 100",
    )
    .bind(&auth.workspace_id)
    .bind(start)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(serde_json::json!({ "data": rows })))
}

// ── GET /api/v1/analytics/referrers ───────────────────────────────────────────

pub async fn referrers(
    State(state): State<Arc<AppState>>,
    auth: AuthedWorkspace,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = range_start(&query, auth.plan)?;

    let rows: Vec<ReferrerStat> = sqlx::query_as(
        "SELECT referrer, SUM(total_clicks)::BIGINT AS total_clicks \
         FROM rollup_referrer_daily \
         WHERE workspace_id = $1 AND date >= $2 \
         GROUP BY referrer \
         ORDER BY total_clicks DESC \
         LIMIT 50",
    )
    .bind(&auth.workspace_id)
    .bind(start)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(serde_json::json!({ "data": rows })))
}

// ── GET /api/v1/analytics/countries ───────────────────────────────────────────

pub async fn countries(
    State(state): State<Arc<AppState>>,
    auth: AuthedWorkspace,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = range_start(&query, auth.plan)?;

    let rows: Vec<CountryStat> = sqlx::query_as(
        "SELECT country, SUM(total_clicks)::BIGINT AS total_clicks \
         FROM rollup_country_daily \
         WHERE workspace_id = $1 AND date >= $2 \
         GROUP BY country \
         ORDER BY total_clicks DESC \
         LIMIT 50",
    )
    .bind(&auth.workspace_id)
    .bind(start)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(serde_json::json!({ "data": rows })))
}

// ── GET /api/v1/analytics/devices ─────────────────────────────────────────────

pub async fn devices(
    State(state): State<Arc<AppState>>,
    auth: AuthedWorkspace,
    Query(query): Query<RangeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let start = range_start(&query, auth.plan)?;

    let rows: Vec<DeviceStat> = sqlx::query_as(
        "SELECT device_class AS device_type, SUM(total_clicks)::BIGINT AS total_clicks \
         FROM rollup_device_daily \
         WHERE workspace_id = $1 AND date >= $2 \
         GROUP BY device_class \
         ORDER BY total_clicks DESC",
    )
    .bind(&auth.workspace_id)
    .bind(start)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(serde_json::json!({ "data": rows })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_is_capped_at_30_days() {
        assert_eq!(lookback_days("7d", Plan::Free).unwrap(), 7);
        assert_eq!(lookback_days("30d", Plan::Free).unwrap(), 30);
        assert!(lookback_days("90d", Plan::Free).is_err());
        assert!(lookback_days("all", Plan::Free).is_err());
    }

    #[test]
    fn pro_plan_allows_the_full_window() {
        assert_eq!(lookback_days("90d", Plan::Pro).unwrap(), 90);
        assert_eq!(lookback_days("all", Plan::Pro).unwrap(), PRO_LOOKBACK_DAYS);
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        let err = lookback_days("14d", Plan::Pro).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn over_ceiling_is_a_validation_error() {
        let err = lookback_days("90d", Plan::Free).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("30-day"));
    }
}
