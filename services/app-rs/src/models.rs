use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Outcome of a successful `(hostname, slug)` resolution.
#[derive(Debug, Clone, FromRow)]
pub struct Resolution {
    pub workspace_id: String,
    pub link_id: String,
    pub domain_id: String,
    pub domain: String,
    pub slug: String,
    pub destination_url: String,
}

/// Body for the billing collaborator's period-change call.
#[derive(Debug, Deserialize)]
pub struct ProPeriodRequest {
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// One link's aggregated clicks within the requested range.
#[derive(Debug, Serialize, FromRow)]
pub struct LinkStat {
    pub id: String,
    pub slug: String,
    pub destination_url: String,
    pub total_clicks: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ReferrerStat {
    pub referrer: String,
    pub total_clicks: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct CountryStat {
    pub country: String,
    pub total_clicks: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct DeviceStat {
    pub device_type: String,
    pub total_clicks: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct DailyClicks {
    pub date: chrono::NaiveDate,
    pub total_clicks: i64,
}

#[derive(Debug, Serialize)]
pub struct Overview {
    pub total_clicks: i64,
    pub daily_trend: Vec<DailyClicks>,
}
