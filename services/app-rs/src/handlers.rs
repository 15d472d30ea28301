//! HTTP handlers for the edge service.
//!
//! The redirect handler is the one response-path contract in the system:
//! resolve synchronously, commit a 302 (or 404), and hand everything else to
//! the tracking pool. Nothing downstream of resolution — counter, plan
//! cache, queue — can delay or fail the response.

use axum::{
    extract::{Host, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::{HealthResponse, ProPeriodRequest};
use crate::resolver;
use crate::state::AppState;
use crate::tracker::TrackJob;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    Json(HealthResponse {
        status: database,
        database,
    })
}

// ── Metrics ───────────────────────────────────────────────────────────────────

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    crate::metrics::gather(&state.registry)
}

// ── GET /:slug (redirect) ─────────────────────────────────────────────────────

pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Response {
    let resolution = match resolver::resolve(&state.db, &host, &slug).await {
        Ok(Some(resolution)) => resolution,
        Ok(None) => return not_found(&state),
        Err(err) => {
            // A 404 is strictly less harmful than a 5xx on a short link.
            tracing::error!(%host, %slug, "resolve failed: {err}");
            return not_found(&state);
        }
    };

    let destination = resolution.destination_url.clone();
    let job = TrackJob {
        resolution,
        ts: Utc::now(),
        request_id: header_str(&headers, "x-request-id")
            .or_else(|| header_str(&headers, "cf-ray")),
        user_agent: header_str(&headers, "user-agent"),
        referrer: header_str(&headers, "referer"),
        client_ip: client_ip(&headers),
        country: header_str(&headers, "x-vercel-ip-country")
            .or_else(|| header_str(&headers, "cf-ipcountry")),
        region: header_str(&headers, "x-vercel-ip-country-region"),
        city: header_str(&headers, "x-vercel-ip-city"),
    };
    if state.tracker.submit(job) {
        state.metrics.track_submitted_total.inc();
    } else {
        state.metrics.track_dropped_total.inc();
    }

    state.metrics.redirects_resolved_total.inc();
    state
        .metrics
        .http_requests_total
        .with_label_values(&["redirect", "302"])
        .inc();

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, destination),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response()
}

fn not_found(state: &AppState) -> Response {
    state.metrics.redirects_unresolved_total.inc();
    state
        .metrics
        .http_requests_total
        .with_label_values(&["redirect", "404"])
        .inc();
    ApiError::NotFound("Short link not found".to_string()).into_response()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First hop of X-Forwarded-For, else X-Real-IP. The raw value stays in this
/// request scope; only its hash ever leaves the process.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    header_str(headers, "x-real-ip")
}

// ── Internal: billing collaborator seam ───────────────────────────────────────

/// `PUT /internal/workspaces/:id/pro-period` — invoked by the billing webhook
/// glue when it observes a subscription period change.
pub async fn set_pro_period(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Json(body): Json<ProPeriodRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let usage = state
        .counters
        .set_pro_period(&workspace_id, body.period_start, body.period_end)
        .await?;
    Ok(Json(serde_json::json!({ "data": usage })))
}

/// `GET /internal/workspaces/:id/usage` — current counter state for the
/// billing/usage UI.
pub async fn workspace_usage(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let free = state.counters.get_free_usage(&workspace_id).await?;
    let pro = state.counters.get_pro_usage(&workspace_id).await?;
    Ok(Json(serde_json::json!({ "data": { "free": free, "pro": pro } })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn client_ip_takes_the_first_forwarded_hop() {
        let map = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1, 10.0.0.2")]);
        assert_eq!(client_ip(&map).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn client_ip_falls_back_to_x_real_ip() {
        let map = headers(&[("x-real-ip", "198.51.100.4")]);
        assert_eq!(client_ip(&map).as_deref(), Some("198.51.100.4"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn empty_headers_read_as_absent() {
        let map = headers(&[("referer", "")]);
        assert_eq!(header_str(&map, "referer"), None);
        assert_eq!(header_str(&map, "user-agent"), None);
    }
}
