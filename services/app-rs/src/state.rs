use prometheus::Registry;
use sqlx::PgPool;
use std::sync::Arc;

use common_rs::counter::WorkspaceCounters;

use crate::{cache::PlanCache, config::Config, metrics::AppMetrics, tracker::Tracker};

/// Shared application state injected into every handler via axum State extractor.
pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub plan_cache: Arc<PlanCache>,
    pub counters: WorkspaceCounters,
    pub tracker: Tracker,
    pub metrics: &'static AppMetrics,
    pub registry: Registry,
}
