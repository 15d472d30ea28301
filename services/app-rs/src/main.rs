mod analytics;
mod auth;
mod cache;
mod config;
mod db;
mod error;
mod handlers;
mod kafka;
mod metrics;
mod models;
mod resolver;
mod state;
mod tracker;

use axum::{
    routing::{get, put},
    Router,
};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use common_rs::counter::WorkspaceCounters;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(app = %config.app_name, env = %config.app_env, "starting edge service");

    // Database
    let pool = db::create_pool(&config.database_url).await?;
    db::migrate(&pool).await?;
    tracing::info!("database ready");

    // Prometheus
    let registry = Registry::new();
    let app_metrics = metrics::init(&registry);

    // Kafka producer
    let publisher = kafka::ClickPublisher::new(
        &config.kafka_bootstrap_servers,
        config.kafka_click_topic.clone(),
        app_metrics,
    )?;
    tracing::info!("kafka producer ready");

    // Counter + plan cache + tracking pool
    let counters = WorkspaceCounters::new(pool.clone());
    let plan_cache = Arc::new(cache::PlanCache::new(Duration::from_secs(
        config.plan_cache_ttl_seconds,
    )));
    let tracker = tracker::Tracker::start(
        pool.clone(),
        Arc::clone(&plan_cache),
        counters.clone(),
        publisher,
        config.free_monthly_cap,
        Duration::from_secs(config.detached_task_deadline_seconds),
        config.track_queue_capacity,
        config.track_workers,
        app_metrics,
    );

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(state::AppState {
        config,
        db: pool,
        plan_cache,
        counters,
        tracker,
        metrics: app_metrics,
        registry,
    });

    // Router
    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/v1/analytics/overview", get(analytics::overview))
        .route("/api/v1/analytics/links", get(analytics::links))
        .route("/api/v1/analytics/referrers", get(analytics::referrers))
        .route("/api/v1/analytics/countries", get(analytics::countries))
        .route("/api/v1/analytics/devices", get(analytics::devices))
        .route(
            "/internal/workspaces/:workspace_id/pro-period",
            put(handlers::set_pro_period),
        )
        .route(
            "/internal/workspaces/:workspace_id/usage",
            get(handlers::workspace_usage),
        )
        .route("/:slug", get(handlers::redirect))
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state));

    tracing::info!("listening on {listen_addr}");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
