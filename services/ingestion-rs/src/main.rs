/// Click log writer.
///
/// Consumes click events from Kafka and appends them to the raw click log in
/// batches, idempotent on click-id. Offsets are stored only after a batch has
/// been persisted, so a crash or a failed flush redelivers the batch and the
/// `ON CONFLICT DO NOTHING` insert absorbs the duplicates. Unparseable
/// messages are poison: logged, counted, and dropped without blocking the
/// batch.
use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{routing::get, Router};
use prometheus::{IntCounter, Registry};
use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    ClientConfig, Message,
};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use common_rs::event::ClickEvent;
use common_rs::ua;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Config {
    database_url: String,
    kafka_bootstrap_servers: String,
    kafka_click_topic: String,
    consumer_group: String,
    consumer_name: String,
    batch_size: usize,
    block_ms: u64,
    flush_interval_seconds: u64,
    metrics_port: u16,
}

fn evar(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("Missing env var: {key}"))
}

fn evar_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn evar_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            database_url: evar("DATABASE_URL")?,
            kafka_bootstrap_servers: evar_or("KAFKA_BOOTSTRAP_SERVERS", "kafka:9092"),
            kafka_click_topic: evar_or("KAFKA_CLICK_TOPIC", "click_events"),
            consumer_group: evar_or("INGESTION_CONSUMER_GROUP", "click_log_writers"),
            consumer_name: evar_or("INGESTION_CONSUMER_NAME", "ingestion-consumer-1"),
            batch_size: evar_parse("INGESTION_BATCH_SIZE", 500),
            block_ms: evar_parse("INGESTION_BLOCK_MS", 1000),
            flush_interval_seconds: evar_parse("INGESTION_FLUSH_INTERVAL_SECONDS", 5),
            metrics_port: evar_parse("INGESTION_METRICS_PORT", 9200),
        })
    }
}

// ── Models ────────────────────────────────────────────────────────────────────

/// One raw-click row ready for insertion. Device class and the bot flag are
/// not carried on the wire; they are re-derived here from the user-agent
/// with the same classifier the edge applies.
#[derive(Debug)]
struct RawClickRow {
    event: ClickEvent,
    device_class: &'static str,
    bot_suspected: bool,
}

fn to_row(event: ClickEvent) -> RawClickRow {
    let user_agent = event.user_agent.as_deref().unwrap_or_default();
    RawClickRow {
        device_class: ua::device_class(user_agent).as_str(),
        bot_suspected: ua::is_bot(user_agent),
        event,
    }
}

/// Highest buffered offset per partition, the positions to store after a
/// successful flush.
fn max_offsets(positions: &[(i32, i64)]) -> HashMap<i32, i64> {
    let mut out: HashMap<i32, i64> = HashMap::new();
    for &(partition, offset) in positions {
        out.entry(partition)
            .and_modify(|o| *o = (*o).max(offset))
            .or_insert(offset);
    }
    out
}

// ── Metrics ───────────────────────────────────────────────────────────────────

struct WriterMetrics {
    consumed_total: IntCounter,
    poison_total: IntCounter,
    inserted_total: IntCounter,
    deduplicated_total: IntCounter,
    flush_failures_total: IntCounter,
}

fn init_metrics(registry: &Registry) -> WriterMetrics {
    let consumed = IntCounter::new("clicklog_events_consumed_total", "Kafka events consumed").unwrap();
    let poison = IntCounter::new("clicklog_poison_total", "Unparseable messages dropped").unwrap();
    let inserted = IntCounter::new("clicklog_rows_inserted_total", "Raw click rows inserted").unwrap();
    let dedup = IntCounter::new(
        "clicklog_rows_deduplicated_total",
        "Rows skipped by click-id conflict",
    )
    .unwrap();
    let failures = IntCounter::new("clicklog_flush_failures_total", "Failed batch inserts").unwrap();
    registry.register(Box::new(consumed.clone())).ok();
    registry.register(Box::new(poison.clone())).ok();
    registry.register(Box::new(inserted.clone())).ok();
    registry.register(Box::new(dedup.clone())).ok();
    registry.register(Box::new(failures.clone())).ok();
    WriterMetrics {
        consumed_total: consumed,
        poison_total: poison,
        inserted_total: inserted,
        deduplicated_total: dedup,
        flush_failures_total: failures,
    }
}

// ── Flush ─────────────────────────────────────────────────────────────────────

const FLUSH_ATTEMPTS: u32 = 3;

async fn insert_batch(pool: &PgPool, rows: &[RawClickRow]) -> anyhow::Result<u64> {
    let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "INSERT INTO raw_clicks (click_id, ts, workspace_id, link_id, domain, slug, \
         destination_url, referrer, user_agent, ip_hash, country, region, city, \
         device_class, bot_suspected) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(&row.event.click_id)
            .push_bind(row.event.ts)
            .push_bind(&row.event.workspace_id)
            .push_bind(&row.event.link_id)
            .push_bind(&row.event.domain)
            .push_bind(&row.event.slug)
            .push_bind(&row.event.destination_url)
            .push_bind(&row.event.referrer)
            .push_bind(&row.event.user_agent)
            .push_bind(&row.event.ip_hash)
            .push_bind(&row.event.country)
            .push_bind(&row.event.region)
            .push_bind(&row.event.city)
            .push_bind(row.device_class)
            .push_bind(row.bot_suspected);
    });
    qb.push(" ON CONFLICT (click_id) DO NOTHING");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Persist the buffered rows, then store the consumer positions so Kafka's
/// background commit acknowledges them. Exhausting the retries returns an
/// error: the process exits and redelivery resumes from the last stored
/// offsets.
async fn flush(
    pool: &PgPool,
    consumer: &StreamConsumer,
    topic: &str,
    rows: &mut Vec<RawClickRow>,
    positions: &mut Vec<(i32, i64)>,
    metrics: &WriterMetrics,
) -> anyhow::Result<()> {
    if !rows.is_empty() {
        let mut attempt = 0;
        let inserted = loop {
            attempt += 1;
            match insert_batch(pool, rows).await {
                Ok(inserted) => break inserted,
                Err(err) if attempt < FLUSH_ATTEMPTS => {
                    metrics.flush_failures_total.inc();
                    tracing::warn!(attempt, "raw click batch insert failed, retrying: {err:#}");
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(err) => {
                    metrics.flush_failures_total.inc();
                    return Err(err.context("raw click batch insert failed after retries"));
                }
            }
        };
        metrics.inserted_total.inc_by(inserted);
        metrics
            .deduplicated_total
            .inc_by(rows.len() as u64 - inserted);
    }

    for (partition, offset) in max_offsets(positions) {
        if let Err(err) = consumer.store_offset(topic, partition, offset) {
            tracing::warn!(partition, offset, "store_offset failed: {err}");
        }
    }

    rows.clear();
    positions.clear();
    Ok(())
}

// ── Main loop ─────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    tracing::info!(consumer = %config.consumer_name, "starting click log writer");

    // Prometheus metrics server.
    let registry = Arc::new(Registry::new());
    let metrics = init_metrics(&registry);
    {
        let registry = Arc::clone(&registry);
        let metrics_port = config.metrics_port;
        tokio::spawn(async move {
            let app = Router::new().route("/health", get(|| async { "ok" })).route(
                "/metrics",
                get(move || {
                    let r = Arc::clone(&registry);
                    async move {
                        use prometheus::Encoder;
                        let enc = prometheus::TextEncoder::new();
                        let mut buf = Vec::new();
                        enc.encode(&r.gather(), &mut buf).unwrap();
                        String::from_utf8(buf).unwrap()
                    }
                }),
            );
            let addr = format!("0.0.0.0:{metrics_port}");
            let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
            tracing::info!("metrics server on {addr}");
            axum::serve(listener, app).await.unwrap();
        });
    }

    // Database pool. The edge service owns the schema; this service assumes it.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    tracing::info!("database ready");

    // Kafka consumer with manual offset store: positions advance only after
    // a batch is persisted.
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.consumer_group)
        .set("client.id", &config.consumer_name)
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "30000")
        .create()?;
    consumer.subscribe(&[&config.kafka_click_topic])?;
    tracing::info!("kafka consumer subscribed to {}", config.kafka_click_topic);

    let flush_interval = Duration::from_secs(config.flush_interval_seconds);
    let mut last_flush = std::time::Instant::now();
    let mut rows: Vec<RawClickRow> = Vec::with_capacity(config.batch_size);
    let mut positions: Vec<(i32, i64)> = Vec::new();

    loop {
        // Poll with a short timeout so we can flush on interval.
        match tokio::time::timeout(Duration::from_millis(config.block_ms), consumer.recv()).await {
            Ok(Ok(msg)) => {
                positions.push((msg.partition(), msg.offset()));
                if let Some(payload) = msg.payload() {
                    match serde_json::from_slice::<ClickEvent>(payload) {
                        Ok(event) => {
                            rows.push(to_row(event));
                            metrics.consumed_total.inc();
                        }
                        Err(err) => {
                            metrics.poison_total.inc();
                            tracing::warn!("dropping unparseable click event: {err}");
                        }
                    }
                }

                if rows.len() >= config.batch_size {
                    flush(
                        &pool,
                        &consumer,
                        &config.kafka_click_topic,
                        &mut rows,
                        &mut positions,
                        &metrics,
                    )
                    .await?;
                    last_flush = std::time::Instant::now();
                }
            }
            Ok(Err(err)) => tracing::warn!("kafka recv error: {err}"),
            Err(_) => {} // timeout — normal, proceed to flush check
        }

        if last_flush.elapsed() >= flush_interval && !(rows.is_empty() && positions.is_empty()) {
            flush(
                &pool,
                &consumer,
                &config.kafka_click_topic,
                &mut rows,
                &mut positions,
                &metrics,
            )
            .await?;
            last_flush = std::time::Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(click_id: &str, user_agent: Option<&str>) -> ClickEvent {
        ClickEvent {
            click_id: click_id.into(),
            ts: "2026-03-01T12:00:00Z".parse().unwrap(),
            workspace_id: "ws_1".into(),
            link_id: "lnk_1".into(),
            domain: "example.test".into(),
            slug: "x".into(),
            destination_url: "https://dest.example/path".into(),
            referrer: None,
            user_agent: user_agent.map(Into::into),
            ip_hash: None,
            country: None,
            region: None,
            city: None,
        }
    }

    #[test]
    fn derives_device_and_bot_from_the_carried_user_agent() {
        let row = to_row(event(
            "a",
            Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148"),
        ));
        assert_eq!(row.device_class, "mobile");
        assert!(!row.bot_suspected);

        let row = to_row(event("b", Some("Mozilla/5.0 (compatible; Googlebot/2.1)")));
        assert!(row.bot_suspected);

        let row = to_row(event("c", None));
        assert_eq!(row.device_class, "unknown");
        assert!(!row.bot_suspected);
    }

    #[test]
    fn poison_payloads_do_not_parse() {
        assert!(serde_json::from_slice::<ClickEvent>(b"{\"slug\":\"x\"}").is_err());
        assert!(serde_json::from_slice::<ClickEvent>(b"not json").is_err());
    }

    #[test]
    fn stores_the_highest_offset_per_partition() {
        let positions = vec![(0, 5), (1, 2), (0, 9), (1, 1)];
        let offsets = max_offsets(&positions);
        assert_eq!(offsets[&0], 9);
        assert_eq!(offsets[&1], 2);
    }
}
