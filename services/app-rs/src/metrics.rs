use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

#[allow(dead_code)]
pub struct AppMetrics {
    pub redirects_resolved_total: IntCounter,
    pub redirects_unresolved_total: IntCounter,
    pub track_submitted_total: IntCounter,
    pub track_dropped_total: IntCounter,
    pub track_bot_skipped_total: IntCounter,
    pub track_capped_total: IntCounter,
    pub counter_failures_total: IntCounter,
    pub kafka_publish_total: IntCounter,
    pub kafka_publish_failed_total: IntCounter,
    pub http_requests_total: IntCounterVec,
}

static METRICS: OnceLock<AppMetrics> = OnceLock::new();

pub fn init(registry: &Registry) -> &'static AppMetrics {
    METRICS.get_or_init(|| {
        let resolved = IntCounter::with_opts(Opts::new(
            "edge_redirects_resolved_total",
            "Redirects that resolved to a destination",
        ))
        .unwrap();
        let unresolved = IntCounter::with_opts(Opts::new(
            "edge_redirects_unresolved_total",
            "Redirect requests answered 404",
        ))
        .unwrap();
        let submitted = IntCounter::with_opts(Opts::new(
            "edge_track_submitted_total",
            "Tracking jobs handed to the worker pool",
        ))
        .unwrap();
        let dropped = IntCounter::with_opts(Opts::new(
            "edge_track_dropped_total",
            "Tracking jobs dropped because the queue was full",
        ))
        .unwrap();
        let bot_skipped = IntCounter::with_opts(Opts::new(
            "edge_track_bot_skipped_total",
            "Tracking jobs skipped by the crawler heuristic",
        ))
        .unwrap();
        let capped = IntCounter::with_opts(Opts::new(
            "edge_track_capped_total",
            "Free-plan clicks refused by the monthly cap",
        ))
        .unwrap();
        let counter_failures = IntCounter::with_opts(Opts::new(
            "edge_counter_failures_total",
            "Counter reads/writes that failed (click left untracked)",
        ))
        .unwrap();
        let kafka_pub = IntCounter::with_opts(Opts::new(
            "edge_kafka_publish_total",
            "Click events published to the queue",
        ))
        .unwrap();
        let kafka_failed = IntCounter::with_opts(Opts::new(
            "edge_kafka_publish_failed_total",
            "Click events that failed to publish",
        ))
        .unwrap();
        let http_reqs = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by handler and status"),
            &["handler", "status_code"],
        )
        .unwrap();

        registry.register(Box::new(resolved.clone())).ok();
        registry.register(Box::new(unresolved.clone())).ok();
        registry.register(Box::new(submitted.clone())).ok();
        registry.register(Box::new(dropped.clone())).ok();
        registry.register(Box::new(bot_skipped.clone())).ok();
        registry.register(Box::new(capped.clone())).ok();
        registry.register(Box::new(counter_failures.clone())).ok();
        registry.register(Box::new(kafka_pub.clone())).ok();
        registry.register(Box::new(kafka_failed.clone())).ok();
        registry.register(Box::new(http_reqs.clone())).ok();

        AppMetrics {
            redirects_resolved_total: resolved,
            redirects_unresolved_total: unresolved,
            track_submitted_total: submitted,
            track_dropped_total: dropped,
            track_bot_skipped_total: bot_skipped,
            track_capped_total: capped,
            counter_failures_total: counter_failures,
            kafka_publish_total: kafka_pub,
            kafka_publish_failed_total: kafka_failed,
            http_requests_total: http_reqs,
        }
    })
}

pub fn gather(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&registry.gather(), &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}
