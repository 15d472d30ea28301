//! Queue producer for accepted click events.

use anyhow::Result;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

use common_rs::event::ClickEvent;

use crate::metrics::AppMetrics;

/// How long one send may wait for the broker. Kept well under the tracking
/// job deadline so a slow broker costs one event, not the whole worker slot.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Publishes accepted clicks to the click topic.
///
/// Events are keyed by workspace so one workspace's clicks stay in producer
/// order. Delivery failures are counted, logged, and swallowed here — the
/// click-log writer is built to tolerate gaps, and nothing on the tracking
/// path may propagate an enqueue error.
pub struct ClickPublisher {
    producer: FutureProducer,
    topic: String,
    metrics: &'static AppMetrics,
}

impl ClickPublisher {
    pub fn new(
        bootstrap_servers: &str,
        topic: String,
        metrics: &'static AppMetrics,
    ) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "2000")
            .set("queue.buffering.max.messages", "100000")
            .set("queue.buffering.max.ms", "5")
            .create()?;
        Ok(Self {
            producer,
            topic,
            metrics,
        })
    }

    pub async fn publish(&self, event: &ClickEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                self.metrics.kafka_publish_failed_total.inc();
                tracing::warn!(click_id = %event.click_id, "click event serialization failed: {err}");
                return;
            }
        };
        let record = FutureRecord::to(&self.topic)
            .payload(&payload)
            .key(&event.workspace_id);
        match self.producer.send(record, SEND_TIMEOUT).await {
            Ok(_) => self.metrics.kafka_publish_total.inc(),
            Err((err, _)) => {
                self.metrics.kafka_publish_failed_total.inc();
                tracing::warn!(click_id = %event.click_id, "click event enqueue failed: {err}");
            }
        }
    }
}
