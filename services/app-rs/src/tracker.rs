//! Post-response click tracking.
//!
//! The redirect handler hands each accepted request's metadata to a bounded
//! worker pool and returns. Nothing on this path can reach the response:
//! a full queue drops the job, a failing counter leaves the click untracked,
//! a failing enqueue is logged and swallowed, and every job runs under a
//! deadline so a hung downstream cannot pin a worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};

use common_rs::counter::WorkspaceCounters;
use common_rs::enums::Plan;
use common_rs::event::ClickEvent;
use common_rs::{enrich, ua};

use crate::cache::PlanCache;
use crate::kafka::ClickPublisher;
use crate::metrics::AppMetrics;
use crate::models::Resolution;

/// One click's request metadata, captured before the response is committed.
#[derive(Debug)]
pub struct TrackJob {
    pub resolution: Resolution,
    pub ts: DateTime<Utc>,
    pub request_id: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub client_ip: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

struct TrackerInner {
    db: PgPool,
    plan_cache: Arc<PlanCache>,
    counters: WorkspaceCounters,
    publisher: ClickPublisher,
    free_monthly_cap: i64,
    deadline: Duration,
    metrics: &'static AppMetrics,
}

#[derive(Clone)]
pub struct Tracker {
    tx: mpsc::Sender<TrackJob>,
}

impl Tracker {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        db: PgPool,
        plan_cache: Arc<PlanCache>,
        counters: WorkspaceCounters,
        publisher: ClickPublisher,
        free_monthly_cap: i64,
        deadline: Duration,
        queue_capacity: usize,
        workers: usize,
        metrics: &'static AppMetrics,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<TrackJob>(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let inner = Arc::new(TrackerInner {
            db,
            plan_cache,
            counters,
            publisher,
            free_monthly_cap,
            deadline,
            metrics,
        });

        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    match tokio::time::timeout(inner.deadline, track_click(&inner, job)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::warn!(worker_id, "click tracking failed: {err:#}");
                        }
                        Err(_) => {
                            tracing::warn!(worker_id, "click tracking abandoned at deadline");
                        }
                    }
                }
            });
        }

        Self { tx }
    }

    /// Non-blocking hand-off. A full queue drops the job — the redirect is
    /// already on the wire, and tracking fidelity yields to it.
    pub fn submit(&self, job: TrackJob) -> bool {
        self.tx.try_send(job).is_ok()
    }
}

async fn track_click(inner: &TrackerInner, job: TrackJob) -> anyhow::Result<()> {
    let user_agent = job.user_agent.clone().unwrap_or_default();
    if ua::is_bot(&user_agent) {
        inner.metrics.track_bot_skipped_total.inc();
        return Ok(());
    }

    let workspace_id = &job.resolution.workspace_id;
    let Some(plan) = inner.plan_cache.get(&inner.db, workspace_id).await? else {
        // Workspace vanished between resolution and tracking.
        return Ok(());
    };

    match plan {
        Plan::Free => {
            let incremented = match inner
                .counters
                .increment_free_if_under_cap(workspace_id, inner.free_monthly_cap)
                .await
            {
                Ok((incremented, _)) => incremented,
                Err(err) => {
                    inner.metrics.counter_failures_total.inc();
                    tracing::warn!(%workspace_id, "free counter unavailable, click untracked: {err:#}");
                    return Ok(());
                }
            };
            if !incremented {
                // Cap reached: the redirect succeeded, tracking stops here.
                inner.metrics.track_capped_total.inc();
                return Ok(());
            }
        }
        Plan::Pro => {
            if let Err(err) = inner.counters.increment_pro(workspace_id).await {
                inner.metrics.counter_failures_total.inc();
                tracing::warn!(%workspace_id, "pro counter unavailable, click untracked: {err:#}");
                return Ok(());
            }
        }
    }

    let unique_part = enrich::unique_part(job.request_id.as_deref(), &user_agent);
    let event = ClickEvent {
        click_id: enrich::click_id(&job.resolution.link_id, job.ts.timestamp_millis(), &unique_part),
        ts: job.ts,
        workspace_id: job.resolution.workspace_id,
        link_id: job.resolution.link_id,
        domain: job.resolution.domain,
        slug: job.resolution.slug,
        destination_url: job.resolution.destination_url,
        referrer: job.referrer,
        user_agent: job.user_agent,
        ip_hash: job.client_ip.as_deref().map(enrich::ip_hash),
        country: job.country,
        region: job.region,
        city: job.city,
    };

    inner.publisher.publish(&event).await;
    Ok(())
}
