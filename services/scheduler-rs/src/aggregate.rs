//! Watermark-driven rollup aggregation.
//!
//! One invocation drains everything past the high-water mark in ascending-ts
//! batches. Each batch is grouped in memory into the five rollup dimensions
//! and applied in a single transaction together with the watermark advance,
//! so a crash replays the same rows and the additive upserts commit
//! together-or-not-at-all.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};

use common_rs::enums::DeviceClass;
use common_rs::referrer::normalize_referrer;

/// Session-scoped lease: only one aggregator drains at a time.
const AGGREGATOR_LEASE_KEY: i64 = 72031460;

pub const UNKNOWN_COUNTRY: &str = "unknown";

#[derive(Debug, Clone, FromRow)]
pub struct RawClick {
    pub click_id: String,
    pub ts: DateTime<Utc>,
    pub workspace_id: String,
    pub link_id: String,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub device_class: String,
}

/// In-memory rollup deltas for one batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RollupBatch {
    pub workspace_daily: HashMap<(String, NaiveDate), i64>,
    pub link_daily: HashMap<(String, NaiveDate), i64>,
    pub referrer_daily: HashMap<(String, NaiveDate, String), i64>,
    pub country_daily: HashMap<(String, NaiveDate, String), i64>,
    pub device_daily: HashMap<(String, NaiveDate, String), i64>,
}

/// Group a batch of raw clicks into the five rollup dimensions. The date key
/// is the click's UTC date; referrers are normalized here, countries default
/// to "unknown", device classes collapse to the known set.
pub fn group_batch(clicks: &[RawClick]) -> RollupBatch {
    let mut batch = RollupBatch::default();
    for click in clicks {
        let date = click.ts.date_naive();
        let workspace = click.workspace_id.clone();

        *batch
            .workspace_daily
            .entry((workspace.clone(), date))
            .or_insert(0) += 1;
        *batch
            .link_daily
            .entry((click.link_id.clone(), date))
            .or_insert(0) += 1;

        let referrer = normalize_referrer(click.referrer.as_deref());
        *batch
            .referrer_daily
            .entry((workspace.clone(), date, referrer))
            .or_insert(0) += 1;

        let country = click
            .country
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());
        *batch
            .country_daily
            .entry((workspace.clone(), date, country))
            .or_insert(0) += 1;

        let device = DeviceClass::from_str(&click.device_class).as_str().to_string();
        *batch
            .device_daily
            .entry((workspace, date, device))
            .or_insert(0) += 1;
    }
    batch
}

/// One scheduled invocation. Returns the number of raw clicks rolled up.
pub async fn run(pool: &PgPool, batch_size: i64) -> Result<u64> {
    // The lease is session-scoped, so it must be taken and released on the
    // same pooled connection. A competing instance skips the tick.
    let mut lease = pool.acquire().await?;
    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(AGGREGATOR_LEASE_KEY)
        .fetch_one(&mut *lease)
        .await?;
    if !acquired {
        tracing::info!("aggregation lease busy, skipping tick");
        return Ok(0);
    }

    let result = drain(pool, batch_size).await;

    let unlocked: Result<bool, sqlx::Error> = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
        .bind(AGGREGATOR_LEASE_KEY)
        .fetch_one(&mut *lease)
        .await;
    if let Err(err) = unlocked {
        tracing::warn!("aggregation lease release failed: {err}");
    }

    result
}

async fn drain(pool: &PgPool, batch_size: i64) -> Result<u64> {
    let mut processed = 0u64;
    loop {
        let watermark: DateTime<Utc> =
            sqlx::query_scalar("SELECT last_processed_ts FROM aggregation_watermark WHERE id = 1")
                .fetch_one(pool)
                .await?;

        let clicks: Vec<RawClick> = sqlx::query_as(
            "SELECT click_id, ts, workspace_id, link_id, referrer, country, device_class \
             FROM raw_clicks WHERE ts > $1 ORDER BY ts ASC LIMIT $2",
        )
        .bind(watermark)
        .bind(batch_size)
        .fetch_all(pool)
        .await?;

        let Some(last) = clicks.last() else { break };
        let max_ts = last.ts; // ascending order, so the last row carries the max

        let batch = group_batch(&clicks);
        apply(pool, &batch, max_ts).await?;

        processed += clicks.len() as u64;
        tracing::debug!(rows = clicks.len(), %max_ts, "rollup batch applied");
        if (clicks.len() as i64) < batch_size {
            break;
        }
    }
    Ok(processed)
}

/// Apply one grouped batch and advance the watermark, atomically.
async fn apply(pool: &PgPool, batch: &RollupBatch, max_ts: DateTime<Utc>) -> Result<()> {
    let mut tx = pool.begin().await?;

    for ((workspace_id, date), count) in &batch.workspace_daily {
        sqlx::query(
            "INSERT INTO rollup_workspace_daily (workspace_id, date, total_clicks) \
             VALUES ($1, $2, $3) ON CONFLICT (workspace_id, date) \
             DO UPDATE SET total_clicks = rollup_workspace_daily.total_clicks + EXCLUDED.total_clicks",
        )
        .bind(workspace_id)
        .bind(date)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    }

    for ((link_id, date), count) in &batch.link_daily {
        sqlx::query(
            "INSERT INTO rollup_link_daily (link_id, date, total_clicks) \
             VALUES ($1, $2, $3) ON CONFLICT (link_id, date) \
             DO UPDATE SET total_clicks = rollup_link_daily.total_clicks + EXCLUDED.total_clicks",
        )
        .bind(link_id)
        .bind(date)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    }

    for ((workspace_id, date, referrer), count) in &batch.referrer_daily {
        sqlx::query(
            "INSERT INTO rollup_referrer_daily (workspace_id, date, referrer, total_clicks) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (workspace_id, date, referrer) \
             DO UPDATE SET total_clicks = rollup_referrer_daily.total_clicks + EXCLUDED.total_clicks",
        )
        .bind(workspace_id)
        .bind(date)
        .bind(referrer)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    }

    for ((workspace_id, date, country), count) in &batch.country_daily {
        sqlx::query(
            "INSERT INTO rollup_country_daily (workspace_id, date, country, total_clicks) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (workspace_id, date, country) \
             DO UPDATE SET total_clicks = rollup_country_daily.total_clicks + EXCLUDED.total_clicks",
        )
        .bind(workspace_id)
        .bind(date)
        .bind(country)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    }

    for ((workspace_id, date, device), count) in &batch.device_daily {
        sqlx::query(
            "INSERT INTO rollup_device_daily (workspace_id, date, device_class, total_clicks) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (workspace_id, date, device_class) \
             DO UPDATE SET total_clicks = rollup_device_daily.total_clicks + EXCLUDED.total_clicks",
        )
        .bind(workspace_id)
        .bind(date)
        .bind(device)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE aggregation_watermark SET last_processed_ts = $1 WHERE id = 1")
        .bind(max_ts)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(
        id: &str,
        ts: &str,
        workspace_id: &str,
        link_id: &str,
        referrer: Option<&str>,
        country: Option<&str>,
        device: &str,
    ) -> RawClick {
        RawClick {
            click_id: id.into(),
            ts: ts.parse().unwrap(),
            workspace_id: workspace_id.into(),
            link_id: link_id.into(),
            referrer: referrer.map(Into::into),
            country: country.map(Into::into),
            device_class: device.into(),
        }
    }

    fn corpus() -> Vec<RawClick> {
        let mut clicks = Vec::new();
        // Six W1 clicks on 2026-03-01: 3 from a.test, 2 from b.test, 1 direct.
        for i in 0..3 {
            clicks.push(click(
                &format!("c{i}"),
                "2026-03-01T10:00:00Z",
                "W1",
                "L1",
                Some("https://a.test/page"),
                Some("US"),
                "desktop",
            ));
        }
        for i in 3..5 {
            clicks.push(click(
                &format!("c{i}"),
                "2026-03-01T11:00:00Z",
                "W1",
                "L1",
                Some("https://b.test/"),
                Some("DE"),
                "mobile",
            ));
        }
        clicks.push(click(
            "c5",
            "2026-03-01T12:00:00Z",
            "W1",
            "L2",
            None,
            None,
            "desktop",
        ));
        // Four W2 clicks on 2026-03-02.
        for i in 6..10 {
            clicks.push(click(
                &format!("c{i}"),
                "2026-03-02T09:00:00Z",
                "W2",
                "L3",
                None,
                Some("US"),
                "tablet",
            ));
        }
        clicks
    }

    #[test]
    fn groups_by_workspace_and_day() {
        let batch = group_batch(&corpus());
        let d1: NaiveDate = "2026-03-01".parse().unwrap();
        let d2: NaiveDate = "2026-03-02".parse().unwrap();
        assert_eq!(batch.workspace_daily[&("W1".into(), d1)], 6);
        assert_eq!(batch.workspace_daily[&("W2".into(), d2)], 4);
        assert_eq!(batch.link_daily[&("L1".into(), d1)], 5);
        assert_eq!(batch.link_daily[&("L2".into(), d1)], 1);
    }

    #[test]
    fn normalizes_referrers_and_defaults_countries() {
        let batch = group_batch(&corpus());
        let d1: NaiveDate = "2026-03-01".parse().unwrap();
        let d2: NaiveDate = "2026-03-02".parse().unwrap();
        assert_eq!(batch.referrer_daily[&("W1".into(), d1, "a.test".into())], 3);
        assert_eq!(batch.referrer_daily[&("W1".into(), d1, "b.test".into())], 2);
        assert_eq!(batch.referrer_daily[&("W1".into(), d1, "(direct)".into())], 1);
        assert_eq!(batch.country_daily[&("W1".into(), d1, "unknown".into())], 1);
        assert_eq!(batch.country_daily[&("W2".into(), d2, "US".into())], 4);
    }

    #[test]
    fn split_batches_sum_to_the_whole() {
        // Grouping in two halves and merging additively must match one pass,
        // which is what makes replayed upserts safe.
        let clicks = corpus();
        let whole = group_batch(&clicks);
        let first = group_batch(&clicks[..4]);
        let second = group_batch(&clicks[4..]);

        let mut merged = first;
        for (k, v) in second.workspace_daily {
            *merged.workspace_daily.entry(k).or_insert(0) += v;
        }
        for (k, v) in second.link_daily {
            *merged.link_daily.entry(k).or_insert(0) += v;
        }
        for (k, v) in second.referrer_daily {
            *merged.referrer_daily.entry(k).or_insert(0) += v;
        }
        for (k, v) in second.country_daily {
            *merged.country_daily.entry(k).or_insert(0) += v;
        }
        for (k, v) in second.device_daily {
            *merged.device_daily.entry(k).or_insert(0) += v;
        }
        assert_eq!(merged, whole);
    }

    #[test]
    fn unexpected_device_strings_collapse_to_unknown() {
        let batch = group_batch(&[click(
            "c0",
            "2026-03-01T00:00:00Z",
            "W1",
            "L1",
            None,
            None,
            "smart-fridge",
        )]);
        let d1: NaiveDate = "2026-03-01".parse().unwrap();
        assert_eq!(batch.device_daily[&("W1".into(), d1, "unknown".into())], 1);
    }
}
