//! Raw click log retention.
//!
//! Deletes rows past the horizon in bounded batches so the table lock stays
//! short. Rollups are never touched: aggregates outlive the PII they came
//! from.

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;

pub async fn run(pool: &PgPool, retention_days: i64, batch_size: i64) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let mut total = 0u64;
    loop {
        let deleted = sqlx::query(
            "DELETE FROM raw_clicks WHERE click_id IN \
             (SELECT click_id FROM raw_clicks WHERE ts < $1 LIMIT $2)",
        )
        .bind(cutoff)
        .bind(batch_size)
        .execute(pool)
        .await?
        .rows_affected();

        total += deleted;
        if deleted < batch_size as u64 {
            break;
        }
    }
    if total > 0 {
        tracing::info!(rows = total, %cutoff, "raw click retention purge complete");
    }
    Ok(total)
}
