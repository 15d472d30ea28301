//! Per-workspace click counters: the authoritative state for cap enforcement
//! and billing.
//!
//! Each workspace carries two independent counters. The Free counter is keyed
//! by UTC month and resets on access whenever the observed month differs from
//! the stored one, so a dormant workspace's first click of a new month counts
//! against the new period without any scheduled reset. The Pro counter is
//! keyed by the billing period pair and only ever resets through
//! `set_pro_period`, driven by the billing webhook collaborator.
//!
//! Serial-per-workspace execution comes from a row-level lock: every mutation
//! is one transaction that takes `SELECT ... FOR UPDATE` on the workspace's
//! counter row, applies a pure transition function, and writes back. The
//! transition functions carry all the reset/cap logic and are tested without
//! a database.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

/// UTC month key, `YYYY-MM`.
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// One workspace's counter state, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CounterState {
    pub free_month_key: String,
    pub free_tracked_clicks: i64,
    pub pro_period_start: Option<DateTime<Utc>>,
    pub pro_period_end: Option<DateTime<Utc>>,
    pub pro_tracked_clicks: i64,
}

impl CounterState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            free_month_key: month_key(now),
            free_tracked_clicks: 0,
            pro_period_start: None,
            pro_period_end: None,
            pro_tracked_clicks: 0,
        }
    }

    /// Month-reset check. Runs before every Free-counter read or mutation.
    pub fn roll_free_month(&mut self, now: DateTime<Utc>) {
        let key = month_key(now);
        if self.free_month_key != key {
            self.free_month_key = key;
            self.free_tracked_clicks = 0;
        }
    }

    /// Returns whether the click was counted. Under the cap it increments;
    /// at the cap it leaves the counter untouched.
    pub fn apply_free_increment(&mut self, now: DateTime<Utc>, cap: i64) -> bool {
        self.roll_free_month(now);
        if self.free_tracked_clicks < cap {
            self.free_tracked_clicks += 1;
            true
        } else {
            false
        }
    }

    pub fn apply_pro_increment(&mut self) {
        self.pro_tracked_clicks += 1;
    }

    /// A changed `(start, end)` pair overwrites the period and zeroes the
    /// tracked count; an identical pair is a no-op.
    pub fn apply_pro_period(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) {
        if self.pro_period_start != start || self.pro_period_end != end {
            self.pro_period_start = start;
            self.pro_period_end = end;
            self.pro_tracked_clicks = 0;
        }
    }
}

/// Current Free usage, after the month-reset check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FreeUsage {
    pub month_key: String,
    pub tracked_clicks: i64,
}

/// Current Pro usage. Reads never reset this counter.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProUsage {
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub tracked_clicks: i64,
}

#[derive(Clone)]
pub struct WorkspaceCounters {
    pool: PgPool,
}

impl WorkspaceCounters {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensure the workspace's row exists, then lock it for this transaction.
    async fn lock_state(
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CounterState> {
        sqlx::query(
            "INSERT INTO workspace_counters (workspace_id, free_month_key) VALUES ($1, $2) \
             ON CONFLICT (workspace_id) DO NOTHING",
        )
        .bind(workspace_id)
        .bind(month_key(now))
        .execute(&mut **tx)
        .await?;

        let state: CounterState = sqlx::query_as(
            "SELECT free_month_key, free_tracked_clicks, pro_period_start, pro_period_end, \
             pro_tracked_clicks FROM workspace_counters WHERE workspace_id = $1 FOR UPDATE",
        )
        .bind(workspace_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(state)
    }

    async fn store_state(
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: &str,
        state: &CounterState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workspace_counters SET free_month_key = $2, free_tracked_clicks = $3, \
             pro_period_start = $4, pro_period_end = $5, pro_tracked_clicks = $6 \
             WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .bind(&state.free_month_key)
        .bind(state.free_tracked_clicks)
        .bind(state.pro_period_start)
        .bind(state.pro_period_end)
        .bind(state.pro_tracked_clicks)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Count a Free-plan click unless the monthly cap is reached.
    pub async fn increment_free_if_under_cap(
        &self,
        workspace_id: &str,
        cap: i64,
    ) -> Result<(bool, FreeUsage)> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut state = Self::lock_state(&mut tx, workspace_id, now).await?;
        let incremented = state.apply_free_increment(now, cap);
        Self::store_state(&mut tx, workspace_id, &state).await?;
        tx.commit().await?;
        Ok((
            incremented,
            FreeUsage {
                month_key: state.free_month_key,
                tracked_clicks: state.free_tracked_clicks,
            },
        ))
    }

    /// Count a Pro-plan click. Plan membership is the caller's concern.
    pub async fn increment_pro(&self, workspace_id: &str) -> Result<ProUsage> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut state = Self::lock_state(&mut tx, workspace_id, now).await?;
        state.apply_pro_increment();
        Self::store_state(&mut tx, workspace_id, &state).await?;
        tx.commit().await?;
        Ok(ProUsage {
            period_start: state.pro_period_start,
            period_end: state.pro_period_end,
            tracked_clicks: state.pro_tracked_clicks,
        })
    }

    /// Install the billing period observed by the webhook collaborator.
    pub async fn set_pro_period(
        &self,
        workspace_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ProUsage> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut state = Self::lock_state(&mut tx, workspace_id, now).await?;
        state.apply_pro_period(start, end);
        Self::store_state(&mut tx, workspace_id, &state).await?;
        tx.commit().await?;
        Ok(ProUsage {
            period_start: state.pro_period_start,
            period_end: state.pro_period_end,
            tracked_clicks: state.pro_tracked_clicks,
        })
    }

    /// Read Free usage. The month-reset check runs and persists here too, so
    /// a read in a fresh month reports zero rather than last month's count.
    pub async fn get_free_usage(&self, workspace_id: &str) -> Result<FreeUsage> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut state = Self::lock_state(&mut tx, workspace_id, now).await?;
        state.roll_free_month(now);
        Self::store_state(&mut tx, workspace_id, &state).await?;
        tx.commit().await?;
        Ok(FreeUsage {
            month_key: state.free_month_key,
            tracked_clicks: state.free_tracked_clicks,
        })
    }

    /// Read Pro usage. No implicit reset — Pro resets are webhook-driven.
    pub async fn get_pro_usage(&self, workspace_id: &str) -> Result<ProUsage> {
        let state: Option<CounterState> = sqlx::query_as(
            "SELECT free_month_key, free_tracked_clicks, pro_period_start, pro_period_end, \
             pro_tracked_clicks FROM workspace_counters WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        let state = state.unwrap_or_else(|| CounterState::fresh(Utc::now()));
        Ok(ProUsage {
            period_start: state.pro_period_start,
            period_end: state.pro_period_end,
            tracked_clicks: state.pro_tracked_clicks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn month_key_is_utc_year_month() {
        assert_eq!(month_key(at(2026, 3, 1)), "2026-03");
        assert_eq!(month_key(at(2026, 12, 31)), "2026-12");
    }

    #[test]
    fn free_increment_stops_at_cap() {
        let now = at(2026, 3, 1);
        let mut state = CounterState::fresh(now);
        for _ in 0..3 {
            assert!(state.apply_free_increment(now, 3));
        }
        // Fourth click in the same month is refused and the count holds.
        assert!(!state.apply_free_increment(now, 3));
        assert_eq!(state.free_tracked_clicks, 3);
    }

    #[test]
    fn only_one_winner_at_the_cap_boundary() {
        let now = at(2026, 3, 1);
        let mut state = CounterState::fresh(now);
        state.free_tracked_clicks = 4;
        // Two serialized attempts against cap 5: exactly one increments.
        let first = state.apply_free_increment(now, 5);
        let second = state.apply_free_increment(now, 5);
        assert!(first);
        assert!(!second);
        assert_eq!(state.free_tracked_clicks, 5);
    }

    #[test]
    fn month_rollover_restarts_the_free_counter() {
        let march = at(2026, 3, 15);
        let april = at(2026, 4, 1);
        let mut state = CounterState::fresh(march);
        for _ in 0..5 {
            state.apply_free_increment(march, 5000);
        }
        assert!(state.apply_free_increment(april, 5000));
        assert_eq!(state.free_month_key, "2026-04");
        assert_eq!(state.free_tracked_clicks, 1);
    }

    #[test]
    fn free_read_reset_does_not_touch_pro() {
        let mut state = CounterState::fresh(at(2026, 3, 1));
        state.pro_tracked_clicks = 42;
        state.roll_free_month(at(2026, 4, 1));
        assert_eq!(state.free_tracked_clicks, 0);
        assert_eq!(state.pro_tracked_clicks, 42);
    }

    #[test]
    fn identical_pro_period_keeps_the_count() {
        let start = Some(at(2026, 3, 1));
        let end = Some(at(2026, 4, 1));
        let mut state = CounterState::fresh(at(2026, 3, 2));
        state.apply_pro_period(start, end);
        for _ in 0..7 {
            state.apply_pro_increment();
        }
        state.apply_pro_period(start, end);
        assert_eq!(state.pro_tracked_clicks, 7);
    }

    #[test]
    fn changed_pro_period_zeroes_the_count() {
        let start = Some(at(2026, 3, 1));
        let mut state = CounterState::fresh(at(2026, 3, 2));
        state.apply_pro_period(start, Some(at(2026, 4, 1)));
        for _ in 0..7 {
            state.apply_pro_increment();
        }
        state.apply_pro_period(start, Some(at(2026, 5, 1)));
        assert_eq!(state.pro_tracked_clicks, 0);
        assert_eq!(state.pro_period_end, Some(at(2026, 5, 1)));
    }
}
