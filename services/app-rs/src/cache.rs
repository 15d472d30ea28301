//! In-process plan cache for the tracking path.
//!
//! Stale reads up to the TTL are fine: the cap is enforced by the counter,
//! not by the plan, so a stale `free` reading only delays an upgrade's effect
//! by at most the TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use common_rs::enums::Plan;
use sqlx::PgPool;
use tokio::sync::RwLock;

struct Entry {
    plan: Plan,
    cached_at: Instant,
}

pub struct PlanCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl PlanCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a workspace's plan, hitting the catalog on miss or expiry.
    /// `None` means the workspace does not exist.
    pub async fn get(&self, pool: &PgPool, workspace_id: &str) -> anyhow::Result<Option<Plan>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(workspace_id) {
                if entry.cached_at.elapsed() <= self.ttl {
                    return Ok(Some(entry.plan));
                }
            }
        }

        let row: Option<(String,)> = sqlx::query_as("SELECT plan FROM workspaces WHERE id = $1")
            .bind(workspace_id)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((plan,)) => {
                let plan = Plan::from_str(&plan);
                let mut entries = self.entries.write().await;
                entries.insert(
                    workspace_id.to_string(),
                    Entry {
                        plan,
                        cached_at: Instant::now(),
                    },
                );
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }
}
