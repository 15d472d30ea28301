use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    // Advisory lock so only one replica runs DDL when several instances start
    // simultaneously.
    sqlx::query("SELECT pg_advisory_lock(72031455)")
        .execute(pool)
        .await?;

    let statements = [
        // Catalog. Ids are opaque TEXT minted by the link CRUD collaborator.
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            id                   TEXT PRIMARY KEY,
            plan                 TEXT NOT NULL DEFAULT 'free',
            billing_status       TEXT,
            current_period_start TIMESTAMPTZ,
            current_period_end   TIMESTAMPTZ,
            created_at           TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS domains (
            id           TEXT PRIMARY KEY,
            workspace_id TEXT,
            hostname     TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'pending',
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        "CREATE UNIQUE INDEX IF NOT EXISTS domains_hostname_idx ON domains (lower(hostname))",
        r#"
        CREATE TABLE IF NOT EXISTS links (
            id              TEXT PRIMARY KEY,
            workspace_id    TEXT NOT NULL,
            domain_id       TEXT NOT NULL,
            slug            TEXT NOT NULL,
            destination_url TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'active',
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        "CREATE UNIQUE INDEX IF NOT EXISTS links_domain_slug_idx ON links (domain_id, lower(slug))",
        "CREATE INDEX IF NOT EXISTS links_workspace_created_idx ON links (workspace_id, created_at)",
        // Counter state. One row per workspace, locked per-row on mutation.
        r#"
        CREATE TABLE IF NOT EXISTS workspace_counters (
            workspace_id        TEXT PRIMARY KEY,
            free_month_key      TEXT NOT NULL,
            free_tracked_clicks BIGINT NOT NULL DEFAULT 0,
            pro_period_start    TIMESTAMPTZ,
            pro_period_end      TIMESTAMPTZ,
            pro_tracked_clicks  BIGINT NOT NULL DEFAULT 0
        )
        "#,
        // Raw click log. Append-only; aggregation and retention scan by ts.
        r#"
        CREATE TABLE IF NOT EXISTS raw_clicks (
            click_id        TEXT PRIMARY KEY,
            ts              TIMESTAMPTZ NOT NULL,
            workspace_id    TEXT NOT NULL,
            link_id         TEXT NOT NULL,
            domain          TEXT NOT NULL,
            slug            TEXT NOT NULL,
            destination_url TEXT NOT NULL,
            referrer        TEXT,
            user_agent      TEXT,
            ip_hash         TEXT,
            country         TEXT,
            region          TEXT,
            city            TEXT,
            device_class    TEXT NOT NULL DEFAULT 'unknown',
            bot_suspected   BOOLEAN NOT NULL DEFAULT false
        )
        "#,
        "CREATE INDEX IF NOT EXISTS raw_clicks_ts_idx ON raw_clicks (ts)",
        // Aggregation watermark: singleton row, seeded at epoch.
        r#"
        CREATE TABLE IF NOT EXISTS aggregation_watermark (
            id                SMALLINT PRIMARY KEY CHECK (id = 1),
            last_processed_ts TIMESTAMPTZ NOT NULL
        )
        "#,
        "INSERT INTO aggregation_watermark (id, last_processed_ts) VALUES (1, 'epoch') \
         ON CONFLICT (id) DO NOTHING",
        // Rollups: additive upserts only, never decremented.
        r#"
        CREATE TABLE IF NOT EXISTS rollup_workspace_daily (
            workspace_id TEXT NOT NULL,
            date         DATE NOT NULL,
            total_clicks BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (workspace_id, date)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS rollup_link_daily (
            link_id      TEXT NOT NULL,
            date         DATE NOT NULL,
            total_clicks BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (link_id, date)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS rollup_referrer_daily (
            workspace_id TEXT NOT NULL,
            date         DATE NOT NULL,
            referrer     TEXT NOT NULL,
            total_clicks BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (workspace_id, date, referrer)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS rollup_country_daily (
            workspace_id TEXT NOT NULL,
            date         DATE NOT NULL,
            country      TEXT NOT NULL,
            total_clicks BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (workspace_id, date, country)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS rollup_device_daily (
            workspace_id TEXT NOT NULL,
            date         DATE NOT NULL,
            device_class TEXT NOT NULL,
            total_clicks BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (workspace_id, date, device_class)
        )
        "#,
        // Billing usage: one row per closed period per workspace.
        r#"
        CREATE TABLE IF NOT EXISTS billing_usage_periods (
            id              UUID PRIMARY KEY,
            workspace_id    TEXT NOT NULL,
            period_start    TIMESTAMPTZ NOT NULL,
            period_end      TIMESTAMPTZ NOT NULL,
            total_clicks    BIGINT NOT NULL,
            included_clicks BIGINT NOT NULL,
            overage_units   BIGINT NOT NULL,
            overage_amount  BIGINT NOT NULL,
            invoice_item_id TEXT,
            reported_at     TIMESTAMPTZ NOT NULL,
            UNIQUE (workspace_id, period_start, period_end)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS billing_usage_reported_idx ON billing_usage_periods (reported_at)",
    ];

    for ddl in statements {
        sqlx::query(ddl).execute(pool).await?;
    }

    sqlx::query("SELECT pg_advisory_unlock(72031455)")
        .execute(pool)
        .await?;

    Ok(())
}
