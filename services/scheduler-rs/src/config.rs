/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub aggregation_interval_seconds: u64,
    pub aggregation_batch_size: i64,

    pub retention_hour_utc: u32,
    pub retention_days_free: i64,
    pub retention_batch_size: i64,

    pub billing_report_hour_utc: u32,
    pub reconciliation_hour_utc: u32,
    pub pro_included_clicks: i64,
    pub pro_overage_unit_clicks: i64,
    pub pro_overage_unit_price: i64,
    pub reconciliation_tolerance_clicks: i64,
    pub billing_api_url: String,

    pub metrics_port: u16,
}

fn env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("Missing env var: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            database_url: env("DATABASE_URL")?,
            aggregation_interval_seconds: env_parse("AGGREGATION_INTERVAL_SECONDS", 300),
            aggregation_batch_size: env_parse("AGGREGATION_BATCH_SIZE", 1000),
            retention_hour_utc: env_parse("RETENTION_HOUR_UTC", 3),
            retention_days_free: env_parse("RETENTION_DAYS_FREE", 30),
            retention_batch_size: env_parse("RETENTION_BATCH_SIZE", 5000),
            billing_report_hour_utc: env_parse("BILLING_REPORT_HOUR_UTC", 4),
            reconciliation_hour_utc: env_parse("RECONCILIATION_HOUR_UTC", 5),
            pro_included_clicks: env_parse("PRO_INCLUDED_CLICKS", 2_000_000),
            pro_overage_unit_clicks: env_parse("PRO_OVERAGE_UNIT_CLICKS", 100_000),
            pro_overage_unit_price: env_parse("PRO_OVERAGE_UNIT_PRICE", 100),
            reconciliation_tolerance_clicks: env_parse("RECONCILIATION_TOLERANCE_CLICKS", 1000),
            billing_api_url: env_or("BILLING_API_URL", "http://billing:8020"),
            metrics_port: env_parse("SCHEDULER_METRICS_PORT", 9300),
        })
    }
}
