/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_env: String,
    pub listen_addr: String,

    pub database_url: String,

    pub kafka_bootstrap_servers: String,
    pub kafka_click_topic: String,

    pub free_monthly_cap: i64,
    pub plan_cache_ttl_seconds: u64,

    pub detached_task_deadline_seconds: u64,
    pub track_queue_capacity: usize,
    pub track_workers: usize,
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
            app_name: env_or("APP_NAME", "shortlink-edge-rs"),
            app_env: env_or("APP_ENV", "development"),
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:8000"),
            database_url: env("DATABASE_URL")?,
            kafka_bootstrap_servers: env_or("KAFKA_BOOTSTRAP_SERVERS", "kafka:9092"),
            kafka_click_topic: env_or("KAFKA_CLICK_TOPIC", "click_events"),
            free_monthly_cap: env_parse("FREE_MONTHLY_CAP", 5000),
            plan_cache_ttl_seconds: env_parse("PLAN_CACHE_TTL_SECONDS", 60),
            detached_task_deadline_seconds: env_parse("DETACHED_TASK_DEADLINE_SECONDS", 5),
            track_queue_capacity: env_parse("TRACK_QUEUE_CAPACITY", 4096),
            track_workers: env_parse("TRACK_WORKERS", 4),
        })
    }
}
