use crate::common::env::{FromEnv, millis_from_env_or, optional_from_env, secs_from_env_or};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySinkKind {
    Log,
    Redis,
    Webhook,
}

#[derive(Debug)]
pub struct UnknownSinkKind(String);

impl fmt::Display for UnknownSinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown delivery sink `{}`, expected log, redis or webhook", self.0)
    }
}

impl std::error::Error for UnknownSinkKind {}

impl FromStr for DeliverySinkKind {
    type Err = UnknownSinkKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "redis" => Ok(Self::Redis),
            "webhook" => Ok(Self::Webhook),
            other => Err(UnknownSinkKind(other.to_owned())),
        }
    }
}

pub struct RedisSettings {
    pub url: String,
    pub max_connections: usize,
    pub connection_timeout: Duration,
    pub response_timeout: Duration,
    pub wait_timeout: Duration,
}

pub struct AnthropicSettings {
    pub api_key: Option<String>,
    pub api_url: String,
    pub api_version: String,
}

pub struct AppSettings {
    pub app_component: String,
    pub level: Level,
    pub default_timezone: String,

    pub database_url: String,
    pub db_max_connections: u32,
    pub db_wait_timeout: Duration,

    pub delivery_interval: Duration,
    pub delivery_tick_timeout: Duration,
    pub delivery_retry_grace: Duration,
    pub delivery_max_attempts: u32,
    pub delivery_stale_processing: Duration,
    pub shutdown_timeout: Duration,

    pub delivery_sink: DeliverySinkKind,
    pub delivery_webhook_url: Option<String>,
    pub delivery_webhook_timeout: Duration,
    pub redis: Option<RedisSettings>,

    pub tone_config_path: Option<PathBuf>,
    pub anthropic: AnthropicSettings,
    pub generation_timeout: Duration,
    pub generation_max_attempts: u32,
    pub generation_backoff: Duration,
    pub generation_deadline: Duration,
}

impl AppSettings {
    pub fn load_from_env() -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();

        let app_component = env::var("APP_COMPONENT")?;
        let level = Level::from_env_or("LOG_LEVEL", Level::INFO)?;
        let default_timezone = String::from_env_or("DEFAULT_TIMEZONE", "Asia/Tokyo".to_owned())?;

        let database_url = env::var("DATABASE_URL")?;
        let db_max_connections = u32::from_env_or("DB_MAX_CONNECTIONS", 5)?;
        let db_wait_timeout = secs_from_env_or("DB_WAIT_TIMEOUT_SECS", 5)?;

        let delivery_interval = secs_from_env_or("DELIVERY_INTERVAL_SECS", 60)?;
        let delivery_tick_timeout = secs_from_env_or("DELIVERY_TICK_TIMEOUT_SECS", 30)?;
        let delivery_retry_grace = secs_from_env_or("DELIVERY_RETRY_GRACE_SECS", 300)?;
        let delivery_max_attempts = u32::from_env_or("DELIVERY_MAX_ATTEMPTS", 3)?.max(1);
        let delivery_stale_processing = secs_from_env_or("DELIVERY_STALE_PROCESSING_SECS", 300)?;
        let shutdown_timeout = secs_from_env_or("SHUTDOWN_TIMEOUT_SECS", 30)?;

        let delivery_sink = DeliverySinkKind::from_env_or("DELIVERY_SINK", DeliverySinkKind::Log)?;
        let delivery_webhook_url = optional_from_env("DELIVERY_WEBHOOK_URL");
        let delivery_webhook_timeout = secs_from_env_or("DELIVERY_WEBHOOK_TIMEOUT_SECS", 10)?;
        let redis = match optional_from_env("REDIS_URL") {
            Some(url) => Some(RedisSettings {
                url,
                max_connections: usize::from_env_or("REDIS_MAX_CONNECTIONS", 8)?,
                connection_timeout: secs_from_env_or("REDIS_CONNECTION_TIMEOUT_SECS", 5)?,
                response_timeout: secs_from_env_or("REDIS_RESPONSE_TIMEOUT_SECS", 5)?,
                wait_timeout: secs_from_env_or("REDIS_WAIT_TIMEOUT_SECS", 5)?,
            }),
            None => None,
        };

        let tone_config_path = optional_from_env("TONE_CONFIG_PATH").map(PathBuf::from);
        let anthropic = AnthropicSettings {
            api_key: optional_from_env("ANTHROPIC_API_KEY"),
            api_url: optional_from_env("ANTHROPIC_API_URL")
                .unwrap_or_else(|| crate::adapters::anthropic::DEFAULT_API_URL.to_owned()),
            api_version: optional_from_env("ANTHROPIC_VERSION")
                .unwrap_or_else(|| crate::adapters::anthropic::DEFAULT_API_VERSION.to_owned()),
        };
        let generation_timeout = secs_from_env_or("GENERATION_TIMEOUT_SECS", 30)?;
        let generation_max_attempts = u32::from_env_or("GENERATION_MAX_ATTEMPTS", 3)?.max(1);
        let generation_backoff = millis_from_env_or("GENERATION_BACKOFF_MILLIS", 1000)?;
        let generation_deadline = secs_from_env_or("GENERATION_DEADLINE_SECS", 90)?;

        Ok(AppSettings {
            app_component,
            level,
            default_timezone,

            database_url,
            db_max_connections,
            db_wait_timeout,

            delivery_interval,
            delivery_tick_timeout,
            delivery_retry_grace,
            delivery_max_attempts,
            delivery_stale_processing,
            shutdown_timeout,

            delivery_sink,
            delivery_webhook_url,
            delivery_webhook_timeout,
            redis,

            tone_config_path,
            anthropic,
            generation_timeout,
            generation_max_attempts,
            generation_backoff,
            generation_deadline,
        })
    }
}
