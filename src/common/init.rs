use crate::adapters::anthropic::{AnthropicGenerator, UnconfiguredGenerator};
use crate::adapters::log_sink::LogSink;
use crate::adapters::redis_sink::RedisSink;
use crate::adapters::webhook::WebhookSink;
use crate::adapters::{DeliverySink, ToneGenerator};
use crate::common::redis_pool::{RedisPool, RedisPoolManager};
use crate::common::state::AppState;
use crate::common::tone_catalog::ToneCatalog;
use crate::models::delivery::DeliveryPolicy;
use crate::models::generation::GenerationPolicy;
use crate::settings::{AppSettings, DeliverySinkKind, RedisSettings};
use anyhow::Context as _;
use chrono::TimeDelta;
use deadpool::Runtime;
use redis::{AsyncConnectionConfig, Commands};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA: [&str; 8] = [
    r#"CREATE TABLE IF NOT EXISTS messages (
    id BLOB PRIMARY KEY NOT NULL,
    sender_id INTEGER NOT NULL,
    recipient_id INTEGER,
    original_text TEXT NOT NULL,
    variants TEXT NOT NULL DEFAULT '{}',
    selected_tone TEXT,
    final_text TEXT,
    due_at TEXT,
    status TEXT NOT NULL DEFAULT 'draft',
    claim_token BLOB,
    delivery_attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    delivery_failure TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sent_at TEXT,
    delivered_at TEXT,
    read_at TEXT
)"#,
    "CREATE INDEX IF NOT EXISTS messages_status_due_at ON messages (status, due_at)",
    "CREATE INDEX IF NOT EXISTS messages_claim_token ON messages (claim_token)",
    "CREATE INDEX IF NOT EXISTS messages_recipient_status ON messages (recipient_id, status)",
    r#"CREATE TABLE IF NOT EXISTS schedules (
    id BLOB PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL,
    message_id BLOB NOT NULL,
    due_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    timezone TEXT NOT NULL,
    failure_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sent_at TEXT
)"#,
    "CREATE INDEX IF NOT EXISTS schedules_user_status ON schedules (user_id, status)",
    "CREATE INDEX IF NOT EXISTS schedules_status ON schedules (status)",
    "CREATE INDEX IF NOT EXISTS schedules_message_id ON schedules (message_id)",
];

pub fn initialize_logging(settings: &AppSettings) {
    tracing_subscriber::fmt()
        .with_max_level(settings.level)
        .with_timer(tracing_subscriber::fmt::time())
        .with_level(true)
        .compact()
        .init();
}

pub async fn initialize_state(settings: &AppSettings) -> anyhow::Result<AppState> {
    let db = initialize_db(settings).await?;
    initialize_schema(&db).await?;
    let tones = ToneCatalog::load(settings.tone_config_path.as_deref())?;
    let generator = initialize_generator(settings)?;
    let sink = initialize_sink(settings)?;
    info!(sink = sink.name(), tones = tones.current().config.tones.len(), "Initialized state");
    Ok(AppState {
        db,
        tones: Arc::new(tones),
        generator,
        sink,
        delivery: delivery_policy(settings)?,
        generation: GenerationPolicy {
            unit_timeout: settings.generation_timeout,
            max_attempts: settings.generation_max_attempts,
            base_backoff: settings.generation_backoff,
            deadline: settings.generation_deadline,
        },
        default_timezone: settings.default_timezone.as_str().into(),
    })
}

pub async fn initialize_db(settings: &AppSettings) -> sqlx::Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(&settings.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(settings.db_wait_timeout);
    SqlitePoolOptions::new()
        .acquire_timeout(settings.db_wait_timeout)
        .max_connections(settings.db_max_connections)
        .connect_with(options)
        .await
}

pub async fn initialize_schema(db: &Pool<Sqlite>) -> sqlx::Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db).await?;
    }
    Ok(())
}

pub fn initialize_redis(settings: &RedisSettings) -> anyhow::Result<RedisPool> {
    let redis_client = redis::Client::open(settings.url.as_str())?;
    let mut conn = redis_client.get_connection_with_timeout(settings.wait_timeout)?;
    let _: () = conn.ping()?;
    let redis_cfg = AsyncConnectionConfig::new()
        .set_connection_timeout(settings.connection_timeout)
        .set_response_timeout(settings.response_timeout);

    let redis_manager = RedisPoolManager::new(redis_client, redis_cfg);
    let redis = RedisPool::builder(redis_manager)
        .max_size(settings.max_connections)
        .wait_timeout(Some(settings.wait_timeout))
        .runtime(Runtime::Tokio1)
        .build()?;
    Ok(redis)
}

fn initialize_generator(settings: &AppSettings) -> anyhow::Result<Arc<dyn ToneGenerator>> {
    let Some(api_key) = settings.anthropic.api_key.as_deref() else {
        warn!("ANTHROPIC_API_KEY is not set, tone generation requests will be rejected");
        return Ok(Arc::new(UnconfiguredGenerator));
    };
    let generator = AnthropicGenerator::new(
        api_key,
        &settings.anthropic.api_version,
        settings.anthropic.api_url.as_str(),
        settings.generation_timeout,
    )?;
    Ok(Arc::new(generator))
}

fn initialize_sink(settings: &AppSettings) -> anyhow::Result<Arc<dyn DeliverySink>> {
    match settings.delivery_sink {
        DeliverySinkKind::Log => Ok(Arc::new(LogSink)),
        DeliverySinkKind::Redis => {
            let redis = settings
                .redis
                .as_ref()
                .context("DELIVERY_SINK=redis requires REDIS_URL")?;
            Ok(Arc::new(RedisSink::new(initialize_redis(redis)?)))
        }
        DeliverySinkKind::Webhook => {
            let url = settings
                .delivery_webhook_url
                .as_deref()
                .context("DELIVERY_SINK=webhook requires DELIVERY_WEBHOOK_URL")?;
            Ok(Arc::new(WebhookSink::new(url, settings.delivery_webhook_timeout)?))
        }
    }
}

fn delivery_policy(settings: &AppSettings) -> anyhow::Result<DeliveryPolicy> {
    Ok(DeliveryPolicy {
        retry_grace: TimeDelta::from_std(settings.delivery_retry_grace)?,
        max_attempts: settings.delivery_max_attempts,
        stale_processing_after: TimeDelta::from_std(settings.delivery_stale_processing)?,
    })
}
