#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tone_delivery_service::adapters::{DeliverySink, ToneGenerator};
use tone_delivery_service::common::init::initialize_schema;
use tone_delivery_service::common::state::AppState;
use tone_delivery_service::common::tone_catalog::ToneCatalog;
use tone_delivery_service::models::delivery::{DeliveryPolicy, HandoffError};
use tone_delivery_service::models::generation::{GenerationError, GenerationPolicy};
use tone_delivery_service::models::messages::Message;
use tone_delivery_service::models::schedules::{CreateScheduleArgs, Schedule};
use tone_delivery_service::models::tones::{ModelConfig, ToneConfig};
use tone_delivery_service::usecases::{messages, schedules};
use uuid::Uuid;

pub const SENDER: i64 = 1;
pub const RECIPIENT: i64 = 2;

/// Answers with the original text, prefixed so variants are recognisable.
/// Fails for prompts containing `fail_on`.
#[derive(Default)]
pub struct EchoGenerator {
    pub fail_on: Option<(&'static str, GenerationError)>,
}

#[async_trait]
impl ToneGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str, _model: &ModelConfig) -> Result<String, GenerationError> {
        if let Some((needle, error)) = &self.fail_on {
            if prompt.contains(*needle) {
                return Err(error.clone());
            }
        }
        let original = prompt.rsplit("Original message: ").next().unwrap_or(prompt);
        Ok(format!("(softened) {}", original.trim()))
    }
}

/// Replays scripted outcomes, then succeeds. Remembers what it was given.
#[derive(Default)]
pub struct RecordingSink {
    script: Mutex<VecDeque<Result<(), HandoffError>>>,
    handed_off: Mutex<Vec<Uuid>>,
}

impl RecordingSink {
    pub fn scripted(outcomes: impl IntoIterator<Item = Result<(), HandoffError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            handed_off: Mutex::default(),
        }
    }

    pub fn handed_off(&self) -> Vec<Uuid> {
        self.handed_off.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, message: &Message) -> Result<(), HandoffError> {
        self.handed_off.lock().unwrap().push(message.message_id);
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub async fn state(sink: Arc<RecordingSink>) -> AppState {
    state_with(sink, Arc::new(EchoGenerator::default()), DeliveryPolicy::default()).await
}

pub async fn state_with(
    sink: Arc<RecordingSink>,
    generator: Arc<dyn ToneGenerator>,
    delivery: DeliveryPolicy,
) -> AppState {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    initialize_schema(&db).await.unwrap();
    AppState {
        db,
        tones: Arc::new(ToneCatalog::new(ToneConfig::builtin())),
        generator,
        sink: sink as Arc<dyn DeliverySink>,
        delivery,
        generation: GenerationPolicy {
            unit_timeout: Duration::from_secs(1),
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            deadline: Duration::from_secs(5),
        },
        default_timezone: "Asia/Tokyo".into(),
    }
}

/// A draft addressed to [`RECIPIENT`], scheduled for `due_at`.
pub async fn schedule(ctx: &AppState, text: &str, due_at: DateTime<Utc>) -> Schedule {
    let draft = messages::create_draft(ctx, SENDER, text).await.unwrap();
    messages::set_recipient(ctx, draft.message_id, SENDER, RECIPIENT)
        .await
        .unwrap();
    let args = CreateScheduleArgs {
        message_id: draft.message_id,
        user_id: SENDER,
        due_at,
        final_text: text,
        tone: None,
        timezone: None,
    };
    schedules::schedule_send(ctx, args).await.unwrap()
}

/// A due time comfortably in the future; pair with [`tick_time`].
pub fn in_half_an_hour() -> DateTime<Utc> {
    Utc::now() + TimeDelta::minutes(30)
}

/// When to run a tick so that [`in_half_an_hour`] schedules are due.
pub fn tick_time() -> DateTime<Utc> {
    Utc::now() + TimeDelta::hours(1)
}

/// For flows that also involve the retry re-scan, which runs on the wall
/// clock.
pub fn in_a_moment() -> DateTime<Utc> {
    Utc::now() + TimeDelta::milliseconds(200)
}

pub async fn wait_until_due() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
