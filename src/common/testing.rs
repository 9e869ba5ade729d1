use crate::adapters::ToneGenerator;
use crate::adapters::log_sink::LogSink;
use crate::common::init::initialize_schema;
use crate::common::state::AppState;
use crate::common::tone_catalog::ToneCatalog;
use crate::models::delivery::DeliveryPolicy;
use crate::models::generation::{GenerationError, GenerationPolicy};
use crate::models::messages::{Message, MessageStatus};
use crate::models::tones::{ModelConfig, ToneConfig, ToneVariants};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Echoes the prompt back in brackets, optionally failing or stalling.
/// Failing prompts fail right away; only the others stall.
#[derive(Default)]
pub struct StubGenerator {
    fail_on: Option<(String, GenerationError)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubGenerator {
    pub fn failing_when_prompt_contains(needle: &str, error: GenerationError) -> Self {
        Self {
            fail_on: Some((needle.to_owned(), error)),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls started but neither finished nor dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Calls that ran to the end and produced a variant.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToneGenerator for StubGenerator {
    async fn generate(&self, prompt: &str, _model: &ModelConfig) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);
        if let Some((needle, error)) = &self.fail_on {
            if prompt.contains(needle.as_str()) {
                return Err(error.clone());
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("[{prompt}]"))
    }
}

/// Fails transiently for the first `failures` calls, then succeeds.
pub struct FlakyGenerator {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyGenerator {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToneGenerator for FlakyGenerator {
    async fn generate(&self, _prompt: &str, _model: &ModelConfig) -> Result<String, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match call < self.failures {
            true => Err(GenerationError::Transient("529 overloaded".to_owned())),
            false => Ok("ok".to_owned()),
        }
    }
}

pub async fn test_state() -> AppState {
    test_state_with(Arc::new(StubGenerator::default())).await
}

pub async fn test_state_with(generator: Arc<dyn ToneGenerator>) -> AppState {
    // one connection, kept forever: every in-memory connection is its own database
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
        sink: Arc::new(LogSink),
        delivery: DeliveryPolicy::default(),
        generation: GenerationPolicy {
            base_backoff: Duration::from_millis(1),
            ..GenerationPolicy::default()
        },
        default_timezone: "Asia/Tokyo".into(),
    }
}

pub fn sent_message(recipient_id: Option<i64>, text: &str) -> Message {
    let now = Utc::now();
    Message {
        message_id: Uuid::new_v4(),
        sender_id: 1,
        recipient_id,
        original_text: text.to_owned(),
        variants: ToneVariants::default(),
        selected_tone: None,
        final_text: Some(text.to_owned()),
        due_at: None,
        status: MessageStatus::Sent,
        delivery_attempts: 1,
        last_attempt_at: Some(now),
        delivery_failure: None,
        created_at: now,
        updated_at: now,
        sent_at: Some(now),
        delivered_at: None,
        read_at: None,
    }
}
