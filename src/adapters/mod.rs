use crate::models::delivery::HandoffError;
use crate::models::generation::GenerationError;
use crate::models::messages::Message;
use crate::models::tones::ModelConfig;
use async_trait::async_trait;

pub mod anthropic;
pub mod log_sink;
pub mod redis_sink;
pub mod webhook;

/// Remote text generation, invoked once per tone. Holds no state between calls.
#[async_trait]
pub trait ToneGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, model: &ModelConfig) -> Result<String, GenerationError>;
}

/// Makes a sent message visible to its recipient.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, message: &Message) -> Result<(), HandoffError>;
}
