use crate::adapters::DeliverySink;
use crate::models::delivery::HandoffError;
use crate::models::messages::Message;
use async_trait::async_trait;
use tracing::info;

/// Placeholder hand-off: recipients read delivered messages from the store,
/// so there is nothing to push.
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, message: &Message) -> Result<(), HandoffError> {
        info!(
            message_id = message.message_id.to_string(),
            sender_id = message.sender_id,
            recipient_id = message.recipient_id,
            "Message handed off to recipient inbox"
        );
        Ok(())
    }
}
