use crate::adapters::DeliverySink;
use crate::models::delivery::HandoffError;
use crate::models::messages::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct DeliveryNotification<'a> {
    pub message_id: Uuid,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub text: &'a str,
    pub tone: Option<&'a str>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl<'a> DeliveryNotification<'a> {
    pub fn from_message(message: &'a Message) -> Result<Self, HandoffError> {
        let recipient_id = message
            .recipient_id
            .ok_or_else(|| HandoffError::Fatal("message has no recipient".to_owned()))?;
        let text = message
            .final_text
            .as_deref()
            .ok_or_else(|| HandoffError::Fatal("message has no final text".to_owned()))?;
        Ok(Self {
            message_id: message.message_id,
            sender_id: message.sender_id,
            recipient_id,
            text,
            tone: message.selected_tone.as_ref().map(|tone| tone.as_str()),
            sent_at: message.sent_at,
        })
    }
}

/// Hands messages off by POSTing a JSON notification to a fixed endpoint.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn classify_status(status: StatusCode) -> Option<HandoffError> {
    if status.is_success() {
        return None;
    }
    let reason = format!("webhook returned {status}");
    match status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        true => Some(HandoffError::Transient(reason)),
        false => Some(HandoffError::Fatal(reason)),
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, message: &Message) -> Result<(), HandoffError> {
        let notification = DeliveryNotification::from_message(message)?;
        let response = self
            .client
            .post(&self.url)
            .json(&notification)
            .send()
            .await
            .map_err(|e| match e.is_builder() {
                true => HandoffError::Fatal(e.to_string()),
                false => HandoffError::Transient(e.to_string()),
            })?;
        match classify_status(response.status()) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
