use crate::entities::messages::Message as MessageEntity;
use crate::models::tones::{ToneLabel, ToneVariants};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MAX_TEXT_LENGTH: usize = 1000;

/// Lifecycle of a message.
///
/// `draft → processing → scheduled → sent → delivered → read`. The only
/// backward edges are `scheduled → draft` (cancellation) and
/// `processing → draft` (tone generation finished or failed). Edges are only
/// taken by the conditional updates in `repositories::messages`, each
/// naming its source status in the `WHERE` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Draft,
    Processing,
    Scheduled,
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 6] = [
        MessageStatus::Draft,
        MessageStatus::Processing,
        MessageStatus::Scheduled,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Read,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Draft => "draft",
            MessageStatus::Processing => "processing",
            MessageStatus::Scheduled => "scheduled",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub const fn is_visible_to_recipient(self) -> bool {
        matches!(self, MessageStatus::Delivered | MessageStatus::Read)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status `{}`", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_owned()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub message_id: Uuid,
    pub sender_id: i64,
    pub recipient_id: Option<i64>,
    pub original_text: String,
    pub variants: ToneVariants,
    pub selected_tone: Option<ToneLabel>,
    pub final_text: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub delivery_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivery_failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_visible_to(&self, user_id: i64) -> bool {
        self.sender_id == user_id
            || (self.recipient_id == Some(user_id) && self.status.is_visible_to_recipient())
    }
}

impl TryFrom<MessageEntity> for Message {
    type Error = UnknownStatus;

    fn try_from(value: MessageEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            message_id: value.id,
            sender_id: value.sender_id,
            recipient_id: value.recipient_id,
            original_text: value.original_text,
            variants: ToneVariants::from_stored(value.variants.0),
            selected_tone: value.selected_tone.map(ToneLabel::from_stored),
            final_text: value.final_text,
            due_at: value.due_at,
            status: value.status.parse()?,
            delivery_attempts: value.delivery_attempts.max(0) as u32,
            last_attempt_at: value.last_attempt_at,
            delivery_failure: value.delivery_failure,
            created_at: value.created_at,
            updated_at: value.updated_at,
            sent_at: value.sent_at,
            delivered_at: value.delivered_at,
            read_at: value.read_at,
        })
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One-based page of a listing. Out-of-range requests fall back to the
/// first page and the default size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.filter(|&p| p > 0).unwrap_or(1),
            limit: limit
                .filter(|l| (1..=MAX_PAGE_SIZE).contains(l))
                .unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

pub fn validate_text(text: &str) -> Result<&str, crate::common::error::AppError> {
    use crate::common::error::AppError;
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::MessagesEmptyText);
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(AppError::MessagesTooLong);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::AppError;

    #[test]
    fn status_round_trips_through_its_stored_name() {
        for status in MessageStatus::ALL {
            assert_eq!(status.as_str().parse::<MessageStatus>(), Ok(status));
        }
        assert!("archived".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn bad_page_requests_fall_back_to_defaults() {
        assert_eq!(Page::new(Some(0), Some(500)), Page { page: 1, limit: DEFAULT_PAGE_SIZE });
        let third = Page::new(Some(3), Some(10));
        assert_eq!(third.offset(), 20);
        assert_eq!(Page::default().offset(), 0);
    }

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(validate_text("  hi  "), Ok("hi"));
        assert_eq!(validate_text("   "), Err(AppError::MessagesEmptyText));
        let long = "あ".repeat(MAX_TEXT_LENGTH + 1);
        assert_eq!(validate_text(&long), Err(AppError::MessagesTooLong));
        let exact = "あ".repeat(MAX_TEXT_LENGTH);
        assert!(validate_text(&exact).is_ok());
    }
}
