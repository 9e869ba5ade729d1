use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: i64,
    pub recipient_id: Option<i64>,
    pub original_text: String,
    pub variants: Json<BTreeMap<String, String>>,
    pub selected_tone: Option<String>,
    pub final_text: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: String,
    pub claim_token: Option<Uuid>,
    pub delivery_attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivery_failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

pub struct CreateMessageArgs<'a> {
    pub sender_id: i64,
    pub recipient_id: Option<i64>,
    pub original_text: &'a str,
}
