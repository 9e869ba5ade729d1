use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct Schedule {
    pub id: Uuid,
    pub user_id: i64,
    pub message_id: Uuid,
    pub due_at: DateTime<Utc>,
    pub status: String,
    pub retry_count: i64,
    pub timezone: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
