use crate::entities::schedules::Schedule as ScheduleEntity;
use crate::models::messages::UnknownStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Mirror of the referenced message's delivery progress. The message record
/// stays authoritative; this only trails it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub const ALL: [ScheduleStatus; 4] = [
        ScheduleStatus::Pending,
        ScheduleStatus::Sent,
        ScheduleStatus::Failed,
        ScheduleStatus::Cancelled,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScheduleStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_owned()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub schedule_id: Uuid,
    pub user_id: i64,
    pub message_id: Uuid,
    pub due_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub retry_count: u32,
    pub timezone: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScheduleEntity> for Schedule {
    type Error = UnknownStatus;

    fn try_from(value: ScheduleEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            schedule_id: value.id,
            user_id: value.user_id,
            message_id: value.message_id,
            due_at: value.due_at,
            status: value.status.parse()?,
            retry_count: value.retry_count.max(0) as u32,
            timezone: value.timezone,
            failure_reason: value.failure_reason,
            created_at: value.created_at,
            updated_at: value.updated_at,
            sent_at: value.sent_at,
        })
    }
}

pub struct CreateScheduleArgs<'a> {
    pub message_id: Uuid,
    pub user_id: i64,
    pub due_at: DateTime<Utc>,
    pub final_text: &'a str,
    pub tone: Option<&'a str>,
    pub timezone: Option<&'a str>,
}
