use crate::common::context::Context;
use crate::entities::schedules::Schedule;
use crate::models::messages::MessageStatus;
use crate::models::schedules::ScheduleStatus;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

const TABLE_NAME: &str = "schedules";
const READ_FIELDS: &str = r#"
id, user_id, message_id, due_at, status, retry_count, timezone,
failure_reason, created_at, updated_at, sent_at"#;

pub async fn create(
    conn: &mut SqliteConnection,
    user_id: i64,
    message_id: Uuid,
    due_at: DateTime<Utc>,
    timezone: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<Schedule> {
    const QUERY: &str = const_str::concat!(
        "INSERT INTO ",
        TABLE_NAME,
        " (id, user_id, message_id, due_at, status, timezone, created_at, updated_at) ",
        "VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING ",
        READ_FIELDS,
    );
    sqlx::query_as(QUERY)
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(message_id)
        .bind(due_at)
        .bind(ScheduleStatus::Pending.as_str())
        .bind(timezone)
        .bind(now)
        .bind(now)
        .fetch_one(conn)
        .await
}

pub async fn fetch_one<C: Context>(ctx: &C, schedule_id: Uuid) -> sqlx::Result<Option<Schedule>> {
    const QUERY: &str = const_str::concat!(
        "SELECT ",
        READ_FIELDS,
        " FROM ",
        TABLE_NAME,
        " WHERE id = ?"
    );
    sqlx::query_as(QUERY)
        .bind(schedule_id)
        .fetch_optional(ctx.db())
        .await
}

pub async fn fetch_for_user<C: Context>(
    ctx: &C,
    user_id: i64,
    status: Option<ScheduleStatus>,
) -> sqlx::Result<Vec<Schedule>> {
    const QUERY: &str = const_str::concat!(
        "SELECT ",
        READ_FIELDS,
        " FROM ",
        TABLE_NAME,
        " WHERE user_id = ? AND (? IS NULL OR status = ?) ORDER BY due_at"
    );
    let status = status.map(|status| status.as_str());
    sqlx::query_as(QUERY)
        .bind(user_id)
        .bind(status)
        .bind(status)
        .fetch_all(ctx.db())
        .await
}

pub async fn delete_pending(
    conn: &mut SqliteConnection,
    schedule_id: Uuid,
    user_id: i64,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "DELETE FROM ",
        TABLE_NAME,
        " WHERE id = ? AND user_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(schedule_id)
        .bind(user_id)
        .bind(ScheduleStatus::Pending.as_str())
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn update_due_at(
    conn: &mut SqliteConnection,
    schedule_id: Uuid,
    user_id: i64,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET due_at = ?, updated_at = ? WHERE id = ? AND user_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(due_at)
        .bind(now)
        .bind(schedule_id)
        .bind(user_id)
        .bind(ScheduleStatus::Pending.as_str())
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn mark_sent<C: Context>(
    ctx: &C,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, sent_at = ?, updated_at = ? WHERE message_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(ScheduleStatus::Sent.as_str())
        .bind(now)
        .bind(now)
        .bind(message_id)
        .bind(ScheduleStatus::Pending.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

pub async fn record_retry<C: Context>(
    ctx: &C,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET retry_count = retry_count + 1, updated_at = ? WHERE message_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(now)
        .bind(message_id)
        .bind(ScheduleStatus::Pending.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

/// Marks the pending schedule of `message_id` as failed. `retried` counts the
/// final attempt towards `retry_count` when it failed transiently.
pub async fn mark_failed<C: Context>(
    ctx: &C,
    message_id: Uuid,
    reason: &str,
    retried: bool,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, failure_reason = ?, retry_count = retry_count + ?, updated_at = ?",
        " WHERE message_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(ScheduleStatus::Failed.as_str())
        .bind(reason)
        .bind(i64::from(retried))
        .bind(now)
        .bind(message_id)
        .bind(ScheduleStatus::Pending.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

/// Pending schedules whose message already reached the recipient.
pub async fn reconcile_delivered<C: Context>(ctx: &C, now: DateTime<Utc>) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, sent_at = ?, updated_at = ? WHERE status = ?",
        " AND message_id IN (SELECT id FROM messages WHERE status IN (?, ?))"
    );
    let res = sqlx::query(QUERY)
        .bind(ScheduleStatus::Sent.as_str())
        .bind(now)
        .bind(now)
        .bind(ScheduleStatus::Pending.as_str())
        .bind(MessageStatus::Delivered.as_str())
        .bind(MessageStatus::Read.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

/// Pending schedules whose message went back to `draft` outside of a cancel.
pub async fn reconcile_released<C: Context>(ctx: &C, now: DateTime<Utc>) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, updated_at = ? WHERE status = ?",
        " AND message_id IN (SELECT id FROM messages WHERE status IN (?, ?))"
    );
    let res = sqlx::query(QUERY)
        .bind(ScheduleStatus::Cancelled.as_str())
        .bind(now)
        .bind(ScheduleStatus::Pending.as_str())
        .bind(MessageStatus::Draft.as_str())
        .bind(MessageStatus::Processing.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}
