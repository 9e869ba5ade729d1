use crate::common::context::Context;
use crate::entities::messages::{CreateMessageArgs, Message};
use crate::models::messages::MessageStatus;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeMap;
use uuid::Uuid;

const TABLE_NAME: &str = "messages";
const READ_FIELDS: &str = r#"
id, sender_id, recipient_id, original_text, variants, selected_tone,
final_text, due_at, status, claim_token, delivery_attempts, last_attempt_at,
delivery_failure, created_at, updated_at, sent_at, delivered_at, read_at"#;

/// Upper bound on how many messages one claim covers.
pub const CLAIM_BATCH_SIZE: i64 = 500;

pub async fn create<C: Context>(ctx: &C, args: CreateMessageArgs<'_>) -> sqlx::Result<Message> {
    const QUERY: &str = const_str::concat!(
        "INSERT INTO ",
        TABLE_NAME,
        " (id, sender_id, recipient_id, original_text, variants, status, created_at, updated_at) ",
        "VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING ",
        READ_FIELDS,
    );
    let now = Utc::now();
    sqlx::query_as(QUERY)
        .bind(Uuid::new_v4())
        .bind(args.sender_id)
        .bind(args.recipient_id)
        .bind(args.original_text)
        .bind(Json(BTreeMap::<String, String>::new()))
        .bind(MessageStatus::Draft.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(ctx.db())
        .await
}

pub async fn fetch_one<C: Context>(ctx: &C, message_id: Uuid) -> sqlx::Result<Option<Message>> {
    const QUERY: &str = const_str::concat!(
        "SELECT ",
        READ_FIELDS,
        " FROM ",
        TABLE_NAME,
        " WHERE id = ?"
    );
    sqlx::query_as(QUERY)
        .bind(message_id)
        .fetch_optional(ctx.db())
        .await
}

/// Messages visible in the recipient's inbox, newest first.
pub async fn fetch_received<C: Context>(ctx: &C, recipient_id: i64) -> sqlx::Result<Vec<Message>> {
    const QUERY: &str = const_str::concat!(
        "SELECT ",
        READ_FIELDS,
        " FROM ",
        TABLE_NAME,
        " WHERE recipient_id = ? AND status IN (?, ?) ORDER BY delivered_at DESC"
    );
    sqlx::query_as(QUERY)
        .bind(recipient_id)
        .bind(MessageStatus::Delivered.as_str())
        .bind(MessageStatus::Read.as_str())
        .fetch_all(ctx.db())
        .await
}

/// The sender's drafts, most recently edited first.
pub async fn fetch_drafts<C: Context>(
    ctx: &C,
    sender_id: i64,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<Message>> {
    const QUERY: &str = const_str::concat!(
        "SELECT ",
        READ_FIELDS,
        " FROM ",
        TABLE_NAME,
        " WHERE sender_id = ? AND status = ? ORDER BY updated_at DESC LIMIT ? OFFSET ?"
    );
    sqlx::query_as(QUERY)
        .bind(sender_id)
        .bind(MessageStatus::Draft.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(ctx.db())
        .await
}

pub async fn count_drafts<C: Context>(ctx: &C, sender_id: i64) -> sqlx::Result<i64> {
    const QUERY: &str = const_str::concat!(
        "SELECT COUNT(*) FROM ",
        TABLE_NAME,
        " WHERE sender_id = ? AND status = ?"
    );
    sqlx::query_scalar(QUERY)
        .bind(sender_id)
        .bind(MessageStatus::Draft.as_str())
        .fetch_one(ctx.db())
        .await
}

/// Messages the sender committed to sending (scheduled onwards). Pending
/// ones have no `sent_at` yet and sort last.
pub async fn fetch_sent<C: Context>(
    ctx: &C,
    sender_id: i64,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<Message>> {
    const QUERY: &str = const_str::concat!(
        "SELECT ",
        READ_FIELDS,
        " FROM ",
        TABLE_NAME,
        " WHERE sender_id = ? AND status IN (?, ?, ?, ?)",
        " ORDER BY sent_at DESC, due_at LIMIT ? OFFSET ?"
    );
    sqlx::query_as(QUERY)
        .bind(sender_id)
        .bind(MessageStatus::Scheduled.as_str())
        .bind(MessageStatus::Sent.as_str())
        .bind(MessageStatus::Delivered.as_str())
        .bind(MessageStatus::Read.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(ctx.db())
        .await
}

pub async fn count_sent<C: Context>(ctx: &C, sender_id: i64) -> sqlx::Result<i64> {
    const QUERY: &str = const_str::concat!(
        "SELECT COUNT(*) FROM ",
        TABLE_NAME,
        " WHERE sender_id = ? AND status IN (?, ?, ?, ?)"
    );
    sqlx::query_scalar(QUERY)
        .bind(sender_id)
        .bind(MessageStatus::Scheduled.as_str())
        .bind(MessageStatus::Sent.as_str())
        .bind(MessageStatus::Delivered.as_str())
        .bind(MessageStatus::Read.as_str())
        .fetch_one(ctx.db())
        .await
}

/// The due set: `scheduled` messages whose due time has passed.
pub async fn fetch_due_ids<C: Context>(ctx: &C, now: DateTime<Utc>) -> sqlx::Result<Vec<Uuid>> {
    const QUERY: &str = const_str::concat!(
        "SELECT id FROM ",
        TABLE_NAME,
        " WHERE status = ? AND due_at <= ? ORDER BY due_at LIMIT ?"
    );
    sqlx::query_scalar(QUERY)
        .bind(MessageStatus::Scheduled.as_str())
        .bind(now)
        .bind(CLAIM_BATCH_SIZE)
        .fetch_all(ctx.db())
        .await
}

fn push_id_set(query: &mut QueryBuilder<'_, Sqlite>, message_ids: &[Uuid]) {
    query.push(" AND id IN (");
    let mut ids = query.separated(", ");
    for message_id in message_ids {
        ids.push_bind(*message_id);
    }
    ids.push_unseparated(")");
}

/// Moves the still-due `scheduled` subset of `message_ids` to `sent`,
/// tagging each claimed row with `claim_token`. Returns how many rows this
/// call claimed. Rows claimed by anyone else, or rescheduled past `now`
/// since discovery, are left untouched.
pub async fn claim_due<C: Context>(
    ctx: &C,
    message_ids: &[Uuid],
    claim_token: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let mut query = QueryBuilder::<Sqlite>::new(const_str::concat!("UPDATE ", TABLE_NAME, " SET status = "));
    query
        .push_bind(MessageStatus::Sent.as_str())
        .push(", sent_at = ")
        .push_bind(now)
        .push(", updated_at = ")
        .push_bind(now)
        .push(", last_attempt_at = ")
        .push_bind(now)
        .push(", claim_token = ")
        .push_bind(claim_token)
        .push(", due_at = NULL, delivery_attempts = delivery_attempts + 1 WHERE status = ")
        .push_bind(MessageStatus::Scheduled.as_str())
        .push(" AND due_at <= ")
        .push_bind(now);
    push_id_set(&mut query, message_ids);
    let res = query.build().execute(ctx.db()).await?;
    Ok(res.rows_affected())
}

pub async fn fetch_claimed<C: Context>(ctx: &C, claim_token: Uuid) -> sqlx::Result<Vec<Message>> {
    const QUERY: &str = const_str::concat!(
        "SELECT ",
        READ_FIELDS,
        " FROM ",
        TABLE_NAME,
        " WHERE claim_token = ?"
    );
    sqlx::query_as(QUERY)
        .bind(claim_token)
        .fetch_all(ctx.db())
        .await
}

/// `sent` messages whose last hand-off attempt is older than `cutoff`, that
/// have not failed fatally and still have attempts left.
pub async fn fetch_retry_ids<C: Context>(
    ctx: &C,
    max_attempts: u32,
    cutoff: DateTime<Utc>,
) -> sqlx::Result<Vec<Uuid>> {
    const QUERY: &str = const_str::concat!(
        "SELECT id FROM ",
        TABLE_NAME,
        " WHERE status = ? AND delivery_failure IS NULL",
        " AND delivery_attempts < ? AND last_attempt_at <= ?",
        " ORDER BY last_attempt_at LIMIT ?"
    );
    sqlx::query_scalar(QUERY)
        .bind(MessageStatus::Sent.as_str())
        .bind(max_attempts)
        .bind(cutoff)
        .bind(CLAIM_BATCH_SIZE)
        .fetch_all(ctx.db())
        .await
}

/// Same discipline as [`claim_due`], for messages stuck at `sent`. The
/// filter is repeated in the update so two re-scans cannot both claim.
pub async fn reclaim_stale<C: Context>(
    ctx: &C,
    message_ids: &[Uuid],
    claim_token: Uuid,
    max_attempts: u32,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let mut query = QueryBuilder::<Sqlite>::new(const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET delivery_attempts = delivery_attempts + 1, last_attempt_at = "
    ));
    query
        .push_bind(now)
        .push(", updated_at = ")
        .push_bind(now)
        .push(", claim_token = ")
        .push_bind(claim_token)
        .push(" WHERE status = ")
        .push_bind(MessageStatus::Sent.as_str())
        .push(" AND delivery_failure IS NULL AND delivery_attempts < ")
        .push_bind(max_attempts)
        .push(" AND last_attempt_at <= ")
        .push_bind(cutoff);
    push_id_set(&mut query, message_ids);
    let res = query.build().execute(ctx.db()).await?;
    Ok(res.rows_affected())
}

/// `sent` messages that used up every attempt without an outcome being
/// recorded, e.g. because the process stopped mid hand-off.
pub async fn fetch_exhausted_ids<C: Context>(
    ctx: &C,
    max_attempts: u32,
    cutoff: DateTime<Utc>,
) -> sqlx::Result<Vec<Uuid>> {
    const QUERY: &str = const_str::concat!(
        "SELECT id FROM ",
        TABLE_NAME,
        " WHERE status = ? AND delivery_failure IS NULL",
        " AND delivery_attempts >= ? AND last_attempt_at <= ?"
    );
    sqlx::query_scalar(QUERY)
        .bind(MessageStatus::Sent.as_str())
        .bind(max_attempts)
        .bind(cutoff)
        .fetch_all(ctx.db())
        .await
}

pub async fn mark_delivered<C: Context>(
    ctx: &C,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, delivered_at = ?, updated_at = ?, delivery_failure = NULL",
        " WHERE id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Delivered.as_str())
        .bind(now)
        .bind(now)
        .bind(message_id)
        .bind(MessageStatus::Sent.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

/// Records why the hand-off gave up. The message itself stays `sent`.
pub async fn record_delivery_failure<C: Context>(
    ctx: &C,
    message_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET delivery_failure = ?, updated_at = ?",
        " WHERE id = ? AND status = ? AND delivery_failure IS NULL"
    );
    let res = sqlx::query(QUERY)
        .bind(reason)
        .bind(now)
        .bind(message_id)
        .bind(MessageStatus::Sent.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

pub async fn mark_processing<C: Context>(
    ctx: &C,
    message_id: Uuid,
    sender_id: i64,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, updated_at = ? WHERE id = ? AND sender_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Processing.as_str())
        .bind(now)
        .bind(message_id)
        .bind(sender_id)
        .bind(MessageStatus::Draft.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

/// Replaces the whole variant set and ends generation in one statement.
pub async fn set_variants<C: Context>(
    ctx: &C,
    message_id: Uuid,
    original_text: &str,
    variants: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET original_text = ?, variants = ?, status = ?, updated_at = ?",
        " WHERE id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(original_text)
        .bind(Json(variants))
        .bind(MessageStatus::Draft.as_str())
        .bind(now)
        .bind(message_id)
        .bind(MessageStatus::Processing.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

pub async fn release_processing<C: Context>(
    ctx: &C,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, updated_at = ? WHERE id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Draft.as_str())
        .bind(now)
        .bind(message_id)
        .bind(MessageStatus::Processing.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

pub async fn release_stale_processing<C: Context>(
    ctx: &C,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, updated_at = ? WHERE status = ? AND updated_at <= ?"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Draft.as_str())
        .bind(now)
        .bind(MessageStatus::Processing.as_str())
        .bind(cutoff)
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

/// `draft/processing → scheduled`, setting final text and due time together.
pub async fn schedule(
    conn: &mut SqliteConnection,
    message_id: Uuid,
    sender_id: i64,
    final_text: &str,
    tone: Option<&str>,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, final_text = ?, selected_tone = ?, due_at = ?, updated_at = ?",
        " WHERE id = ? AND sender_id = ? AND status IN (?, ?)"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Scheduled.as_str())
        .bind(final_text)
        .bind(tone)
        .bind(due_at)
        .bind(now)
        .bind(message_id)
        .bind(sender_id)
        .bind(MessageStatus::Draft.as_str())
        .bind(MessageStatus::Processing.as_str())
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

/// `scheduled → draft`. Final text and due time are cleared with the status.
pub async fn unschedule(
    conn: &mut SqliteConnection,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, final_text = NULL, due_at = NULL, updated_at = ?",
        " WHERE id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Draft.as_str())
        .bind(now)
        .bind(message_id)
        .bind(MessageStatus::Scheduled.as_str())
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

pub async fn update_due_at(
    conn: &mut SqliteConnection,
    message_id: Uuid,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET due_at = ?, updated_at = ? WHERE id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(due_at)
        .bind(now)
        .bind(message_id)
        .bind(MessageStatus::Scheduled.as_str())
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}

/// `draft/processing → sent` for an immediate send. The row is claimed with
/// `claim_token` exactly like a scheduled claim, so the first hand-off
/// attempt is already counted.
pub async fn send<C: Context>(
    ctx: &C,
    message_id: Uuid,
    sender_id: i64,
    final_text: &str,
    tone: Option<&str>,
    claim_token: Uuid,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, final_text = ?, selected_tone = ?, sent_at = ?, updated_at = ?,",
        " last_attempt_at = ?, claim_token = ?, due_at = NULL, delivery_attempts = delivery_attempts + 1",
        " WHERE id = ? AND sender_id = ? AND status IN (?, ?)"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Sent.as_str())
        .bind(final_text)
        .bind(tone)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(claim_token)
        .bind(message_id)
        .bind(sender_id)
        .bind(MessageStatus::Draft.as_str())
        .bind(MessageStatus::Processing.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

pub async fn set_recipient<C: Context>(
    ctx: &C,
    message_id: Uuid,
    sender_id: i64,
    recipient_id: i64,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET recipient_id = ?, updated_at = ? WHERE id = ? AND sender_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(recipient_id)
        .bind(now)
        .bind(message_id)
        .bind(sender_id)
        .bind(MessageStatus::Draft.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

pub async fn delete_draft<C: Context>(ctx: &C, message_id: Uuid, sender_id: i64) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "DELETE FROM ",
        TABLE_NAME,
        " WHERE id = ? AND sender_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(message_id)
        .bind(sender_id)
        .bind(MessageStatus::Draft.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}

pub async fn mark_read<C: Context>(
    ctx: &C,
    message_id: Uuid,
    recipient_id: i64,
    now: DateTime<Utc>,
) -> sqlx::Result<u64> {
    const QUERY: &str = const_str::concat!(
        "UPDATE ",
        TABLE_NAME,
        " SET status = ?, read_at = ?, updated_at = ? WHERE id = ? AND recipient_id = ? AND status = ?"
    );
    let res = sqlx::query(QUERY)
        .bind(MessageStatus::Read.as_str())
        .bind(now)
        .bind(now)
        .bind(message_id)
        .bind(recipient_id)
        .bind(MessageStatus::Delivered.as_str())
        .execute(ctx.db())
        .await?;
    Ok(res.rows_affected())
}
