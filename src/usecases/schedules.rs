use crate::common::context::Context;
use crate::common::error::{AppError, ServiceResult};
use crate::models::schedules::{CreateScheduleArgs, Schedule, ScheduleStatus};
use crate::models::tones::ToneLabel;
use crate::repositories::{messages, schedules};
use crate::usecases::delivery;
use crate::usecases::messages::{rejection, resolve_final_text};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Commits a message to being sent at `due_at`.
///
/// The message moves to `scheduled` and its pending schedule is created in
/// one transaction. A due time that already passed is delivered right away
/// through the regular due-delivery pass.
pub async fn schedule_send<C: Context>(ctx: &C, args: CreateScheduleArgs<'_>) -> ServiceResult<Schedule> {
    let (final_text, tone) = resolve_final_text(ctx, args.final_text, args.tone)?;
    let now = Utc::now();
    let past_due = args.due_at <= now;
    let due_at = match past_due {
        true => now,
        false => args.due_at,
    };
    let timezone = args.timezone.unwrap_or(ctx.default_timezone());

    let mut tx = ctx.db().begin().await?;
    let tone = tone.as_ref().map(ToneLabel::as_str);
    let updated =
        messages::schedule(&mut tx, args.message_id, args.user_id, final_text, tone, due_at, now).await?;
    if updated == 0 {
        tx.rollback().await?;
        return rejection(ctx, args.message_id, args.user_id).await;
    }
    let schedule = schedules::create(&mut tx, args.user_id, args.message_id, due_at, timezone, now).await?;
    tx.commit().await?;

    let schedule = Schedule::try_from(schedule)?;
    info!(
        schedule_id = schedule.schedule_id.to_string(),
        message_id = schedule.message_id.to_string(),
        due_at = %schedule.due_at,
        "Scheduled message"
    );
    if !past_due {
        return Ok(schedule);
    }
    delivery::deliver_now(ctx).await?;
    fetch_one(ctx, schedule.schedule_id, args.user_id).await
}

pub async fn fetch_one<C: Context>(ctx: &C, schedule_id: Uuid, user_id: i64) -> ServiceResult<Schedule> {
    match schedules::fetch_one(ctx, schedule_id).await? {
        Some(schedule) if schedule.user_id == user_id => Ok(Schedule::try_from(schedule)?),
        _ => Err(AppError::SchedulesNotFound),
    }
}

pub async fn fetch_for_user<C: Context>(
    ctx: &C,
    user_id: i64,
    status: Option<ScheduleStatus>,
) -> ServiceResult<Vec<Schedule>> {
    let found = schedules::fetch_for_user(ctx, user_id, status).await?;
    let found = found
        .into_iter()
        .map(Schedule::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(found)
}

/// Deletes a pending schedule and returns its message to `draft`. Anything
/// past `pending` is rejected without side effects.
pub async fn cancel_schedule<C: Context>(ctx: &C, schedule_id: Uuid, user_id: i64) -> ServiceResult<()> {
    let schedule = fetch_one(ctx, schedule_id, user_id).await?;
    if schedule.status != ScheduleStatus::Pending {
        return Err(AppError::SchedulesNotPending);
    }

    let mut tx = ctx.db().begin().await?;
    let deleted = schedules::delete_pending(&mut tx, schedule_id, user_id).await?;
    let released = match deleted {
        0 => 0,
        _ => messages::unschedule(&mut tx, schedule.message_id, Utc::now()).await?,
    };
    if released == 0 {
        // claimed by the scheduler since the read above
        tx.rollback().await?;
        return Err(AppError::SchedulesNotPending);
    }
    tx.commit().await?;
    info!(
        schedule_id = schedule_id.to_string(),
        message_id = schedule.message_id.to_string(),
        "Cancelled schedule"
    );
    Ok(())
}

/// Moves a pending schedule and its message to a new due time together.
pub async fn reschedule<C: Context>(
    ctx: &C,
    schedule_id: Uuid,
    user_id: i64,
    due_at: DateTime<Utc>,
) -> ServiceResult<Schedule> {
    let schedule = fetch_one(ctx, schedule_id, user_id).await?;
    if schedule.status != ScheduleStatus::Pending {
        return Err(AppError::SchedulesNotPending);
    }
    let now = Utc::now();
    let past_due = due_at <= now;
    let due_at = due_at.max(now);

    let mut tx = ctx.db().begin().await?;
    let moved = schedules::update_due_at(&mut tx, schedule_id, user_id, due_at, now).await?;
    let moved = match moved {
        0 => 0,
        _ => messages::update_due_at(&mut tx, schedule.message_id, due_at, now).await?,
    };
    if moved == 0 {
        tx.rollback().await?;
        return Err(AppError::SchedulesNotPending);
    }
    tx.commit().await?;
    info!(schedule_id = schedule_id.to_string(), due_at = %due_at, "Rescheduled message");

    if past_due {
        delivery::deliver_now(ctx).await?;
    }
    fetch_one(ctx, schedule_id, user_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::testing::test_state;
    use crate::models::messages::MessageStatus;
    use crate::usecases::messages::create_draft;
    use chrono::TimeDelta;

    fn args(message_id: Uuid, due_at: DateTime<Utc>) -> CreateScheduleArgs<'static> {
        CreateScheduleArgs {
            message_id,
            user_id: 1,
            due_at,
            final_text: "Sorry, I won't be able to join.",
            tone: Some("gentle"),
            timezone: None,
        }
    }

    #[tokio::test]
    async fn scheduling_sets_final_text_and_due_time_together() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "I can't make the meeting.").await.unwrap();
        let due_at = Utc::now() + TimeDelta::hours(1);

        let schedule = schedule_send(&ctx, args(draft.message_id, due_at)).await.unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Pending);
        assert_eq!(schedule.timezone, "Asia/Tokyo");

        let message = crate::usecases::messages::fetch_one(&ctx, draft.message_id, 1).await.unwrap();
        assert_eq!(message.status, MessageStatus::Scheduled);
        assert_eq!(message.due_at, Some(schedule.due_at));
        assert_eq!(message.final_text.as_deref(), Some("Sorry, I won't be able to join."));
    }

    #[tokio::test]
    async fn scheduling_twice_is_rejected() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "hello").await.unwrap();
        let due_at = Utc::now() + TimeDelta::hours(1);
        schedule_send(&ctx, args(draft.message_id, due_at)).await.unwrap();
        assert_eq!(
            schedule_send(&ctx, args(draft.message_id, due_at)).await.unwrap_err(),
            AppError::MessagesInvalidState
        );
        assert_eq!(fetch_for_user(&ctx, 1, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn past_due_times_are_delivered_immediately() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "hello").await.unwrap();
        let schedule = schedule_send(&ctx, args(draft.message_id, Utc::now() - TimeDelta::minutes(5)))
            .await
            .unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Sent);
        let message = crate::usecases::messages::fetch_one(&ctx, draft.message_id, 1).await.unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(message.due_at, None);
    }

    #[tokio::test]
    async fn reschedule_moves_both_records() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "hello").await.unwrap();
        let schedule = schedule_send(&ctx, args(draft.message_id, Utc::now() + TimeDelta::hours(1)))
            .await
            .unwrap();

        let later = Utc::now() + TimeDelta::hours(3);
        let moved = reschedule(&ctx, schedule.schedule_id, 1, later).await.unwrap();
        assert_eq!(moved.due_at, later);
        let message = crate::usecases::messages::fetch_one(&ctx, draft.message_id, 1).await.unwrap();
        assert_eq!(message.due_at, Some(later));

        assert_eq!(
            reschedule(&ctx, schedule.schedule_id, 2, later).await.unwrap_err(),
            AppError::SchedulesNotFound
        );
    }

    #[tokio::test]
    async fn schedules_are_filtered_by_status() {
        let ctx = test_state().await;
        let first = create_draft(&ctx, 1, "one").await.unwrap();
        let second = create_draft(&ctx, 1, "two").await.unwrap();
        schedule_send(&ctx, args(first.message_id, Utc::now() + TimeDelta::hours(1)))
            .await
            .unwrap();
        schedule_send(&ctx, args(second.message_id, Utc::now() - TimeDelta::seconds(1)))
            .await
            .unwrap();

        let pending = fetch_for_user(&ctx, 1, Some(ScheduleStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, first.message_id);
        assert_eq!(fetch_for_user(&ctx, 1, None).await.unwrap().len(), 2);
        assert!(fetch_for_user(&ctx, 2, None).await.unwrap().is_empty());
    }
}
