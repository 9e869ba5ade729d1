use crate::common::context::Context;
use crate::common::error::ServiceResult;
use crate::models::delivery::{DeliveryReport, HandoffError, ReconcileReport};
use crate::models::messages::Message;
use crate::repositories::{messages, schedules};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

/// What happened to one claimed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    Delivered,
    /// Left at `sent` for the retry re-scan.
    Retrying,
    Failed,
}

impl DeliveryReport {
    fn record(&mut self, outcome: HandoffOutcome) {
        match outcome {
            HandoffOutcome::Delivered => self.delivered += 1,
            HandoffOutcome::Retrying => self.retryable += 1,
            HandoffOutcome::Failed => self.failed += 1,
        }
    }
}

/// Discovers every due `scheduled` message, claims the batch and hands each
/// claimed message off. Also the manual "deliver now" trigger.
pub async fn deliver_due<C: Context>(ctx: &C) -> ServiceResult<DeliveryReport> {
    deliver_due_as_of(ctx, Utc::now()).await
}

/// [`deliver_due`] with an explicit notion of "now" for the due query and
/// the `sent_at` stamp.
pub async fn deliver_due_as_of<C: Context>(
    ctx: &C,
    now: DateTime<Utc>,
) -> ServiceResult<DeliveryReport> {
    let due = messages::fetch_due_ids(ctx, now).await?;
    if due.is_empty() {
        return Ok(DeliveryReport::default());
    }

    let claim_token = Uuid::new_v4();
    let claimed = messages::claim_due(ctx, &due, claim_token, now).await?;
    let mut report = DeliveryReport {
        discovered: due.len(),
        claimed: claimed as usize,
        ..DeliveryReport::default()
    };
    if claimed < due.len() as u64 {
        info!(
            discovered = due.len(),
            claimed, "Some due messages were claimed elsewhere"
        );
    }
    hand_off_claimed(ctx, claim_token, &mut report).await?;
    info!(
        claimed = report.claimed,
        delivered = report.delivered,
        retryable = report.retryable,
        failed = report.failed,
        "Delivered due messages"
    );
    Ok(report)
}

/// Runs [`deliver_due`] on demand and returns how many messages reached
/// their recipient.
pub async fn deliver_now<C: Context>(ctx: &C) -> ServiceResult<usize> {
    let report = deliver_due(ctx).await?;
    Ok(report.delivered)
}

/// Re-claims messages stuck at `sent` after a retryable hand-off failure and
/// gives up on the ones that ran out of attempts.
pub async fn retry_stale<C: Context>(ctx: &C) -> ServiceResult<DeliveryReport> {
    let policy = *ctx.delivery_policy();
    let now = Utc::now();
    let cutoff = now - policy.retry_grace;
    let mut report = DeliveryReport::default();

    for message_id in messages::fetch_exhausted_ids(ctx, policy.max_attempts, cutoff).await? {
        let reason = format!("gave up after {} delivery attempts", policy.max_attempts);
        if record_failure(ctx, message_id, &reason, false).await? {
            report.failed += 1;
        }
    }

    let stale = messages::fetch_retry_ids(ctx, policy.max_attempts, cutoff).await?;
    if stale.is_empty() {
        return Ok(report);
    }
    let claim_token = Uuid::new_v4();
    let claimed =
        messages::reclaim_stale(ctx, &stale, claim_token, policy.max_attempts, cutoff, now).await?;
    report.discovered = stale.len();
    report.claimed = claimed as usize;
    hand_off_claimed(ctx, claim_token, &mut report).await?;
    info!(
        claimed = report.claimed,
        delivered = report.delivered,
        retryable = report.retryable,
        failed = report.failed,
        "Retried stale hand-offs"
    );
    Ok(report)
}

/// Brings schedules back in line with their messages and releases messages
/// abandoned in `processing`.
pub async fn reconcile<C: Context>(ctx: &C) -> ServiceResult<ReconcileReport> {
    let now = Utc::now();
    let stale_cutoff = now - ctx.delivery_policy().stale_processing_after;
    let report = ReconcileReport {
        drafts_released: messages::release_stale_processing(ctx, stale_cutoff, now).await?,
        schedules_marked_sent: schedules::reconcile_delivered(ctx, now).await?,
        schedules_cancelled: schedules::reconcile_released(ctx, now).await?,
    };
    if report != ReconcileReport::default() {
        warn!(
            marked_sent = report.schedules_marked_sent,
            cancelled = report.schedules_cancelled,
            released = report.drafts_released,
            "Reconciled out-of-sync records"
        );
    }
    Ok(report)
}

async fn hand_off_claimed<C: Context>(
    ctx: &C,
    claim_token: Uuid,
    report: &mut DeliveryReport,
) -> ServiceResult<()> {
    for message in messages::fetch_claimed(ctx, claim_token).await? {
        match Message::try_from(message) {
            Ok(message) => report.record(hand_off(ctx, message).await),
            Err(e) => {
                error!(claim_token = claim_token.to_string(), "Skipping unreadable claimed message: {e}");
                report.failed += 1;
            }
        }
    }
    Ok(())
}

/// Hands one `sent` message to the sink and records the outcome on the
/// message and its schedule. Never fails: store errors are logged and leave
/// the message for the retry re-scan.
pub(crate) async fn hand_off<C: Context>(ctx: &C, message: Message) -> HandoffOutcome {
    let message_id = message.message_id;
    let result = ctx.delivery_sink().deliver(&message).await;
    let recorded = match result {
        Ok(()) => record_delivered(ctx, message_id).await,
        Err(HandoffError::Transient(reason))
            if message.delivery_attempts < ctx.delivery_policy().max_attempts =>
        {
            warn!(
                message_id = message_id.to_string(),
                attempt = message.delivery_attempts,
                "Retryable hand-off failure: {reason}"
            );
            schedules::record_retry(ctx, message_id, Utc::now())
                .await
                .map(|_| HandoffOutcome::Retrying)
                .map_err(Into::into)
        }
        Err(e) => {
            error!(
                message_id = message_id.to_string(),
                attempt = message.delivery_attempts,
                sink = ctx.delivery_sink().name(),
                "Hand-off failed permanently: {e}"
            );
            record_failure(ctx, message_id, e.reason(), e.is_retryable())
                .await
                .map(|_| HandoffOutcome::Failed)
        }
    };
    match recorded {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                message_id = message_id.to_string(),
                "Failed to record hand-off outcome: {e}"
            );
            HandoffOutcome::Retrying
        }
    }
}

async fn record_delivered<C: Context>(ctx: &C, message_id: Uuid) -> ServiceResult<HandoffOutcome> {
    let now = Utc::now();
    if messages::mark_delivered(ctx, message_id, now).await? == 0 {
        warn!(message_id = message_id.to_string(), "Message left `sent` during hand-off");
        return Ok(HandoffOutcome::Retrying);
    }
    schedules::mark_sent(ctx, message_id, now).await?;
    info!(message_id = message_id.to_string(), "Message delivered");
    Ok(HandoffOutcome::Delivered)
}

/// Returns whether this call was the one to record the failure.
async fn record_failure<C: Context>(
    ctx: &C,
    message_id: Uuid,
    reason: &str,
    retried: bool,
) -> ServiceResult<bool> {
    let now = Utc::now();
    if messages::record_delivery_failure(ctx, message_id, reason, now).await? == 0 {
        return Ok(false);
    }
    schedules::mark_failed(ctx, message_id, reason, retried, now).await?;
    Ok(true)
}
