use crate::common::context::Context;
use crate::common::error::{AppError, ServiceResult};
use crate::entities::messages::CreateMessageArgs;
use crate::models::messages::{Message, Page, Paged, validate_text};
use crate::models::tones::ToneLabel;
use crate::repositories::messages;
use crate::usecases::delivery;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Turns a zero-row conditional update into the error the caller should see:
/// not found when the message is invisible to `user_id`, otherwise a state
/// conflict.
pub(crate) async fn rejection<C: Context, T>(
    ctx: &C,
    message_id: Uuid,
    user_id: i64,
) -> ServiceResult<T> {
    let Some(message) = messages::fetch_one(ctx, message_id).await? else {
        return Err(AppError::MessagesNotFound);
    };
    match Message::try_from(message)?.is_visible_to(user_id) {
        true => Err(AppError::MessagesInvalidState),
        false => Err(AppError::MessagesNotFound),
    }
}

/// Validates the text chosen for sending and the tone it came from.
pub(crate) fn resolve_final_text<'a, C: Context>(
    ctx: &C,
    final_text: &'a str,
    tone: Option<&str>,
) -> ServiceResult<(&'a str, Option<ToneLabel>)> {
    if final_text.trim().is_empty() {
        return Err(AppError::MessagesMissingFinalText);
    }
    let final_text = validate_text(final_text)?;
    let tone = match tone {
        None => None,
        Some(tone) => {
            let catalog = ctx.tone_catalog().current();
            let label = catalog.config.label(tone).ok_or(AppError::TonesUnknown)?;
            Some(label.clone())
        }
    };
    Ok((final_text, tone))
}

pub async fn create_draft<C: Context>(ctx: &C, sender_id: i64, text: &str) -> ServiceResult<Message> {
    let original_text = validate_text(text)?;
    let args = CreateMessageArgs {
        sender_id,
        recipient_id: None,
        original_text,
    };
    let message = Message::try_from(messages::create(ctx, args).await?)?;
    info!(
        message_id = message.message_id.to_string(),
        sender_id, "Created draft message"
    );
    Ok(message)
}

pub async fn fetch_one<C: Context>(ctx: &C, message_id: Uuid, user_id: i64) -> ServiceResult<Message> {
    let message = messages::fetch_one(ctx, message_id)
        .await?
        .ok_or(AppError::MessagesNotFound)?;
    let message = Message::try_from(message)?;
    match message.is_visible_to(user_id) {
        true => Ok(message),
        false => Err(AppError::MessagesNotFound),
    }
}

pub async fn fetch_received<C: Context>(ctx: &C, recipient_id: i64) -> ServiceResult<Vec<Message>> {
    let received = messages::fetch_received(ctx, recipient_id).await?;
    let received = received
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(received)
}

/// The sender's drafts, most recently edited first.
pub async fn fetch_drafts<C: Context>(ctx: &C, sender_id: i64, page: Page) -> ServiceResult<Paged<Message>> {
    let total = messages::count_drafts(ctx, sender_id).await?;
    let drafts = messages::fetch_drafts(ctx, sender_id, i64::from(page.limit), page.offset()).await?;
    let items = drafts
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Paged {
        items,
        page: page.page,
        limit: page.limit,
        total,
    })
}

/// Everything the sender has scheduled or sent, newest hand-off first.
pub async fn fetch_sent<C: Context>(ctx: &C, sender_id: i64, page: Page) -> ServiceResult<Paged<Message>> {
    let total = messages::count_sent(ctx, sender_id).await?;
    let sent = messages::fetch_sent(ctx, sender_id, i64::from(page.limit), page.offset()).await?;
    let items = sent
        .into_iter()
        .map(Message::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Paged {
        items,
        page: page.page,
        limit: page.limit,
        total,
    })
}

pub async fn set_recipient<C: Context>(
    ctx: &C,
    message_id: Uuid,
    sender_id: i64,
    recipient_id: i64,
) -> ServiceResult<Message> {
    let updated = messages::set_recipient(ctx, message_id, sender_id, recipient_id, Utc::now()).await?;
    if updated == 0 {
        return rejection(ctx, message_id, sender_id).await;
    }
    fetch_one(ctx, message_id, sender_id).await
}

pub async fn delete_draft<C: Context>(ctx: &C, message_id: Uuid, sender_id: i64) -> ServiceResult<()> {
    let deleted = messages::delete_draft(ctx, message_id, sender_id).await?;
    if deleted == 0 {
        return rejection(ctx, message_id, sender_id).await;
    }
    info!(message_id = message_id.to_string(), "Deleted draft message");
    Ok(())
}

pub async fn mark_read<C: Context>(ctx: &C, message_id: Uuid, recipient_id: i64) -> ServiceResult<()> {
    let updated = messages::mark_read(ctx, message_id, recipient_id, Utc::now()).await?;
    if updated == 0 {
        return rejection(ctx, message_id, recipient_id).await;
    }
    Ok(())
}

/// Sends a draft right away and runs the same hand-off step as the
/// scheduler.
pub async fn send_now<C: Context>(
    ctx: &C,
    message_id: Uuid,
    sender_id: i64,
    final_text: &str,
    tone: Option<&str>,
) -> ServiceResult<Message> {
    let (final_text, tone) = resolve_final_text(ctx, final_text, tone)?;
    let claim_token = Uuid::new_v4();
    let tone = tone.as_ref().map(ToneLabel::as_str);
    let claimed = messages::send(ctx, message_id, sender_id, final_text, tone, claim_token, Utc::now()).await?;
    if claimed == 0 {
        return rejection(ctx, message_id, sender_id).await;
    }
    info!(message_id = message_id.to_string(), "Message sent");
    for message in messages::fetch_claimed(ctx, claim_token).await? {
        delivery::hand_off(ctx, Message::try_from(message)?).await;
    }
    fetch_one(ctx, message_id, sender_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::testing::test_state;
    use crate::models::messages::MessageStatus;

    #[tokio::test]
    async fn drafts_are_private_to_the_sender() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "  I can't make it.  ").await.unwrap();
        assert_eq!(draft.status, MessageStatus::Draft);
        assert_eq!(draft.original_text, "I can't make it.");
        assert!(draft.variants.is_empty());

        set_recipient(&ctx, draft.message_id, 1, 2).await.unwrap();
        assert!(fetch_one(&ctx, draft.message_id, 1).await.is_ok());
        assert_eq!(
            fetch_one(&ctx, draft.message_id, 2).await.unwrap_err(),
            AppError::MessagesNotFound
        );
    }

    #[tokio::test]
    async fn drafts_and_sent_messages_are_listed_per_sender() {
        let ctx = test_state().await;
        let first = create_draft(&ctx, 1, "first").await.unwrap();
        create_draft(&ctx, 1, "second").await.unwrap();
        create_draft(&ctx, 1, "third").await.unwrap();
        create_draft(&ctx, 2, "someone else's").await.unwrap();
        send_now(&ctx, first.message_id, 1, "First!", None).await.unwrap();

        let drafts = fetch_drafts(&ctx, 1, Page::new(Some(1), Some(1))).await.unwrap();
        assert_eq!(drafts.total, 2);
        assert_eq!(drafts.items.len(), 1);
        assert_eq!(drafts.items[0].status, MessageStatus::Draft);
        let rest = fetch_drafts(&ctx, 1, Page::new(Some(2), Some(1))).await.unwrap();
        assert_ne!(rest.items[0].message_id, drafts.items[0].message_id);

        let sent = fetch_sent(&ctx, 1, Page::default()).await.unwrap();
        assert_eq!(sent.total, 1);
        assert_eq!(sent.items[0].message_id, first.message_id);
        assert!(fetch_sent(&ctx, 2, Page::default()).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn only_the_sender_can_delete_a_draft() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "hello").await.unwrap();
        assert_eq!(
            delete_draft(&ctx, draft.message_id, 9).await,
            Err(AppError::MessagesNotFound)
        );
        delete_draft(&ctx, draft.message_id, 1).await.unwrap();
        assert_eq!(
            fetch_one(&ctx, draft.message_id, 1).await.unwrap_err(),
            AppError::MessagesNotFound
        );
    }

    #[tokio::test]
    async fn send_now_hands_off_and_is_read_by_the_recipient() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "hello").await.unwrap();
        set_recipient(&ctx, draft.message_id, 1, 2).await.unwrap();

        let sent = send_now(&ctx, draft.message_id, 1, "Hello there!", Some("gentle"))
            .await
            .unwrap();
        assert_eq!(sent.status, MessageStatus::Delivered);
        assert_eq!(sent.final_text.as_deref(), Some("Hello there!"));
        assert_eq!(sent.selected_tone.as_ref().map(ToneLabel::as_str), Some("gentle"));
        assert_eq!(sent.delivery_attempts, 1);

        // sending twice is a state conflict, not a second hand-off
        assert_eq!(
            send_now(&ctx, draft.message_id, 1, "again", None).await.unwrap_err(),
            AppError::MessagesInvalidState
        );
        // drafts can no longer be removed once sent
        assert_eq!(
            delete_draft(&ctx, draft.message_id, 1).await,
            Err(AppError::MessagesInvalidState)
        );

        let inbox = fetch_received(&ctx, 2).await.unwrap();
        assert_eq!(inbox.len(), 1);
        mark_read(&ctx, draft.message_id, 2).await.unwrap();
        let read = fetch_one(&ctx, draft.message_id, 2).await.unwrap();
        assert_eq!(read.status, MessageStatus::Read);
        assert!(read.read_at.is_some());
        assert_eq!(
            mark_read(&ctx, draft.message_id, 2).await,
            Err(AppError::MessagesInvalidState)
        );
    }

    #[tokio::test]
    async fn send_now_requires_a_final_text_and_a_known_tone() {
        let ctx = test_state().await;
        let draft = create_draft(&ctx, 1, "hello").await.unwrap();
        assert_eq!(
            send_now(&ctx, draft.message_id, 1, "  ", None).await.unwrap_err(),
            AppError::MessagesMissingFinalText
        );
        assert_eq!(
            send_now(&ctx, draft.message_id, 1, "hi", Some("sarcastic")).await.unwrap_err(),
            AppError::TonesUnknown
        );
        let unchanged = fetch_one(&ctx, draft.message_id, 1).await.unwrap();
        assert_eq!(unchanged.status, MessageStatus::Draft);
    }
}
