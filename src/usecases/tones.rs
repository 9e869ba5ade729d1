use crate::adapters::ToneGenerator;
use crate::common::context::Context;
use crate::common::error::{AppError, ServiceResult};
use crate::models::generation::{GenerationError, GenerationPolicy};
use crate::models::messages::validate_text;
use crate::models::tones::{ToneLabel, TonePrompt, ToneVariants};
use crate::repositories::messages;
use crate::usecases::messages::rejection;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Display names by label for the currently active catalog.
pub fn available_tones<C: Context>(ctx: &C) -> BTreeMap<String, String> {
    ctx.tone_catalog().current().config.available_tones()
}

/// Generates one variant per configured tone and stores the full set on the
/// message. Nothing is written unless every tone succeeded.
pub async fn request_tone_variants<C: Context>(
    ctx: &C,
    message_id: Uuid,
    sender_id: i64,
    text: &str,
) -> ServiceResult<ToneVariants> {
    let text = validate_text(text)?;
    let catalog = ctx.tone_catalog().current();
    let prompts = catalog.config.prompts(text);

    let claimed = messages::mark_processing(ctx, message_id, sender_id, Utc::now()).await?;
    if claimed == 0 {
        return rejection(ctx, message_id, sender_id).await;
    }

    let generated = generate_variants(ctx.tone_generator(), *ctx.generation_policy(), prompts).await;
    let variants = match generated {
        Ok(variants) => variants,
        Err(e) => {
            messages::release_processing(ctx, message_id, Utc::now()).await?;
            warn!(
                message_id = message_id.to_string(),
                catalog_version = catalog.version,
                "Tone generation failed, message returned to draft: {e}"
            );
            return Err(e);
        }
    };

    let stored = messages::set_variants(ctx, message_id, text, &variants.to_stored(), Utc::now()).await?;
    if stored == 0 {
        // released by the stale sweep while generating
        return Err(AppError::MessagesInvalidState);
    }
    info!(
        message_id = message_id.to_string(),
        tones = variants.len(),
        catalog_version = catalog.version,
        "Stored tone variants"
    );
    Ok(variants)
}

/// Fans `prompts` out to the generator, one task per tone, and joins them.
///
/// The first failed unit fails the whole call and the remaining units are
/// aborted. The returned set always holds every prompted tone.
pub async fn generate_variants(
    generator: Arc<dyn ToneGenerator>,
    policy: GenerationPolicy,
    prompts: Vec<TonePrompt>,
) -> ServiceResult<ToneVariants> {
    if prompts.is_empty() {
        return Err(AppError::TonesCatalogEmpty);
    }
    let mut units = JoinSet::new();
    for prompt in prompts {
        units.spawn(generate_one(generator.clone(), policy, prompt));
    }

    match tokio::time::timeout(policy.deadline, join_units(&mut units)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(deadline = ?policy.deadline, "Tone generation deadline exceeded");
            Err(AppError::TonesGenerationTimedOut)
        }
    }
}

type UnitResult = (ToneLabel, Result<String, GenerationError>);

async fn join_units(units: &mut JoinSet<UnitResult>) -> ServiceResult<ToneVariants> {
    let mut variants = Vec::with_capacity(units.len());
    while let Some(unit) = units.join_next().await {
        let (label, result) = unit?;
        match result {
            Ok(text) => variants.push((label, text)),
            Err(e) => {
                warn!(tone = %label, "Tone generation unit failed: {e}");
                return Err(match e {
                    GenerationError::Transient(_) => AppError::TonesGenerationUnavailable,
                    GenerationError::Fatal(_) => AppError::TonesGenerationRejected,
                });
            }
        }
    }
    Ok(variants.into_iter().collect())
}

async fn generate_one(
    generator: Arc<dyn ToneGenerator>,
    policy: GenerationPolicy,
    prompt: TonePrompt,
) -> UnitResult {
    let mut attempt = 1;
    loop {
        let call = generator.generate(&prompt.prompt, &prompt.model);
        let result = match tokio::time::timeout(policy.unit_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Transient(format!(
                "no response within {:?}",
                policy.unit_timeout
            ))),
        };
        match result {
            Err(GenerationError::Transient(reason)) if attempt < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                warn!(tone = %prompt.label, attempt, ?backoff, "Retrying tone generation: {reason}");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            result => return (prompt.label, result),
        }
    }
}
