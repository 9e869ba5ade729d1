use crate::common::context::Context;
use crate::common::init;
use crate::cron_tasks;
use crate::settings::AppSettings;
use crate::usecases::delivery::{deliver_due, reconcile, retry_stale};

/// One scheduler pass: due deliveries, the retry re-scan, then
/// reconciliation. Returns the number of tasks that failed.
pub async fn run_tick<C: Context>(ctx: &C) -> usize {
    cron_tasks! {
        ctx,
        deliver_due,
        retry_stale,
        reconcile,
    }
}

pub async fn serve(settings: &AppSettings) -> anyhow::Result<()> {
    let ctx = init::initialize_state(settings).await?;
    let failed_tasks = run_tick(&ctx).await;
    if failed_tasks > 0 {
        anyhow::bail!("{failed_tasks} delivery task(s) failed");
    }
    Ok(())
}
