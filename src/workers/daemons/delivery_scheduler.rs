use crate::common::context::Context;
use crate::common::init;
use crate::settings::AppSettings;
use crate::workers::crons::delivery_cron::run_tick;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECOMMENDED_INTERVAL_SECS: std::ops::RangeInclusive<u64> = 30..=300;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Bound on one tick. Work cut off here is picked up by a later tick.
    pub tick_timeout: Duration,
}

/// A running Delivery Scheduler.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the timer and waits up to `drain_timeout` for the in-flight
    /// tick. Returns whether the scheduler stopped cleanly.
    pub async fn stop(mut self, drain_timeout: Duration) -> bool {
        self.shutdown.cancel();
        match tokio::time::timeout(drain_timeout, &mut self.task).await {
            Ok(Ok(())) => {
                info!("Delivery scheduler stopped");
                true
            }
            Ok(Err(e)) => {
                error!("Delivery scheduler task failed: {e}");
                false
            }
            Err(_) => {
                warn!(?drain_timeout, "In-flight delivery tick did not finish in time, aborting");
                self.task.abort();
                false
            }
        }
    }
}

pub fn spawn<C: Context + 'static>(
    ctx: C,
    config: SchedulerConfig,
    shutdown: CancellationToken,
) -> SchedulerHandle {
    let task = tokio::spawn(run(ctx, config, shutdown.clone()));
    SchedulerHandle { shutdown, task }
}

/// Ticks every `config.interval` until `shutdown` is cancelled. Only one tick
/// is ever in flight; a tick that overruns the interval skips the missed
/// ones.
pub async fn run<C: Context>(ctx: C, config: SchedulerConfig, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval = ?config.interval, tick_timeout = ?config.tick_timeout, "Delivery scheduler started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match tokio::time::timeout(config.tick_timeout, run_tick(&ctx)).await {
            Ok(0) => debug!("Delivery tick completed"),
            Ok(failed_tasks) => warn!(failed_tasks, "Delivery tick completed with failures"),
            Err(_) => warn!(
                tick_timeout = ?config.tick_timeout,
                "Delivery tick timed out, remaining work is left for the next tick"
            ),
        }
    }
}

/// Cancels the returned token on SIGINT or SIGTERM.
pub fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let cancel = token.clone();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
            cancel.cancel();
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
        cancel.cancel();
    });

    Ok(token)
}

pub async fn serve(settings: &AppSettings) -> anyhow::Result<()> {
    if !RECOMMENDED_INTERVAL_SECS.contains(&settings.delivery_interval.as_secs()) {
        warn!(
            interval = ?settings.delivery_interval,
            "DELIVERY_INTERVAL_SECS is outside the recommended 30-300 range"
        );
    }
    let ctx = init::initialize_state(settings).await?;
    let shutdown = install_signal_handler()?;
    let config = SchedulerConfig {
        interval: settings.delivery_interval,
        tick_timeout: settings.delivery_tick_timeout,
    };
    let scheduler = spawn(ctx, config, shutdown.clone());
    shutdown.cancelled().await;
    if !scheduler.stop(settings.shutdown_timeout).await {
        anyhow::bail!("delivery scheduler did not shut down cleanly");
    }
    Ok(())
}
