use tone_delivery_service::common::init;
use tone_delivery_service::settings::AppSettings;
use tone_delivery_service::workers::{crons, daemons};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = AppSettings::load_from_env()?;
    init::initialize_logging(&settings);
    match settings.app_component.as_str() {
        "delivery-daemon" => daemons::delivery_scheduler::serve(&settings).await,
        "delivery-cron" => crons::delivery_cron::serve(&settings).await,
        other => anyhow::bail!("Unknown app component: {other}"),
    }
}
