use color_eyre::Result;
use log::{info, warn};

mod checker;
mod config;
mod diff;
mod logging;
mod notify;
mod source;
mod storage;

use checker::Checker;
use config::{Env, Settings};
use notify::DiscordWebhook;
use source::StoreClient;
use storage::HistoryStore;

fn main() -> Result<()> {
    color_eyre::install()?;
    let env = Env::load()?;
    logging::init(&env.log_path);

    info!("Starting Steam price check");

    let settings = Settings::load(&env.config_path);
    info!("Region: {}", settings.region);
    info!("Language: {}", settings.language);
    info!(
        "Watching {} apps, notifying at -{}% or more",
        settings.apps.len(),
        settings.threshold()
    );

    let source = StoreClient::new(&env.user_agent, &settings.region, &settings.language)?;
    let sink = DiscordWebhook::new(env.discord_webhook_url)?;
    if !sink.is_configured() {
        warn!("DISCORD_WEBHOOK_URL is not set, deals will only be logged");
    }
    let store = HistoryStore::new(env.history_path);

    let summary = Checker::new(&settings, &source, &sink, &store).run();
    summary.log_report();

    info!(
        "Next check expected in about {}h",
        settings.check_interval_hours
    );
    Ok(())
}
