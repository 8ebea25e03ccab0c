pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod import;
pub mod logging;
pub mod upstream;
pub mod validation;

use std::sync::Arc;

use config::AppConfig;
use db::models::CharacterIdentity;
use db::DbPool;
use engine::background::SchedulerState;
use engine::collector::RunCollector;
use engine::subscription::{spawn_subscriptions, ReactiveSubscription, SyncSubscription};
use error::AppError;
use upstream::blizzard::BlizzardClient;
use upstream::raiderio::RaiderIoClient;

/// Shared services handed to the bot's command layer.
pub struct AppState {
    pub db: DbPool,
    pub collector: Arc<RunCollector>,
    pub scheduler: Arc<SchedulerState>,
    pub roster: Arc<Vec<CharacterIdentity>>,
}

impl AppState {
    /// Open the store and wire the collector to the real upstream clients.
    pub fn build(config: &AppConfig) -> Result<Self, AppError> {
        let pool = db::init_db(&config.data_dir)?;

        let profiles = Arc::new(RaiderIoClient::new(
            config.raiderio_base_url.clone(),
            config.raiderio_api_key.clone(),
        )?);
        let mut collector = RunCollector::new(pool.clone(), profiles).with_character_delay(config.character_delay);
        match config.blizzard {
            Some(ref creds) => {
                let blizzard = BlizzardClient::new(creds.client_id.clone(), creds.client_secret.clone())?;
                collector = collector.with_spec_source(Arc::new(blizzard));
            }
            None => tracing::warn!("Blizzard credentials not set, runs will use the character's current spec"),
        }

        Ok(Self {
            db: pool,
            collector: Arc::new(collector),
            scheduler: Arc::new(SchedulerState::new()),
            roster: Arc::new(config.roster.clone()),
        })
    }
}

/// Load config, start the periodic sync and run until Ctrl-C.
pub async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let _log_guard = logging::init(&config.data_dir.join("logs"))?;
    logging::install_crash_hook(&config.data_dir);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        characters = config.roster.len(),
        "Starting mplus-ledger"
    );

    let state = AppState::build(&config)?;
    let subscriptions: Vec<Box<dyn ReactiveSubscription>> = vec![Box::new(SyncSubscription::new(
        state.scheduler.clone(),
        state.collector.clone(),
        state.roster.clone(),
        config.sync_interval,
        config.sync_initial_delay,
    ))];
    let handles = spawn_subscriptions(subscriptions, state.scheduler.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    state.scheduler.stop();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Subscription task failed: {}", e);
        }
    }

    let stats = state.scheduler.stats();
    tracing::info!(
        passes_run = stats.passes_run,
        passes_skipped = stats.passes_skipped,
        runs_added = stats.runs_added,
        "Stopped"
    );
    Ok(())
}
