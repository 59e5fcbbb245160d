pub mod config;
pub mod db;
pub mod error;
pub mod modules;
pub mod services;

use config::AppConfig;
use sea_orm::DatabaseConnection;
use services::cache::{InvitesCache, RanksCache, SettingsCache};
use services::clock::Clock;
use services::counts::CountsCache;
use services::gateway::{GuildActions, InviteSource};
use services::scheduler::SchedulerService;
use std::sync::Arc;

pub use error::{Error, Result};

// Shared state handed to every operation
pub struct Data {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub invites: Arc<InvitesCache>,
    pub ranks: Arc<RanksCache>,
    pub settings: Arc<SettingsCache>,
    pub counts: Arc<CountsCache>,
    pub scheduler: Arc<SchedulerService>,
    pub invite_source: Arc<dyn InviteSource>,
    pub guild_actions: Arc<dyn GuildActions>,
}

impl Data {
    pub fn new(
        db: DatabaseConnection,
        config: AppConfig,
        invite_source: Arc<dyn InviteSource>,
        guild_actions: Arc<dyn GuildActions>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scheduler = Arc::new(SchedulerService::new(
            db.clone(),
            guild_actions.clone(),
            clock.clone(),
            config.scheduler_max_attempts,
            config.scheduler_batch_size,
            config.store_timeout,
        ));

        let counts = Arc::new(CountsCache::new(
            db.clone(),
            clock.clone(),
            config.counts_staleness,
            config.store_timeout,
        ));

        Self {
            invites: Arc::new(services::cache::invites::invites_cache(db.clone())),
            ranks: Arc::new(services::cache::ranks::ranks_cache(db.clone())),
            settings: Arc::new(services::cache::settings::settings_cache(db.clone())),
            counts,
            scheduler,
            db,
            config,
            clock,
            invite_source,
            guild_actions,
        }
    }

    /// Current time as stored in timestamp columns.
    pub(crate) fn now(&self) -> sea_orm::prelude::DateTimeWithTimeZone {
        self.clock.now().into()
    }
}
