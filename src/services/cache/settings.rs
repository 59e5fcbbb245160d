use super::GuildCache;
use crate::db::entities::guild_settings::{self, GuildSettings};
use crate::error::Result;
use sea_orm::{DatabaseConnection, EntityTrait};
use tracing::warn;

pub type SettingsCache = GuildCache<GuildSettings>;

pub fn settings_cache(db: DatabaseConnection) -> SettingsCache {
    GuildCache::new("settings", move |guild_id| {
        let db = db.clone();
        async move { load_settings(&db, guild_id).await }
    })
}

/// Missing rows and unreadable JSON both fall back to the defaults.
async fn load_settings(db: &DatabaseConnection, guild_id: u64) -> Result<GuildSettings> {
    let Some(row) = guild_settings::Entity::find_by_id(guild_id as i64).one(db).await? else {
        return Ok(GuildSettings::default());
    };

    Ok(serde_json::from_value(row.value).unwrap_or_else(|e| {
        warn!(guild_id, error = %e, "Stored guild settings are unreadable, using defaults");
        GuildSettings::default()
    }))
}
