use crate::db::entities::guild_settings::{self, GuildSettings};
use crate::modules::invite_tracking::recompute;
use crate::services::store::bounded;
use crate::{Data, Error, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{EntityTrait, Set};
use std::sync::Arc;
use tracing::info;

/// Largest threshold or window, in seconds, that still fits a [`chrono::Duration`].
pub const MAX_SECONDS: u64 = (i64::MAX / 1000) as u64;

pub async fn get_settings(guild_id: u64, data: &Data) -> Result<Arc<GuildSettings>> {
    bounded("get_settings", Some(guild_id), data.config.store_timeout, data.settings.get(guild_id)).await
}

/// The role an unmute should lift: `explicit` when given, otherwise the guild's muted role.
pub async fn resolve_muted_role(guild_id: u64, explicit: Option<u64>, data: &Data) -> Result<u64> {
    if let Some(role_id) = explicit {
        return Ok(role_id);
    }
    get_settings(guild_id, data).await?.muted_role.ok_or_else(|| {
        Error::InvalidInput(format!("guild {guild_id} has no muted role; pass one explicitly"))
    })
}

/// Applies `update` to the guild's settings, persists them and re-derives join markers the
/// change affects. Turning a subtraction off clears its markers, since the recompute then finds
/// nothing to mark.
pub async fn update_settings(
    guild_id: u64,
    data: &Data,
    update: impl FnOnce(&mut GuildSettings),
) -> Result<GuildSettings> {
    let before = (*get_settings(guild_id, data).await?).clone();
    let mut after = before.clone();
    update(&mut after);

    // chrono durations stop at i64::MAX milliseconds
    for (field, secs) in [
        ("auto_subtract_leave_threshold", Some(after.auto_subtract_leave_threshold)),
        ("fake_rejoin_window", after.fake_rejoin_window),
    ] {
        if let Some(secs) = secs.filter(|&s| s > MAX_SECONDS) {
            return Err(Error::OutOfRange {
                field,
                value: secs.to_string(),
            });
        }
    }

    if after.fake_rejoin_window == Some(0) {
        return Err(Error::InvalidInput(
            "fake rejoin window must be at least one second".into(),
        ));
    }

    bounded("update_settings", Some(guild_id), data.config.store_timeout, async {
        let model = guild_settings::ActiveModel {
            guild_id: Set(guild_id as i64),
            value: Set(serde_json::to_value(&after)?),
            updated_at: Set(data.now()),
        };

        guild_settings::Entity::insert(model)
            .on_conflict(
                OnConflict::column(guild_settings::Column::GuildId)
                    .update_columns([
                        guild_settings::Column::Value,
                        guild_settings::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&data.db)
            .await?;
        Ok(())
    })
    .await?;

    data.settings.flush(guild_id);
    info!(guild_id, ?after, "Guild settings updated");

    let fakes_changed = before.auto_subtract_fakes != after.auto_subtract_fakes
        || (after.auto_subtract_fakes && before.fake_rejoin_window != after.fake_rejoin_window);
    if fakes_changed {
        recompute::recompute_fakes(guild_id, data).await?;
    }

    let leaves_changed = before.auto_subtract_leaves != after.auto_subtract_leaves
        || (after.auto_subtract_leaves
            && before.auto_subtract_leave_threshold != after.auto_subtract_leave_threshold);
    if leaves_changed {
        recompute::recompute_leaves(guild_id, data).await?;
    }

    Ok(after)
}
