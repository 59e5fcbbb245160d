use crate::modules::ranks::engine::{RoleDelta, compute_role_delta};
use crate::services::store::bounded;
use crate::{Data, Error, Result};
use tracing::{debug, info, warn};

const RANK_REASON: &str = "Invite rank update";

fn collaborator(operation: &'static str) -> impl FnOnce(anyhow::Error) -> Error {
    move |source| Error::Collaborator { operation, source }
}

/// The role delta for a member under the guild's configured ranks and assignment style.
pub async fn role_delta(
    guild_id: u64,
    member_id: u64,
    current_roles: &[u64],
    total_invites: i64,
    data: &Data,
) -> Result<RoleDelta> {
    let (ranks, settings) = bounded("role_delta", Some(guild_id), data.config.store_timeout, async {
        Ok((data.ranks.get(guild_id).await?, data.settings.get(guild_id).await?))
    })
    .await?;

    let delta = compute_role_delta(
        ranks.as_slice(),
        settings.rank_assignment_style,
        current_roles,
        total_invites,
    );
    debug!(guild_id, member_id, total_invites, ?delta, "Computed rank delta");
    Ok(delta)
}

/// Brings a member's rank roles in line with `total_invites` and returns what was applied.
///
/// `None` when the guild has no ranks or the member is no longer in the guild.
pub async fn promote_if_qualified(
    guild_id: u64,
    member_id: u64,
    total_invites: i64,
    data: &Data,
) -> Result<Option<RoleDelta>> {
    let ranks = bounded(
        "promote_if_qualified",
        Some(guild_id),
        data.config.store_timeout,
        data.ranks.get(guild_id),
    )
    .await?;
    if ranks.as_slice().is_empty() {
        return Ok(None);
    }

    let Some(current_roles) = data
        .guild_actions
        .member_roles(guild_id, member_id)
        .await
        .map_err(collaborator("member_roles"))?
    else {
        debug!(guild_id, member_id, "Member is gone, skipping rank update");
        return Ok(None);
    };

    let delta = role_delta(guild_id, member_id, &current_roles, total_invites, data).await?;

    for &role_id in &delta.should_have {
        data.guild_actions
            .add_role(guild_id, member_id, role_id, RANK_REASON)
            .await
            .map_err(collaborator("add_role"))?;
    }
    for &role_id in &delta.should_not_have {
        data.guild_actions
            .remove_role(guild_id, member_id, role_id, RANK_REASON)
            .await
            .map_err(collaborator("remove_role"))?;
    }

    if !delta.is_noop() {
        info!(
            guild_id,
            member_id,
            total_invites,
            added = ?delta.should_have,
            removed = ?delta.should_not_have,
            "Rank roles updated"
        );
    }
    if !delta.dangerous.is_empty() {
        debug!(guild_id, member_id, dangerous = ?delta.dangerous, "Member holds roles outside the rank ladder");
    }

    Ok(Some(delta))
}

/// Reads the member's fresh total and promotes them. Failures are logged, never returned, so the
/// operation that triggered it still succeeds.
pub async fn sync_member_ranks(guild_id: u64, member_id: u64, data: &Data) {
    let result = async {
        let totals = bounded(
            "sync_member_ranks",
            Some(guild_id),
            data.config.store_timeout,
            data.invites.get_one(guild_id, &member_id),
        )
        .await?;
        promote_if_qualified(guild_id, member_id, totals.total, data).await
    }
    .await;

    if let Err(e) = result {
        warn!(guild_id, member_id, error = %e, "Failed to update rank roles");
    }
}
