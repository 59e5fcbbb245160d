use crate::db::entities::joins::{self, InvalidatedReason};
use crate::db::entities::{invite_codes, leaves};
use crate::modules::invite_tracking::recompute;
use crate::modules::invite_tracking::tracking::{self, JoinMatch};
use crate::modules::ranks::promotion;
use crate::services::gateway::InviteSnapshot;
use crate::services::registry;
use crate::services::store::bounded;
use crate::{Data, Error, Result};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{OnConflict, Query};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Events the gateway collaborator hands to the tracking core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    MemberJoin {
        guild_id: u64,
        member_id: u64,
        #[serde(default)]
        name: Option<String>,
        joined_at: DateTime<Utc>,
    },
    MemberLeave {
        guild_id: u64,
        member_id: u64,
        #[serde(default)]
        name: Option<String>,
        left_at: DateTime<Utc>,
    },
    InviteCreate {
        guild_id: u64,
        invite: InviteSnapshot,
    },
    InviteDelete {
        guild_id: u64,
        code: String,
    },
    GuildCreate {
        guild_id: u64,
        name: String,
        member_count: i32,
    },
    GuildDelete {
        guild_id: u64,
    },
}

impl GatewayEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            GatewayEvent::MemberJoin { guild_id, .. }
            | GatewayEvent::MemberLeave { guild_id, .. }
            | GatewayEvent::InviteCreate { guild_id, .. }
            | GatewayEvent::InviteDelete { guild_id, .. }
            | GatewayEvent::GuildCreate { guild_id, .. }
            | GatewayEvent::GuildDelete { guild_id } => *guild_id,
        }
    }

    pub fn member_id(&self) -> Option<u64> {
        match self {
            GatewayEvent::MemberJoin { member_id, .. }
            | GatewayEvent::MemberLeave { member_id, .. } => Some(*member_id),
            _ => None,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            GatewayEvent::MemberJoin { .. } => "member_join",
            GatewayEvent::MemberLeave { .. } => "member_leave",
            GatewayEvent::InviteCreate { .. } => "invite_create",
            GatewayEvent::InviteDelete { .. } => "invite_delete",
            GatewayEvent::GuildCreate { .. } => "guild_create",
            GatewayEvent::GuildDelete { .. } => "guild_delete",
        }
    }
}

/// A stored join and how it was attributed.
#[derive(Debug, Clone)]
pub struct JoinRecord {
    pub join: joins::Model,
    pub matched: JoinMatch,
    /// The event had already been recorded; nothing changed.
    pub duplicate: bool,
}

#[derive(Debug, Clone)]
pub struct LeaveRecord {
    pub leave: leaves::Model,
    pub join: joins::Model,
    pub duplicate: bool,
}

/// Handles one event. Transient failures are retried with exponential backoff, up to
/// `event_attempts` tries; whatever still fails is logged and swallowed so the event loop keeps
/// going. Joins and leaves are de-duplicated, so a retry never counts twice.
pub async fn dispatch(event: &GatewayEvent, data: &Data) {
    let attempts = data.config.event_attempts.max(1);
    let mut delay = data.config.event_retry_backoff;

    for attempt in 1..=attempts {
        let Err(e) = handle_event(event, data).await else {
            return;
        };

        if e.is_transient() && attempt < attempts {
            warn!(
                guild_id = event.guild_id(),
                member_id = ?event.member_id(),
                operation = event.operation(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying gateway event: {}",
                e
            );
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
            continue;
        }

        error!(
            guild_id = event.guild_id(),
            member_id = ?event.member_id(),
            operation = event.operation(),
            transient = e.is_transient(),
            attempt,
            "Failed to handle gateway event: {}",
            e
        );
        return;
    }
}

async fn handle_event(event: &GatewayEvent, data: &Data) -> Result<()> {
    match event {
        GatewayEvent::MemberJoin {
            guild_id,
            member_id,
            name,
            joined_at,
        } => {
            on_member_join(*guild_id, *member_id, name.as_deref(), *joined_at, data).await?;
        }
        GatewayEvent::MemberLeave {
            guild_id,
            member_id,
            name,
            left_at,
        } => {
            on_member_leave(*guild_id, *member_id, name.as_deref(), *left_at, data).await?;
        }
        GatewayEvent::InviteCreate { guild_id, invite } => {
            on_invite_create(*guild_id, invite, data).await?;
        }
        GatewayEvent::InviteDelete { guild_id, code } => {
            on_invite_delete(*guild_id, code, data).await?;
        }
        GatewayEvent::GuildCreate {
            guild_id,
            name,
            member_count,
        } => {
            registry::upsert_guild(&data.db, *guild_id, name, *member_count, data.now()).await?;
            data.counts.invalidate().await;
        }
        GatewayEvent::GuildDelete { guild_id } => {
            registry::remove_guild(&data.db, *guild_id, data.now()).await?;
            data.counts.invalidate().await;
        }
    }

    Ok(())
}

async fn find_join<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    member_id: u64,
    created_at: DateTimeWithTimeZone,
) -> Result<Option<joins::Model>> {
    Ok(joins::Entity::find()
        .filter(joins::Column::GuildId.eq(guild_id as i64))
        .filter(joins::Column::MemberId.eq(member_id as i64))
        .filter(joins::Column::CreatedAt.eq(created_at))
        .one(db)
        .await?)
}

async fn inviter_of<C: ConnectionTrait>(db: &C, code: Option<&str>) -> Result<Option<u64>> {
    let Some(code) = code else {
        return Ok(None);
    };
    Ok(invite_codes::Entity::find_by_id(code.to_string())
        .one(db)
        .await?
        .and_then(|c| c.inviter_id)
        .map(|id| id as u64))
}

/// Rebuilds the attribution of a join that is already stored.
async fn stored_match<C: ConnectionTrait>(db: &C, join: &joins::Model) -> Result<JoinMatch> {
    if let Some(code) = &join.exact_match_code {
        return Ok(JoinMatch::Exact {
            code: code.clone(),
            inviter_id: inviter_of(db, Some(code)).await?,
        });
    }

    let candidates = join.possible_matches();
    Ok(if candidates.is_empty() {
        JoinMatch::Unmatched
    } else {
        JoinMatch::Ambiguous { candidates }
    })
}

/// Attributes a join to an invite code and records it.
///
/// Redelivery of the same `(guild, member, joined_at)` returns the stored join untouched.
pub async fn on_member_join(
    guild_id: u64,
    member_id: u64,
    name: Option<&str>,
    joined_at: DateTime<Utc>,
    data: &Data,
) -> Result<JoinRecord> {
    let record = bounded(
        "member_join",
        Some(guild_id),
        data.config.store_timeout,
        record_join(guild_id, member_id, name, joined_at, data),
    )
    .await?;

    if !record.duplicate {
        if let Some(inviter_id) = record.matched.inviter_id() {
            promotion::sync_member_ranks(guild_id, inviter_id, data).await;
        }
    }

    Ok(record)
}

async fn record_join(
    guild_id: u64,
    member_id: u64,
    name: Option<&str>,
    joined_at: DateTime<Utc>,
    data: &Data,
) -> Result<JoinRecord> {
    let joined_at: DateTimeWithTimeZone = joined_at.into();

    if let Some(join) = find_join(&data.db, guild_id, member_id, joined_at).await? {
        debug!(guild_id, member_id, join_id = join.id, "Join already recorded");
        let matched = stored_match(&data.db, &join).await?;
        return Ok(JoinRecord {
            join,
            matched,
            duplicate: true,
        });
    }

    let settings = data.settings.get(guild_id).await?;

    let known = invite_codes::Entity::find()
        .filter(invite_codes::Column::GuildId.eq(guild_id as i64))
        .all(&data.db)
        .await?;

    let current = data
        .invite_source
        .list_invite_codes(guild_id)
        .await
        .map_err(|source| Error::Collaborator {
            operation: "list_invite_codes",
            source,
        })?;

    let deltas = tracking::compute_deltas(&known, &current);
    let matched = tracking::resolve_match(&deltas);
    let consumed: Vec<String> = deltas
        .iter()
        .filter(|d| d.consumed)
        .map(|d| d.code.clone())
        .collect();
    let now = data.now();

    let txn = data.db.begin().await?;

    tracking::sync_codes(&txn, guild_id, &known, &current, &consumed, now).await?;
    registry::upsert_member(&txn, member_id, name, now).await?;

    let inserted = joins::Entity::insert(joins::ActiveModel {
        guild_id: Set(guild_id as i64),
        member_id: Set(member_id as i64),
        exact_match_code: Set(matched.exact_code().map(str::to_string)),
        possible_matches: Set(serde_json::to_value(matched.candidates())?),
        invalidated_reason: Set(None),
        cleared: Set(false),
        created_at: Set(joined_at),
        deleted_at: Set(None),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::columns([
            joins::Column::GuildId,
            joins::Column::MemberId,
            joins::Column::CreatedAt,
        ])
        .do_nothing()
        .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;

    if inserted > 0 {
        registry::adjust_member_count(&txn, guild_id, 1).await?;
    }

    if inserted > 0 && matched.exact_code().is_some() && settings.auto_subtract_fakes {
        recompute::apply_fake_rule(
            &txn,
            guild_id,
            Some(member_id),
            true,
            settings.fake_rejoin_window,
        )
        .await?;
    }

    let join = find_join(&txn, guild_id, member_id, joined_at)
        .await?
        .ok_or_else(|| Error::not_found("join", format!("{guild_id}/{member_id}")))?;

    txn.commit().await?;
    data.invites.flush(guild_id);

    match &matched {
        JoinMatch::Exact { code, inviter_id } => info!(
            guild_id,
            member_id,
            code = %code,
            inviter_id = ?inviter_id,
            "Join attributed"
        ),
        JoinMatch::Ambiguous { candidates } => warn!(
            guild_id,
            member_id,
            ?candidates,
            "Join matches several invite codes, leaving it unresolved"
        ),
        JoinMatch::Unmatched => warn!(guild_id, member_id, "Join matches no invite code"),
    }

    Ok(JoinRecord {
        join,
        matched,
        duplicate: inserted == 0,
    })
}

/// Links a departure to the member's latest join that has no leave yet and applies the leave
/// threshold to it. `None` when there is no such join.
pub async fn on_member_leave(
    guild_id: u64,
    member_id: u64,
    name: Option<&str>,
    left_at: DateTime<Utc>,
    data: &Data,
) -> Result<Option<LeaveRecord>> {
    let record = bounded(
        "member_leave",
        Some(guild_id),
        data.config.store_timeout,
        record_leave(guild_id, member_id, name, left_at, data),
    )
    .await?;

    if let Some(record) = record.as_ref().filter(|r| !r.duplicate) {
        let inviter = bounded(
            "member_leave",
            Some(guild_id),
            data.config.store_timeout,
            inviter_of(&data.db, record.join.exact_match_code.as_deref()),
        )
        .await?;
        if let Some(inviter_id) = inviter {
            promotion::sync_member_ranks(guild_id, inviter_id, data).await;
        }
    }

    Ok(record)
}

async fn record_leave(
    guild_id: u64,
    member_id: u64,
    name: Option<&str>,
    left_at: DateTime<Utc>,
    data: &Data,
) -> Result<Option<LeaveRecord>> {
    let guild = guild_id as i64;
    let member = member_id as i64;
    let left_at: DateTimeWithTimeZone = left_at.into();

    let existing = leaves::Entity::find()
        .find_also_related(joins::Entity)
        .filter(leaves::Column::GuildId.eq(guild))
        .filter(leaves::Column::MemberId.eq(member))
        .filter(leaves::Column::CreatedAt.eq(left_at))
        .one(&data.db)
        .await?;
    if let Some((leave, Some(join))) = existing {
        debug!(guild_id, member_id, leave_id = leave.id, "Leave already recorded");
        return Ok(Some(LeaveRecord {
            leave,
            join,
            duplicate: true,
        }));
    }

    let settings = data.settings.get(guild_id).await?;
    let txn = data.db.begin().await?;

    let join = joins::Entity::find()
        .filter(joins::Column::GuildId.eq(guild))
        .filter(joins::Column::MemberId.eq(member))
        .filter(joins::Column::DeletedAt.is_null())
        .filter(joins::Column::CreatedAt.lte(left_at))
        .filter(
            joins::Column::Id.not_in_subquery(
                Query::select()
                    .column(leaves::Column::JoinId)
                    .from(leaves::Entity)
                    .and_where(leaves::Column::GuildId.eq(guild))
                    .and_where(leaves::Column::MemberId.eq(member))
                    .to_owned(),
            ),
        )
        .order_by_desc(joins::Column::CreatedAt)
        .order_by_desc(joins::Column::Id)
        .one(&txn)
        .await?;

    let Some(join) = join else {
        debug!(guild_id, member_id, "No open join on record for leaving member");
        return Ok(None);
    };

    let inserted = leaves::Entity::insert(leaves::ActiveModel {
        guild_id: Set(guild),
        member_id: Set(member),
        join_id: Set(join.id),
        created_at: Set(left_at),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::columns([
            leaves::Column::GuildId,
            leaves::Column::MemberId,
            leaves::Column::JoinId,
        ])
        .do_nothing()
        .to_owned(),
    )
    .exec_without_returning(&txn)
    .await?;
    if inserted > 0 {
        registry::adjust_member_count(&txn, guild_id, -1).await?;
    }

    if settings.auto_subtract_leaves {
        let early = recompute::left_too_early(
            join.created_at,
            left_at,
            recompute::seconds(settings.auto_subtract_leave_threshold),
        );
        let reason = match (join.invalidated_reason, early) {
            (None, true) => Some(Some(InvalidatedReason::Leave)),
            (Some(InvalidatedReason::Leave), false) => Some(None),
            _ => None,
        };
        if let Some(reason) = reason {
            joins::Entity::update_many()
                .set(joins::ActiveModel {
                    invalidated_reason: Set(reason),
                    ..Default::default()
                })
                .filter(joins::Column::Id.eq(join.id))
                .exec(&txn)
                .await?;
        }
    }

    registry::upsert_member(&txn, member_id, name, data.now()).await?;

    let leave = leaves::Entity::find()
        .filter(leaves::Column::JoinId.eq(join.id))
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("leave", format!("{guild_id}/{member_id}")))?;
    let join = joins::Entity::find_by_id(join.id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("join", join.id))?;

    txn.commit().await?;
    data.invites.flush(guild_id);

    info!(
        guild_id,
        member_id,
        join_id = join.id,
        invalidated = ?join.invalidated_reason,
        "Leave recorded"
    );

    Ok(Some(LeaveRecord {
        leave,
        join,
        duplicate: false,
    }))
}

pub async fn on_invite_create(guild_id: u64, invite: &InviteSnapshot, data: &Data) -> Result<()> {
    bounded("invite_create", Some(guild_id), data.config.store_timeout, async {
        tracking::upsert_codes(&data.db, guild_id, std::slice::from_ref(invite), data.now()).await
    })
    .await?;

    // The code's inviter feeds the totals
    data.invites.flush(guild_id);
    info!(guild_id, code = %invite.code, "Invite code created");
    Ok(())
}

pub async fn on_invite_delete(guild_id: u64, code: &str, data: &Data) -> Result<()> {
    let retired = bounded("invite_delete", Some(guild_id), data.config.store_timeout, async {
        tracking::retire_codes(&data.db, guild_id, &[code.to_string()], data.now()).await
    })
    .await?;

    if retired == 0 {
        debug!(guild_id, code, "Deleted invite code was not tracked");
    } else {
        info!(guild_id, code, "Invite code deleted");
    }
    Ok(())
}
