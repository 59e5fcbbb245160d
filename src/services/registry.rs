use crate::db::entities::{guilds, members};
use crate::error::Result;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::debug;

/// Records a member. A known name overwrites the stored one; without a name an existing row is
/// left alone.
pub async fn upsert_member<C: ConnectionTrait>(
    db: &C,
    member_id: u64,
    name: Option<&str>,
    now: DateTimeWithTimeZone,
) -> Result<()> {
    let model = members::ActiveModel {
        id: Set(member_id as i64),
        name: Set(name.map(str::to_string).unwrap_or_else(|| member_id.to_string())),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let on_conflict = match name {
        Some(_) => OnConflict::column(members::Column::Id)
            .update_columns([members::Column::Name, members::Column::UpdatedAt])
            .to_owned(),
        None => OnConflict::column(members::Column::Id).do_nothing().to_owned(),
    };

    members::Entity::insert(model)
        .on_conflict(on_conflict)
        .exec_without_returning(db)
        .await?;

    Ok(())
}

/// Records a guild the service is active in, reviving it if it was removed.
pub async fn upsert_guild<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    name: &str,
    member_count: i32,
    now: DateTimeWithTimeZone,
) -> Result<()> {
    let model = guilds::ActiveModel {
        id: Set(guild_id as i64),
        name: Set(name.to_string()),
        member_count: Set(member_count.max(0)),
        created_at: Set(now),
        deleted_at: Set(None),
    };

    guilds::Entity::insert(model)
        .on_conflict(
            OnConflict::column(guilds::Column::Id)
                .update_columns([
                    guilds::Column::Name,
                    guilds::Column::MemberCount,
                    guilds::Column::DeletedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    debug!(guild_id, member_count, "Guild registered");
    Ok(())
}

/// Moves an active guild's member count by `delta` between `GuildCreate` snapshots. The count
/// never drops below zero; unknown or removed guilds are left alone.
pub async fn adjust_member_count<C: ConnectionTrait>(db: &C, guild_id: u64, delta: i32) -> Result<()> {
    let mut update = guilds::Entity::update_many()
        .col_expr(
            guilds::Column::MemberCount,
            Expr::col(guilds::Column::MemberCount).add(delta),
        )
        .filter(guilds::Column::Id.eq(guild_id as i64))
        .filter(guilds::Column::DeletedAt.is_null());
    if delta < 0 {
        update = update.filter(guilds::Column::MemberCount.gte(delta.saturating_neg()));
    }
    update.exec(db).await?;

    Ok(())
}

pub async fn remove_guild<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    now: DateTimeWithTimeZone,
) -> Result<()> {
    guilds::Entity::update_many()
        .col_expr(guilds::Column::DeletedAt, Expr::value(now))
        .filter(guilds::Column::Id.eq(guild_id as i64))
        .filter(guilds::Column::DeletedAt.is_null())
        .exec(db)
        .await?;

    debug!(guild_id, "Guild removed");
    Ok(())
}
