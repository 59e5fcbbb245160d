use crate::db::entities::ranks;
use crate::modules::ranks::engine::Rank;
use crate::services::store::bounded;
use crate::{Data, Error, Result};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use tracing::info;

/// Creates or updates the rank for `role_id`. A removed rank for the same role comes back.
pub async fn add_rank(
    guild_id: u64,
    role_id: u64,
    num_invites: i64,
    description: Option<String>,
    data: &Data,
) -> Result<Rank> {
    let threshold = i32::try_from(num_invites)
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::OutOfRange {
            field: "num_invites",
            value: num_invites.to_string(),
        })?;

    bounded("add_rank", Some(guild_id), data.config.store_timeout, async {
        ranks::Entity::insert(ranks::ActiveModel {
            guild_id: Set(guild_id as i64),
            role_id: Set(role_id as i64),
            num_invites: Set(threshold),
            description: Set(description.clone()),
            created_at: Set(data.now()),
            deleted_at: Set(None),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::columns([ranks::Column::GuildId, ranks::Column::RoleId])
                .update_columns([
                    ranks::Column::NumInvites,
                    ranks::Column::Description,
                    ranks::Column::DeletedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(&data.db)
        .await?;
        Ok(())
    })
    .await?;

    data.ranks.flush(guild_id);
    info!(guild_id, role_id, num_invites, "Rank saved");

    Ok(Rank {
        role_id,
        num_invites,
        description,
    })
}

pub async fn remove_rank(guild_id: u64, role_id: u64, data: &Data) -> Result<()> {
    let removed = bounded("remove_rank", Some(guild_id), data.config.store_timeout, async {
        let res = ranks::Entity::update_many()
            .col_expr(ranks::Column::DeletedAt, Expr::value(data.now()))
            .filter(ranks::Column::GuildId.eq(guild_id as i64))
            .filter(ranks::Column::RoleId.eq(role_id as i64))
            .filter(ranks::Column::DeletedAt.is_null())
            .exec(&data.db)
            .await?;
        Ok(res.rows_affected)
    })
    .await?;

    if removed == 0 {
        return Err(Error::not_found("rank", role_id));
    }

    data.ranks.flush(guild_id);
    info!(guild_id, role_id, "Rank removed");
    Ok(())
}

pub async fn list_ranks(guild_id: u64, data: &Data) -> Result<Vec<Rank>> {
    let ranks = bounded(
        "list_ranks",
        Some(guild_id),
        data.config.store_timeout,
        data.ranks.get(guild_id),
    )
    .await?;
    Ok(ranks.as_slice().to_vec())
}
