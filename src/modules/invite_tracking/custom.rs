use crate::db::entities::{custom_invites, invite_codes, joins};
use crate::modules::ranks::promotion;
use crate::services::cache::InviteTotals;
use crate::services::registry;
use crate::services::store::bounded;
use crate::{Data, Error, Result};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::Serialize;
use tracing::info;

/// Converts a requested adjustment to the stored width. Zero is rejected since it records
/// nothing.
pub fn checked_amount(amount: i128) -> Result<i64> {
    let amount = i64::try_from(amount).map_err(|_| Error::OutOfRange {
        field: "amount",
        value: amount.to_string(),
    })?;

    if amount == 0 {
        return Err(Error::InvalidInput("amount must not be zero".into()));
    }
    Ok(amount)
}

/// Adds a manual, signed adjustment to a member's invites and returns their new totals.
pub async fn add_custom_invite(
    guild_id: u64,
    member_id: u64,
    creator_id: Option<u64>,
    amount: i128,
    reason: Option<String>,
    data: &Data,
) -> Result<InviteTotals> {
    let amount = checked_amount(amount)?;

    let totals = bounded("add_custom_invite", Some(guild_id), data.config.store_timeout, async {
        let now = data.now();
        let txn = data.db.begin().await?;

        registry::upsert_member(&txn, member_id, None, now).await?;
        if let Some(creator_id) = creator_id {
            registry::upsert_member(&txn, creator_id, None, now).await?;
        }

        custom_invites::Entity::insert(custom_invites::ActiveModel {
            guild_id: Set(guild_id as i64),
            member_id: Set(member_id as i64),
            creator_id: Set(creator_id.map(|id| id as i64)),
            amount: Set(amount),
            reason: Set(reason.clone()),
            cleared: Set(false),
            created_at: Set(now),
            ..Default::default()
        })
        .exec_without_returning(&txn)
        .await?;

        txn.commit().await?;
        data.invites.flush(guild_id);

        data.invites.get_one(guild_id, &member_id).await
    })
    .await?;

    info!(
        guild_id,
        member_id,
        creator_id = ?creator_id,
        amount,
        reason = reason.as_deref().unwrap_or(""),
        total = totals.total,
        "Custom invites added"
    );

    promotion::sync_member_ranks(guild_id, member_id, data).await;
    Ok(totals)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    pub joins: u64,
    pub custom_invites: u64,
    pub codes: u64,
}

/// Resets invite counts for one member, or for the whole guild. Cleared rows stay in the store
/// but stop counting.
pub async fn clear_invites(
    guild_id: u64,
    member_id: Option<u64>,
    data: &Data,
) -> Result<ClearSummary> {
    let guild = guild_id as i64;

    let summary = bounded("clear_invites", Some(guild_id), data.config.store_timeout, async {
        let txn = data.db.begin().await?;

        // Joins are cleared through the code that brought them in
        let mut codes = Query::select()
            .column(invite_codes::Column::Code)
            .from(invite_codes::Entity)
            .and_where(invite_codes::Column::GuildId.eq(guild))
            .to_owned();
        if let Some(member_id) = member_id {
            codes.and_where(invite_codes::Column::InviterId.eq(member_id as i64));
        }

        let joins = joins::Entity::update_many()
            .col_expr(joins::Column::Cleared, Expr::value(true))
            .filter(joins::Column::GuildId.eq(guild))
            .filter(joins::Column::Cleared.eq(false))
            .filter(joins::Column::ExactMatchCode.in_subquery(codes))
            .exec(&txn)
            .await?;

        let mut custom = custom_invites::Entity::update_many()
            .col_expr(custom_invites::Column::Cleared, Expr::value(true))
            .filter(custom_invites::Column::GuildId.eq(guild))
            .filter(custom_invites::Column::Cleared.eq(false));
        if let Some(member_id) = member_id {
            custom = custom.filter(custom_invites::Column::MemberId.eq(member_id as i64));
        }
        let custom = custom.exec(&txn).await?;

        let mut code_rows = invite_codes::Entity::update_many()
            .col_expr(
                invite_codes::Column::ClearedAmount,
                Expr::col(invite_codes::Column::Uses).into(),
            )
            .filter(invite_codes::Column::GuildId.eq(guild));
        if let Some(member_id) = member_id {
            code_rows = code_rows.filter(invite_codes::Column::InviterId.eq(member_id as i64));
        }
        let code_rows = code_rows.exec(&txn).await?;

        txn.commit().await?;
        data.invites.flush(guild_id);

        Ok(ClearSummary {
            joins: joins.rows_affected,
            custom_invites: custom.rows_affected,
            codes: code_rows.rows_affected,
        })
    })
    .await?;

    info!(guild_id, member_id = ?member_id, ?summary, "Invites cleared");

    if let Some(member_id) = member_id {
        promotion::sync_member_ranks(guild_id, member_id, data).await;
    }
    Ok(summary)
}
