use crate::db::entities::{invite_codes, members};
use crate::services::cache::InviteTotals;
use crate::services::store::bounded;
use crate::{Data, Result};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub member_id: u64,
    pub name: Option<String>,
    pub totals: InviteTotals,
}

/// One of a member's live invite codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberCode {
    pub code: String,
    pub uses: i32,
    /// `0` means unlimited.
    pub max_uses: i32,
    /// Lifetime in seconds, `0` for codes that never expire.
    pub max_age: i32,
    /// Uses already written off by a clear.
    pub cleared_amount: i32,
    pub created_at: DateTimeWithTimeZone,
}

impl From<invite_codes::Model> for MemberCode {
    fn from(code: invite_codes::Model) -> Self {
        Self {
            code: code.code,
            uses: code.uses,
            max_uses: code.max_uses,
            max_age: code.max_age,
            cleared_amount: code.cleared_amount,
            created_at: code.created_at,
        }
    }
}

/// Totals for one member. Members without any activity get zeros.
pub async fn get_totals(guild_id: u64, member_id: u64, data: &Data) -> Result<InviteTotals> {
    bounded(
        "get_totals",
        Some(guild_id),
        data.config.store_timeout,
        data.invites.get_one(guild_id, &member_id),
    )
    .await
}

/// Members ordered by total, then regular invites, then id.
pub async fn get_leaderboard(
    guild_id: u64,
    limit: Option<usize>,
    data: &Data,
) -> Result<Vec<LeaderboardEntry>> {
    bounded("get_leaderboard", Some(guild_id), data.config.store_timeout, async {
        let invites = data.invites.get(guild_id).await?;

        let mut ranked: Vec<(u64, InviteTotals)> = invites.iter().collect();
        ranked.sort_by_key(|(id, t)| (Reverse(t.total), Reverse(t.regular), *id));
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }

        let names: HashMap<i64, String> = if ranked.is_empty() {
            HashMap::new()
        } else {
            members::Entity::find()
                .filter(members::Column::Id.is_in(ranked.iter().map(|(id, _)| *id as i64)))
                .all(&data.db)
                .await?
                .into_iter()
                .map(|m| (m.id, m.name))
                .collect()
        };

        Ok(ranked
            .into_iter()
            .map(|(member_id, totals)| LeaderboardEntry {
                member_id,
                name: names.get(&(member_id as i64)).cloned(),
                totals,
            })
            .collect())
    })
    .await
}

/// Codes created by `member_id` that still exist, most used first.
pub async fn list_member_codes(guild_id: u64, member_id: u64, data: &Data) -> Result<Vec<MemberCode>> {
    bounded("list_member_codes", Some(guild_id), data.config.store_timeout, async {
        let codes = invite_codes::Entity::find()
            .filter(invite_codes::Column::GuildId.eq(guild_id as i64))
            .filter(invite_codes::Column::InviterId.eq(member_id as i64))
            .filter(invite_codes::Column::DeletedAt.is_null())
            .order_by_desc(invite_codes::Column::Uses)
            .order_by_asc(invite_codes::Column::Code)
            .all(&data.db)
            .await?;

        Ok(codes.into_iter().map(MemberCode::from).collect())
    })
    .await
}
