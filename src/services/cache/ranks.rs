use super::GuildCache;
use crate::db::entities::ranks;
use crate::error::Result;
use crate::modules::ranks::engine::Rank;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

/// A guild's active ranks, ordered by threshold then role id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildRanks(pub Vec<Rank>);

impl GuildRanks {
    pub fn as_slice(&self) -> &[Rank] {
        &self.0
    }
}

pub type RanksCache = GuildCache<GuildRanks>;

pub fn ranks_cache(db: DatabaseConnection) -> RanksCache {
    GuildCache::new("ranks", move |guild_id| {
        let db = db.clone();
        async move {
            let rows = ranks::Entity::find()
                .filter(ranks::Column::GuildId.eq(guild_id as i64))
                .filter(ranks::Column::DeletedAt.is_null())
                .order_by_asc(ranks::Column::NumInvites)
                .order_by_asc(ranks::Column::RoleId)
                .all(&db)
                .await?;

            Ok(GuildRanks(rows.into_iter().map(Rank::from).collect()))
        }
    })
}
