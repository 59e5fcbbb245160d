use super::{GuildCache, GuildEntry};
use crate::db::entities::{custom_invites, invite_codes, joins, joins::InvalidatedReason};
use crate::error::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::collections::HashMap;

/// Invite counters for one member. `total = regular + custom - fakes - leaves`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InviteTotals {
    pub regular: i64,
    pub custom: i64,
    pub fakes: i64,
    pub leaves: i64,
    pub total: i64,
}

impl InviteTotals {
    fn settle(&mut self) {
        self.total = self
            .regular
            .saturating_add(self.custom)
            .saturating_sub(self.fakes)
            .saturating_sub(self.leaves);
    }
}

/// Totals for every member of one guild that has ever been credited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildInvites {
    members: HashMap<u64, InviteTotals>,
}

impl GuildInvites {
    /// Folds credited joins `(inviter, invalidation)` and custom adjustments `(member, amount)`.
    pub fn aggregate(
        credited_joins: impl IntoIterator<Item = (u64, Option<InvalidatedReason>)>,
        custom: impl IntoIterator<Item = (u64, i64)>,
    ) -> Self {
        let mut members: HashMap<u64, InviteTotals> = HashMap::new();

        for (inviter, reason) in credited_joins {
            let entry = members.entry(inviter).or_default();
            entry.regular += 1;
            match reason {
                Some(InvalidatedReason::Fake) => entry.fakes += 1,
                Some(InvalidatedReason::Leave) => entry.leaves += 1,
                None => {}
            }
        }

        for (member, amount) in custom {
            let entry = members.entry(member).or_default();
            entry.custom = entry.custom.saturating_add(amount);
        }

        for totals in members.values_mut() {
            totals.settle();
        }

        Self { members }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, InviteTotals)> + '_ {
        self.members.iter().map(|(id, totals)| (*id, *totals))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl GuildEntry for GuildInvites {
    type Key = u64;
    type Value = InviteTotals;

    fn lookup(&self, member_id: &u64) -> InviteTotals {
        self.members.get(member_id).copied().unwrap_or_default()
    }
}

pub type InvitesCache = GuildCache<GuildInvites>;

pub fn invites_cache(db: DatabaseConnection) -> InvitesCache {
    GuildCache::new("invites", move |guild_id| {
        let db = db.clone();
        async move { load_guild_invites(&db, guild_id).await }
    })
}

/// Reads the authoritative totals for a guild from the store.
///
/// Only exact matches are credited; joins whose code has no inviter (vanity, widget) and
/// ambiguous joins count for nobody. Cleared rows are ignored.
pub async fn load_guild_invites(db: &DatabaseConnection, guild_id: u64) -> Result<GuildInvites> {
    let guild = guild_id as i64;

    let credited = joins::Entity::find()
        .find_also_related(invite_codes::Entity)
        .filter(joins::Column::GuildId.eq(guild))
        .filter(joins::Column::Cleared.eq(false))
        .filter(joins::Column::DeletedAt.is_null())
        .filter(joins::Column::ExactMatchCode.is_not_null())
        .all(db)
        .await?;

    let custom = custom_invites::Entity::find()
        .filter(custom_invites::Column::GuildId.eq(guild))
        .filter(custom_invites::Column::Cleared.eq(false))
        .all(db)
        .await?;

    Ok(GuildInvites::aggregate(
        credited.into_iter().filter_map(|(join, code)| {
            let inviter = code?.inviter_id?;
            Some((inviter as u64, join.invalidated_reason))
        }),
        custom
            .into_iter()
            .map(|row| (row.member_id as u64, row.amount)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_follow_the_formula() {
        let invites = GuildInvites::aggregate(
            [
                (1, None),
                (1, None),
                (1, Some(InvalidatedReason::Fake)),
                (1, Some(InvalidatedReason::Leave)),
                (2, None),
            ],
            [(1, 10), (1, -3), (3, -5)],
        );

        assert_eq!(
            invites.lookup(&1),
            InviteTotals {
                regular: 4,
                custom: 7,
                fakes: 1,
                leaves: 1,
                total: 9,
            }
        );
        assert_eq!(invites.lookup(&2).total, 1);
        assert_eq!(invites.lookup(&3).total, -5);
        assert_eq!(invites.len(), 3);
    }

    #[test]
    fn unknown_members_read_as_zero() {
        let invites = GuildInvites::default();
        assert!(invites.is_empty());
        assert_eq!(invites.lookup(&77), InviteTotals::default());
    }

    #[test]
    fn extreme_custom_amounts_saturate() {
        let invites = GuildInvites::aggregate([], [(1, i64::MAX), (1, 5)]);
        assert_eq!(invites.lookup(&1).custom, i64::MAX);
        assert_eq!(invites.lookup(&1).total, i64::MAX);
    }
}
