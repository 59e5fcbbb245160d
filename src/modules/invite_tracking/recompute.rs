//! Bulk re-evaluation of `invalidated_reason` on joins.
//!
//! Both passes read every relevant join of a guild, decide in memory which ones should carry the
//! marker under the current settings, and write only the rows whose marker has to change. Joins
//! already carrying the *other* marker are never touched, so a join is never fake and leave at
//! once. Running a pass twice leaves the rows as the first run left them.

use crate::db::entities::joins::{self, InvalidatedReason};
use crate::db::entities::leaves;
use crate::error::Result;
use crate::services::store::bounded;
use crate::Data;
use chrono::{DateTime, Duration, FixedOffset};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Bound on ids per `IN (...)` so large guilds stay under driver parameter limits.
const ID_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Fake,
    Leave,
}

impl From<Marker> for InvalidatedReason {
    fn from(marker: Marker) -> Self {
        match marker {
            Marker::Fake => InvalidatedReason::Fake,
            Marker::Leave => InvalidatedReason::Leave,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeSummary {
    pub marked: u64,
    pub unmarked: u64,
}

impl RecomputeSummary {
    pub fn changed(&self) -> bool {
        self.marked + self.unmarked > 0
    }
}

/// A join that came through a known code, as seen by the fake rule.
#[derive(Debug, Clone)]
pub struct CodeJoin {
    pub id: i32,
    pub member_id: i64,
    pub code: String,
    pub created_at: DateTime<FixedOffset>,
}

/// Joins followed by another join of the same member through the same code. With a `window`,
/// the later join must come within it.
pub fn fake_join_ids(joins: &[CodeJoin], window: Option<Duration>) -> BTreeSet<i32> {
    let mut by_member_code: HashMap<(i64, &str), Vec<&CodeJoin>> = HashMap::new();
    for join in joins {
        by_member_code
            .entry((join.member_id, join.code.as_str()))
            .or_default()
            .push(join);
    }

    let mut fakes = BTreeSet::new();
    for group in by_member_code.values_mut() {
        group.sort_by_key(|j| (j.created_at, j.id));
        for pair in group.windows(2) {
            let gap = pair[1].created_at - pair[0].created_at;
            if window.is_none_or(|w| gap <= w) {
                fakes.insert(pair[0].id);
            }
        }
    }
    fakes
}

/// Whether a join left too early to count.
pub fn left_too_early(
    joined_at: DateTime<FixedOffset>,
    left_at: DateTime<FixedOffset>,
    threshold: Duration,
) -> bool {
    left_at - joined_at < threshold
}

/// Saturates at [`Duration::MAX`] for values chrono cannot represent.
pub(crate) fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Sets `marker` on `mark` and clears it from `unmark`, only where the row carries no other marker.
async fn write_marker<C: ConnectionTrait>(
    db: &C,
    marker: Marker,
    mark: &[i32],
    unmark: &[i32],
) -> Result<RecomputeSummary> {
    let reason: InvalidatedReason = marker.into();
    let mut summary = RecomputeSummary::default();

    for ids in mark.chunks(ID_CHUNK) {
        let res = joins::Entity::update_many()
            .set(joins::ActiveModel {
                invalidated_reason: Set(Some(reason)),
                ..Default::default()
            })
            .filter(joins::Column::Id.is_in(ids.iter().copied()))
            .filter(joins::Column::InvalidatedReason.is_null())
            .exec(db)
            .await?;
        summary.marked += res.rows_affected;
    }

    for ids in unmark.chunks(ID_CHUNK) {
        let res = joins::Entity::update_many()
            .set(joins::ActiveModel {
                invalidated_reason: Set(None),
                ..Default::default()
            })
            .filter(joins::Column::Id.is_in(ids.iter().copied()))
            .filter(joins::Column::InvalidatedReason.eq(reason))
            .exec(db)
            .await?;
        summary.unmarked += res.rows_affected;
    }

    Ok(summary)
}

/// Applies the fake rule to a guild, or to one member of it. When `enabled` is false every fake
/// marker in scope is cleared.
pub(crate) async fn apply_fake_rule<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    member_id: Option<u64>,
    enabled: bool,
    window: Option<u64>,
) -> Result<RecomputeSummary> {
    let mut query = joins::Entity::find()
        .filter(joins::Column::GuildId.eq(guild_id as i64))
        .filter(joins::Column::DeletedAt.is_null());
    if let Some(member_id) = member_id {
        query = query.filter(joins::Column::MemberId.eq(member_id as i64));
    }
    let rows = query.order_by_asc(joins::Column::Id).all(db).await?;

    let fakes = if enabled {
        let code_joins: Vec<CodeJoin> = rows
            .iter()
            .filter_map(|j| {
                Some(CodeJoin {
                    id: j.id,
                    member_id: j.member_id,
                    code: j.exact_match_code.clone()?,
                    created_at: j.created_at,
                })
            })
            .collect();
        fake_join_ids(&code_joins, window.map(seconds))
    } else {
        BTreeSet::new()
    };

    let mark: Vec<i32> = rows
        .iter()
        .filter(|j| j.invalidated_reason.is_none() && fakes.contains(&j.id))
        .map(|j| j.id)
        .collect();
    let unmark: Vec<i32> = rows
        .iter()
        .filter(|j| j.invalidated_reason == Some(InvalidatedReason::Fake) && !fakes.contains(&j.id))
        .map(|j| j.id)
        .collect();

    write_marker(db, Marker::Fake, &mark, &unmark).await
}

/// Applies the leave rule to every join of a guild that has a recorded leave.
pub(crate) async fn apply_leave_rule<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    enabled: bool,
    threshold: u64,
) -> Result<RecomputeSummary> {
    let rows = joins::Entity::find()
        .find_also_related(leaves::Entity)
        .filter(joins::Column::GuildId.eq(guild_id as i64))
        .filter(joins::Column::DeletedAt.is_null())
        .filter(
            Condition::any()
                .add(joins::Column::InvalidatedReason.is_null())
                .add(joins::Column::InvalidatedReason.eq(InvalidatedReason::Leave)),
        )
        .all(db)
        .await?;

    let threshold = seconds(threshold);
    let mut mark = Vec::new();
    let mut unmark = Vec::new();

    for (join, leave) in rows {
        let should_mark = enabled
            && leave.is_some_and(|l| left_too_early(join.created_at, l.created_at, threshold));
        match (join.invalidated_reason, should_mark) {
            (None, true) => mark.push(join.id),
            (Some(InvalidatedReason::Leave), false) => unmark.push(join.id),
            _ => {}
        }
    }

    write_marker(db, Marker::Leave, &mark, &unmark).await
}

/// Re-derives fake markers for the whole guild from its current settings.
pub async fn recompute_fakes(guild_id: u64, data: &Data) -> Result<RecomputeSummary> {
    bounded("recompute_fakes", Some(guild_id), data.config.store_timeout, async {
        let settings = data.settings.get(guild_id).await?;

        let txn = data.db.begin().await?;
        let summary = apply_fake_rule(
            &txn,
            guild_id,
            None,
            settings.auto_subtract_fakes,
            settings.fake_rejoin_window,
        )
        .await?;
        txn.commit().await?;

        data.invites.flush(guild_id);
        info!(guild_id, marked = summary.marked, unmarked = summary.unmarked, "Recomputed fakes");
        Ok(summary)
    })
    .await
}

/// Re-derives leave markers for the whole guild from its current threshold.
pub async fn recompute_leaves(guild_id: u64, data: &Data) -> Result<RecomputeSummary> {
    bounded("recompute_leaves", Some(guild_id), data.config.store_timeout, async {
        let settings = data.settings.get(guild_id).await?;

        let txn = data.db.begin().await?;
        let summary = apply_leave_rule(
            &txn,
            guild_id,
            settings.auto_subtract_leaves,
            settings.auto_subtract_leave_threshold,
        )
        .await?;
        txn.commit().await?;

        data.invites.flush(guild_id);
        info!(guild_id, marked = summary.marked, unmarked = summary.unmarked, "Recomputed leaves");
        Ok(summary)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<FixedOffset> {
        chrono::Utc
            .timestamp_opt(1_700_000_000 + secs, 0)
            .unwrap()
            .fixed_offset()
    }

    fn join(id: i32, member_id: i64, code: &str, secs: i64) -> CodeJoin {
        CodeJoin {
            id,
            member_id,
            code: code.to_string(),
            created_at: at(secs),
        }
    }

    #[test]
    fn every_join_followed_by_a_rejoin_is_fake() {
        let joins = [
            join(1, 100, "A", 0),
            join(2, 100, "A", 60),
            join(3, 100, "A", 120),
            join(4, 200, "A", 30),
        ];

        let fakes = fake_join_ids(&joins, None);
        assert_eq!(fakes.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn rejoins_through_another_code_do_not_count() {
        let joins = [join(1, 100, "A", 0), join(2, 100, "B", 60)];
        assert!(fake_join_ids(&joins, None).is_empty());
    }

    #[test]
    fn window_limits_what_counts_as_a_rejoin() {
        let joins = [
            join(1, 100, "A", 0),
            join(2, 100, "A", 3_600),
            join(3, 100, "A", 3_630),
        ];

        let fakes = fake_join_ids(&joins, Some(Duration::seconds(60)));
        assert_eq!(fakes.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn order_of_input_does_not_matter() {
        let forward = [join(1, 100, "A", 0), join(2, 100, "A", 10)];
        let backward = [join(2, 100, "A", 10), join(1, 100, "A", 0)];
        assert_eq!(fake_join_ids(&forward, None), fake_join_ids(&backward, None));
    }

    #[test]
    fn leaving_before_the_threshold_invalidates() {
        let threshold = Duration::seconds(300);
        assert!(left_too_early(at(0), at(10), threshold));
        assert!(!left_too_early(at(0), at(300), threshold));
        assert!(!left_too_early(at(0), at(4_000), threshold));
    }

    #[test]
    fn oversized_thresholds_saturate() {
        assert_eq!(seconds(u64::MAX), Duration::MAX);
        assert_eq!(seconds(i64::MAX as u64), Duration::MAX);
        assert!(left_too_early(at(0), at(10_000_000), seconds(u64::MAX)));
    }
}
