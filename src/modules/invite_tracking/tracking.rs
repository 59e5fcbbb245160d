use crate::db::entities::invite_codes;
use crate::error::Result;
use crate::services::gateway::InviteSnapshot;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How a join was attributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinMatch {
    /// One code accounts for the join. `inviter_id` is `None` for vanity and widget codes.
    Exact {
        code: String,
        inviter_id: Option<u64>,
    },
    /// Several codes moved at once. Nobody is credited.
    Ambiguous { candidates: Vec<String> },
    /// No code moved.
    Unmatched,
}

impl JoinMatch {
    pub fn exact_code(&self) -> Option<&str> {
        match self {
            JoinMatch::Exact { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn inviter_id(&self) -> Option<u64> {
        match self {
            JoinMatch::Exact { inviter_id, .. } => *inviter_id,
            _ => None,
        }
    }

    /// Codes stored in `possible_matches`.
    pub fn candidates(&self) -> Vec<String> {
        match self {
            JoinMatch::Exact { code, .. } => vec![code.clone()],
            JoinMatch::Ambiguous { candidates } => candidates.clone(),
            JoinMatch::Unmatched => Vec::new(),
        }
    }
}

/// Use-counter increase of one code since it was last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDelta {
    pub code: String,
    pub delta: i32,
    pub inviter_id: Option<u64>,
    /// The code vanished from the platform list because this join used it up.
    pub consumed: bool,
}

/// A live code that disappeared from the platform list with exactly one use left was used up by
/// the join that removed it. Codes already retired by an invite deletion never qualify.
fn was_consumed(code: &invite_codes::Model) -> bool {
    code.max_uses > 0 && code.uses.saturating_add(1) == code.max_uses
}

/// Compares the platform's current list against the stored codes. Codes the store has never
/// seen start from zero uses. Results keep platform order, consumed codes last.
pub fn compute_deltas(known: &[invite_codes::Model], current: &[InviteSnapshot]) -> Vec<CodeDelta> {
    let previous: HashMap<&str, &invite_codes::Model> =
        known.iter().map(|c| (c.code.as_str(), c)).collect();

    let mut deltas: Vec<CodeDelta> = current
        .iter()
        .filter_map(|invite| {
            let before = previous.get(invite.code.as_str());
            let delta = invite.uses - before.map_or(0, |c| c.uses);
            (delta > 0).then(|| CodeDelta {
                code: invite.code.clone(),
                delta,
                inviter_id: invite
                    .inviter_id
                    .or_else(|| before.and_then(|c| c.inviter_id).map(|id| id as u64)),
                consumed: false,
            })
        })
        .collect();

    let listed: HashSet<&str> = current.iter().map(|i| i.code.as_str()).collect();
    deltas.extend(
        known
            .iter()
            .filter(|c| {
                c.deleted_at.is_none() && !listed.contains(c.code.as_str()) && was_consumed(c)
            })
            .map(|c| CodeDelta {
                code: c.code.clone(),
                delta: 1,
                inviter_id: c.inviter_id.map(|id| id as u64),
                consumed: true,
            }),
    );

    deltas
}

/// A single moving code is an exact match, even when it moved by more than one.
pub fn resolve_match(deltas: &[CodeDelta]) -> JoinMatch {
    match deltas {
        [] => JoinMatch::Unmatched,
        [only] => JoinMatch::Exact {
            code: only.code.clone(),
            inviter_id: only.inviter_id,
        },
        many => JoinMatch::Ambiguous {
            candidates: many.iter().map(|d| d.code.clone()).collect(),
        },
    }
}

fn snapshot_model(
    guild_id: u64,
    invite: &InviteSnapshot,
    now: DateTimeWithTimeZone,
) -> invite_codes::ActiveModel {
    invite_codes::ActiveModel {
        code: Set(invite.code.clone()),
        guild_id: Set(guild_id as i64),
        channel_id: Set(invite.channel_id.map(|id| id as i64)),
        inviter_id: Set(invite.inviter_id.map(|id| id as i64)),
        uses: Set(invite.uses),
        max_uses: Set(invite.max_uses),
        max_age: Set(invite.max_age),
        temporary: Set(invite.temporary),
        cleared_amount: Set(0),
        is_vanity: Set(invite.is_vanity),
        is_widget: Set(invite.is_widget),
        created_at: Set(invite.created_at.map(Into::into).unwrap_or(now)),
        updated_at: Set(now),
        deleted_at: Set(None),
    }
}

/// Upserts codes as reported by the platform. `cleared_amount` and `created_at` of known codes
/// are kept.
pub async fn upsert_codes<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    invites: &[InviteSnapshot],
    now: DateTimeWithTimeZone,
) -> Result<()> {
    if invites.is_empty() {
        return Ok(());
    }

    invite_codes::Entity::insert_many(invites.iter().map(|i| snapshot_model(guild_id, i, now)))
        .on_conflict(
            OnConflict::column(invite_codes::Column::Code)
                .update_columns([
                    invite_codes::Column::ChannelId,
                    invite_codes::Column::InviterId,
                    invite_codes::Column::Uses,
                    invite_codes::Column::MaxUses,
                    invite_codes::Column::MaxAge,
                    invite_codes::Column::Temporary,
                    invite_codes::Column::IsVanity,
                    invite_codes::Column::IsWidget,
                    invite_codes::Column::UpdatedAt,
                    invite_codes::Column::DeletedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    Ok(())
}

/// Soft-deletes codes of the guild that are still live. Returns how many were touched.
pub async fn retire_codes<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    codes: &[String],
    now: DateTimeWithTimeZone,
) -> Result<u64> {
    if codes.is_empty() {
        return Ok(0);
    }

    let res = invite_codes::Entity::update_many()
        .col_expr(invite_codes::Column::DeletedAt, Expr::value(now))
        .col_expr(invite_codes::Column::UpdatedAt, Expr::value(now))
        .filter(invite_codes::Column::GuildId.eq(guild_id as i64))
        .filter(invite_codes::Column::Code.is_in(codes.iter().cloned()))
        .filter(invite_codes::Column::DeletedAt.is_null())
        .exec(db)
        .await?;

    Ok(res.rows_affected)
}

/// Brings the stored codes in line with the platform list observed at a join.
///
/// Listed codes are upserted. Known codes that are no longer listed are retired; the ones in
/// `consumed` also get the use that removed them, so they are not counted a second time.
pub async fn sync_codes<C: ConnectionTrait>(
    db: &C,
    guild_id: u64,
    known: &[invite_codes::Model],
    current: &[InviteSnapshot],
    consumed: &[String],
    now: DateTimeWithTimeZone,
) -> Result<()> {
    upsert_codes(db, guild_id, current, now).await?;

    if !consumed.is_empty() {
        invite_codes::Entity::update_many()
            .col_expr(
                invite_codes::Column::Uses,
                Expr::col(invite_codes::Column::Uses).add(1),
            )
            .filter(invite_codes::Column::GuildId.eq(guild_id as i64))
            .filter(invite_codes::Column::Code.is_in(consumed.iter().cloned()))
            .exec(db)
            .await?;
    }

    let listed: HashSet<&str> = current.iter().map(|i| i.code.as_str()).collect();
    let missing: Vec<String> = known
        .iter()
        .filter(|c| c.deleted_at.is_none() && !listed.contains(c.code.as_str()))
        .map(|c| c.code.clone())
        .collect();

    let retired = retire_codes(db, guild_id, &missing, now).await?;
    if retired > 0 {
        debug!(guild_id, retired, "Retired invite codes missing from the platform");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn known(code: &str, uses: i32, max_uses: i32, inviter: Option<i64>) -> invite_codes::Model {
        let now = Utc::now().fixed_offset();
        invite_codes::Model {
            code: code.to_string(),
            guild_id: 1,
            channel_id: None,
            inviter_id: inviter,
            uses,
            max_uses,
            max_age: 0,
            temporary: false,
            cleared_amount: 0,
            is_vanity: false,
            is_widget: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn single_increment_is_an_exact_match() {
        let stored = [known("A", 3, 0, Some(10)), known("B", 5, 0, Some(20))];
        let current = [
            InviteSnapshot::regular("A", 4, 10),
            InviteSnapshot::regular("B", 5, 20),
        ];

        let deltas = compute_deltas(&stored, &current);
        assert_eq!(
            resolve_match(&deltas),
            JoinMatch::Exact {
                code: "A".into(),
                inviter_id: Some(10),
            }
        );
    }

    #[test]
    fn simultaneous_increments_are_ambiguous() {
        let stored = [known("A", 0, 0, Some(10)), known("B", 0, 0, Some(20))];
        let current = [
            InviteSnapshot::regular("A", 1, 10),
            InviteSnapshot::regular("B", 1, 20),
        ];

        let matched = resolve_match(&compute_deltas(&stored, &current));
        assert_eq!(
            matched,
            JoinMatch::Ambiguous {
                candidates: vec!["A".into(), "B".into()],
            }
        );
        assert_eq!(matched.inviter_id(), None);
        assert_eq!(matched.exact_code(), None);
    }

    #[test]
    fn nothing_moved_is_unmatched() {
        let stored = [known("A", 2, 0, Some(10))];
        let current = [InviteSnapshot::regular("A", 2, 10)];

        let matched = resolve_match(&compute_deltas(&stored, &current));
        assert_eq!(matched, JoinMatch::Unmatched);
        assert!(matched.candidates().is_empty());
    }

    #[test]
    fn unseen_codes_count_from_zero() {
        let current = [InviteSnapshot::regular("new", 1, 30)];
        let deltas = compute_deltas(&[], &current);

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].delta, 1);
        assert_eq!(deltas[0].inviter_id, Some(30));
    }

    #[test]
    fn a_code_used_up_by_the_join_still_matches() {
        let stored = [known("once", 0, 1, Some(10)), known("other", 4, 0, Some(20))];
        let current = [InviteSnapshot::regular("other", 4, 20)];

        let deltas = compute_deltas(&stored, &current);
        assert!(deltas[0].consumed);
        assert_eq!(
            resolve_match(&deltas),
            JoinMatch::Exact {
                code: "once".into(),
                inviter_id: Some(10),
            }
        );
    }

    #[test]
    fn expired_codes_are_not_mistaken_for_used_ones() {
        let stored = [known("expired", 2, 10, Some(10)), known("full", 5, 5, Some(10))];
        assert!(compute_deltas(&stored, &[]).is_empty());
    }

    #[test]
    fn deleted_codes_are_never_consumed() {
        let mut deleted = known("gone", 4, 5, Some(10));
        deleted.deleted_at = Some(Utc::now().fixed_offset());
        let stored = [deleted, known("live", 1, 0, Some(20))];
        let current = [InviteSnapshot::regular("live", 2, 20)];

        let deltas = compute_deltas(&stored, &current);
        assert_eq!(deltas.len(), 1);
        assert_eq!(
            resolve_match(&deltas),
            JoinMatch::Exact {
                code: "live".into(),
                inviter_id: Some(20),
            }
        );
    }

    #[test]
    fn vanity_matches_credit_nobody() {
        let stored = [known("vanity", 7, 0, None)];
        let current = [InviteSnapshot::vanity("vanity", 8)];

        let matched = resolve_match(&compute_deltas(&stored, &current));
        assert_eq!(matched.exact_code(), Some("vanity"));
        assert_eq!(matched.inviter_id(), None);
    }

    #[test]
    fn one_code_moving_by_several_is_still_exact() {
        let stored = [known("A", 1, 0, Some(10))];
        let current = [InviteSnapshot::regular("A", 3, 10)];

        let deltas = compute_deltas(&stored, &current);
        assert_eq!(deltas[0].delta, 2);
        assert_eq!(resolve_match(&deltas).exact_code(), Some("A"));
    }
}
