use crate::db::entities::{guild_settings::RankAssignmentStyle, ranks};
use serde::Serialize;
use std::collections::BTreeSet;

/// A role granted once a member reaches `num_invites`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rank {
    pub role_id: u64,
    pub num_invites: i64,
    pub description: Option<String>,
}

impl From<ranks::Model> for Rank {
    fn from(model: ranks::Model) -> Self {
        Self {
            role_id: model.role_id as u64,
            num_invites: model.num_invites as i64,
            description: model.description,
        }
    }
}

/// Role changes a member needs to match their invite total. Every list is sorted by role id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleDelta {
    pub should_have: Vec<u64>,
    pub should_not_have: Vec<u64>,
    /// Held roles that are not ranks. Informational only; nothing acts on them.
    pub dangerous: Vec<u64>,
}

impl RoleDelta {
    pub fn is_noop(&self) -> bool {
        self.should_have.is_empty() && self.should_not_have.is_empty()
    }
}

/// Ranks a member with `total_invites` qualifies for under `style`.
pub fn target_roles(ranks: &[Rank], style: RankAssignmentStyle, total_invites: i64) -> BTreeSet<u64> {
    let qualifying = ranks.iter().filter(|rank| rank.num_invites <= total_invites);

    match style {
        RankAssignmentStyle::All => qualifying.map(|rank| rank.role_id).collect(),
        // Ties on the threshold go to the lowest role id
        RankAssignmentStyle::Highest => qualifying
            .max_by(|a, b| {
                a.num_invites
                    .cmp(&b.num_invites)
                    .then_with(|| b.role_id.cmp(&a.role_id))
            })
            .map(|rank| rank.role_id)
            .into_iter()
            .collect(),
    }
}

/// Pure: compares the roles a member holds against the ranks their total earns.
pub fn compute_role_delta(
    ranks: &[Rank],
    style: RankAssignmentStyle,
    current_roles: &[u64],
    total_invites: i64,
) -> RoleDelta {
    let ranked: BTreeSet<u64> = ranks.iter().map(|rank| rank.role_id).collect();
    let held: BTreeSet<u64> = current_roles.iter().copied().collect();
    let target = target_roles(ranks, style, total_invites);

    RoleDelta {
        should_have: target.difference(&held).copied().collect(),
        should_not_have: held
            .iter()
            .filter(|role| ranked.contains(role) && !target.contains(role))
            .copied()
            .collect(),
        dangerous: held.difference(&ranked).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(role_id: u64, num_invites: i64) -> Rank {
        Rank {
            role_id,
            num_invites,
            description: None,
        }
    }

    fn ladder() -> Vec<Rank> {
        vec![rank(10, 5), rank(20, 10), rank(30, 25)]
    }

    #[test]
    fn all_style_grants_every_qualifying_rank() {
        let delta = compute_role_delta(&ladder(), RankAssignmentStyle::All, &[], 12);

        assert_eq!(delta.should_have, vec![10, 20]);
        assert!(delta.should_not_have.is_empty());
        assert!(delta.dangerous.is_empty());
    }

    #[test]
    fn highest_style_keeps_only_the_top_rank() {
        let delta = compute_role_delta(&ladder(), RankAssignmentStyle::Highest, &[10], 12);

        assert_eq!(delta.should_have, vec![20]);
        assert_eq!(delta.should_not_have, vec![10]);
    }

    #[test]
    fn lost_ranks_are_removed_and_foreign_roles_flagged() {
        let delta = compute_role_delta(&ladder(), RankAssignmentStyle::All, &[10, 20, 99], 7);

        assert!(delta.should_have.is_empty());
        assert_eq!(delta.should_not_have, vec![20]);
        assert_eq!(delta.dangerous, vec![99]);
        assert!(!delta.is_noop());
    }

    #[test]
    fn negative_totals_qualify_for_nothing() {
        let delta = compute_role_delta(&ladder(), RankAssignmentStyle::All, &[10], -3);

        assert!(delta.should_have.is_empty());
        assert_eq!(delta.should_not_have, vec![10]);
    }

    #[test]
    fn zero_threshold_ranks_apply_to_everyone() {
        let ranks = vec![rank(1, 0)];
        let delta = compute_role_delta(&ranks, RankAssignmentStyle::All, &[], 0);
        assert_eq!(delta.should_have, vec![1]);
    }

    #[test]
    fn highest_ties_prefer_the_lowest_role_id() {
        let ranks = vec![rank(50, 10), rank(40, 10), rank(30, 2)];
        let target = target_roles(&ranks, RankAssignmentStyle::Highest, 10);
        assert_eq!(target.into_iter().collect::<Vec<_>>(), vec![40]);
    }

    #[test]
    fn same_inputs_give_the_same_delta() {
        let roles = [30, 10, 77];
        let first = compute_role_delta(&ladder(), RankAssignmentStyle::All, &roles, 11);
        let second = compute_role_delta(&ladder(), RankAssignmentStyle::All, &roles, 11);
        assert_eq!(first, second);
    }
}
