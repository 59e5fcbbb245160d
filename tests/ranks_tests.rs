//! Rank Integration Tests
//!
//! Covers:
//! - Adding, listing and removing ranks
//! - Threshold validation
//! - Promotion and demotion as an inviter's total moves

mod common;

use common::{GUILD, INVITER, RoleCall, TestEnv};

use invite_ledger::Error;
use invite_ledger::db::entities::guild_settings::RankAssignmentStyle;
use invite_ledger::modules::invite_tracking::{self, add_custom_invite, on_member_join, on_member_leave};
use invite_ledger::modules::ranks::{add_rank, list_ranks, promote_if_qualified, remove_rank};
use invite_ledger::services::gateway::InviteSnapshot;
use invite_ledger::services::settings::update_settings;

const BRONZE: u64 = 10;
const SILVER: u64 = 20;
const UNRELATED: u64 = 99;

async fn env_with_ladder() -> TestEnv {
    let env = TestEnv::new().await;
    add_rank(GUILD, BRONZE, 1, Some("Bronze".into()), &env.data).await.unwrap();
    add_rank(GUILD, SILVER, 2, None, &env.data).await.unwrap();

    let invite = InviteSnapshot::regular("abc", 0, INVITER);
    env.gateway.set_invites(GUILD, vec![invite.clone()]);
    invite_tracking::events::on_invite_create(GUILD, &invite, &env.data)
        .await
        .unwrap();
    env.gateway.set_member_roles(GUILD, INVITER, vec![UNRELATED]);
    env
}

async fn join_through_abc(env: &TestEnv, member: u64) {
    env.gateway.use_code(GUILD, "abc");
    on_member_join(GUILD, member, None, env.tick(1), &env.data)
        .await
        .unwrap();
}

#[tokio::test]
async fn ranks_are_listed_by_threshold() {
    let env = TestEnv::new().await;
    add_rank(GUILD, SILVER, 5, None, &env.data).await.unwrap();
    add_rank(GUILD, BRONZE, 1, Some("Bronze".into()), &env.data).await.unwrap();

    let ranks = list_ranks(GUILD, &env.data).await.unwrap();

    let roles: Vec<u64> = ranks.iter().map(|r| r.role_id).collect();
    assert_eq!(roles, vec![BRONZE, SILVER]);
    assert_eq!(ranks[0].description.as_deref(), Some("Bronze"));
}

#[tokio::test]
async fn adding_a_rank_twice_updates_it() {
    let env = TestEnv::new().await;
    add_rank(GUILD, BRONZE, 1, None, &env.data).await.unwrap();
    add_rank(GUILD, BRONZE, 4, None, &env.data).await.unwrap();

    let ranks = list_ranks(GUILD, &env.data).await.unwrap();
    assert_eq!(ranks.len(), 1);
    assert_eq!(ranks[0].num_invites, 4);
}

#[tokio::test]
async fn removed_rank_disappears_and_can_come_back() {
    let env = TestEnv::new().await;
    add_rank(GUILD, BRONZE, 1, None, &env.data).await.unwrap();

    remove_rank(GUILD, BRONZE, &env.data).await.unwrap();
    assert!(list_ranks(GUILD, &env.data).await.unwrap().is_empty());

    let err = remove_rank(GUILD, BRONZE, &env.data).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    add_rank(GUILD, BRONZE, 2, None, &env.data).await.unwrap();
    assert_eq!(list_ranks(GUILD, &env.data).await.unwrap().len(), 1);
}

#[tokio::test]
async fn threshold_must_fit() {
    let env = TestEnv::new().await;

    let err = add_rank(GUILD, BRONZE, -1, None, &env.data).await.unwrap_err();
    assert!(matches!(err, Error::OutOfRange { field: "num_invites", .. }));

    let err = add_rank(GUILD, BRONZE, i64::from(i32::MAX) + 1, None, &env.data)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OutOfRange { .. }));

    assert!(list_ranks(GUILD, &env.data).await.unwrap().is_empty());
}

#[tokio::test]
async fn inviter_climbs_the_ladder() {
    let env = env_with_ladder().await;

    join_through_abc(&env, 1).await;
    assert_eq!(
        env.gateway.member_roles_now(GUILD, INVITER).unwrap(),
        vec![UNRELATED, BRONZE]
    );

    join_through_abc(&env, 2).await;
    assert_eq!(
        env.gateway.member_roles_now(GUILD, INVITER).unwrap(),
        vec![UNRELATED, BRONZE, SILVER]
    );
}

#[tokio::test]
async fn highest_style_keeps_a_single_rank() {
    let env = env_with_ladder().await;
    update_settings(GUILD, &env.data, |s| {
        s.rank_assignment_style = RankAssignmentStyle::Highest
    })
    .await
    .unwrap();

    join_through_abc(&env, 1).await;
    join_through_abc(&env, 2).await;

    assert_eq!(
        env.gateway.member_roles_now(GUILD, INVITER).unwrap(),
        vec![UNRELATED, SILVER]
    );
    assert!(env.gateway.role_calls().contains(&RoleCall::Remove {
        member: INVITER,
        role: BRONZE,
    }));
}

#[tokio::test]
async fn early_leave_demotes_the_inviter() {
    let env = env_with_ladder().await;

    join_through_abc(&env, 1).await;
    join_through_abc(&env, 2).await;
    on_member_leave(GUILD, 2, None, env.tick(5), &env.data)
        .await
        .unwrap();

    assert_eq!(
        env.gateway.member_roles_now(GUILD, INVITER).unwrap(),
        vec![UNRELATED, BRONZE]
    );
}

#[tokio::test]
async fn custom_invites_promote() {
    let env = env_with_ladder().await;

    add_custom_invite(GUILD, INVITER, None, 2, None, &env.data)
        .await
        .unwrap();

    let roles = env.gateway.member_roles_now(GUILD, INVITER).unwrap();
    assert!(roles.contains(&BRONZE));
    assert!(roles.contains(&SILVER));
}

#[tokio::test]
async fn promotion_skips_members_who_left() {
    let env = env_with_ladder().await;

    let applied = promote_if_qualified(GUILD, 12345, 10, &env.data).await.unwrap();

    assert!(applied.is_none());
    assert!(env.gateway.role_calls().is_empty());
}

#[tokio::test]
async fn promotion_failure_does_not_fail_the_join() {
    let env = env_with_ladder().await;
    env.gateway.fail_actions(true);

    join_through_abc(&env, 1).await;

    assert_eq!(
        invite_tracking::get_totals(GUILD, INVITER, &env.data)
            .await
            .unwrap()
            .total,
        1
    );
    assert_eq!(
        env.gateway.member_roles_now(GUILD, INVITER).unwrap(),
        vec![UNRELATED]
    );
}
