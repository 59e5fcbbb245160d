//! Scheduled Action Integration Tests
//!
//! Covers:
//! - Due actions run once, even across repeated polls
//! - Failing handlers are retried, then parked as failed
//! - Cancelling pending and already executed actions
//! - Rows whose payload cannot be decoded

mod common;

use chrono::Duration;
use common::{GUILD, RoleCall, TestEnv};

use invite_ledger::Error;
use invite_ledger::db::entities::scheduled_actions::{self, ActionType};
use invite_ledger::services::scheduler::ScheduledAction;
use sea_orm::{ActiveModelTrait, Set};

const MUTED_ROLE: u64 = 77;
const MEMBER: u64 = 5;

fn unmute() -> ScheduledAction {
    ScheduledAction::Unmute {
        member_id: MEMBER,
        role_id: MUTED_ROLE,
    }
}

#[tokio::test]
async fn action_waits_until_due() {
    let env = TestEnv::new().await;
    let scheduler = &env.data.scheduler;
    env.gateway.set_member_roles(GUILD, MEMBER, vec![MUTED_ROLE]);

    let due_at = env.tick(0) + Duration::minutes(10);
    scheduler
        .schedule_action(GUILD, unmute(), due_at, Some("Mute expired".into()))
        .await
        .unwrap();

    let report = scheduler.poll_once().await.unwrap();
    assert_eq!(report.executed, 0);
    assert_eq!(scheduler.list_pending_actions(GUILD).await.unwrap().len(), 1);

    env.tick(10 * 60);
    let report = scheduler.poll_once().await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(
        env.gateway.role_calls(),
        vec![RoleCall::Remove {
            member: MEMBER,
            role: MUTED_ROLE,
        }]
    );
    assert!(scheduler.list_pending_actions(GUILD).await.unwrap().is_empty());
}

#[tokio::test]
async fn unmute_runs_once_when_role_is_already_gone() {
    let env = TestEnv::new().await;
    let scheduler = &env.data.scheduler;
    env.gateway.set_member_roles(GUILD, MEMBER, vec![]);

    let row = scheduler
        .schedule_action(GUILD, unmute(), env.tick(0), None)
        .await
        .unwrap();

    let first = scheduler.poll_once().await.unwrap();
    let second = scheduler.poll_once().await.unwrap();

    assert_eq!(first.executed, 1);
    assert_eq!(second.executed, 0);
    assert!(env.gateway.role_calls().is_empty());

    let stored = scheduler.get_action(row.id).await.unwrap().unwrap();
    assert!(stored.executed_at.is_some());
    assert!(stored.deleted_at.is_some());
}

#[tokio::test]
async fn failing_action_is_parked_after_max_attempts() {
    let env = TestEnv::new().await;
    let scheduler = &env.data.scheduler;
    env.gateway.fail_actions(true);

    scheduler
        .schedule_action(GUILD, ScheduledAction::Unban { member_id: MEMBER }, env.tick(0), None)
        .await
        .unwrap();

    assert_eq!(scheduler.poll_once().await.unwrap().retried, 1);
    assert_eq!(scheduler.poll_once().await.unwrap().retried, 1);
    assert_eq!(scheduler.poll_once().await.unwrap().failed, 1);

    let failed = scheduler.list_failed_actions(GUILD).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 3);
    assert!(failed[0].last_error.as_deref().unwrap().contains("platform rejected"));

    // Parked actions are not picked up again
    env.gateway.fail_actions(false);
    assert_eq!(scheduler.poll_once().await.unwrap(), Default::default());
    assert!(env.gateway.unbans().is_empty());
}

#[tokio::test]
async fn retried_action_succeeds_later() {
    let env = TestEnv::new().await;
    let scheduler = &env.data.scheduler;
    env.gateway.fail_actions(true);

    scheduler
        .schedule_action(GUILD, ScheduledAction::Unban { member_id: MEMBER }, env.tick(0), None)
        .await
        .unwrap();
    assert_eq!(scheduler.poll_once().await.unwrap().retried, 1);

    env.gateway.fail_actions(false);
    assert_eq!(scheduler.poll_once().await.unwrap().executed, 1);
    assert_eq!(env.gateway.unbans(), vec![(GUILD, MEMBER)]);
}

#[tokio::test]
async fn cancelled_action_never_runs() {
    let env = TestEnv::new().await;
    let scheduler = &env.data.scheduler;

    let row = scheduler
        .schedule_action(GUILD, ScheduledAction::Unban { member_id: MEMBER }, env.tick(0), None)
        .await
        .unwrap();

    scheduler.cancel_action(row.id).await.unwrap();
    assert!(scheduler.get_action(row.id).await.unwrap().is_none());

    assert_eq!(scheduler.poll_once().await.unwrap().executed, 0);
    assert!(env.gateway.unbans().is_empty());

    let err = scheduler.cancel_action(row.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn executed_action_cannot_be_cancelled() {
    let env = TestEnv::new().await;
    let scheduler = &env.data.scheduler;

    let row = scheduler
        .schedule_action(GUILD, ScheduledAction::Unban { member_id: MEMBER }, env.tick(0), None)
        .await
        .unwrap();
    scheduler.poll_once().await.unwrap();

    let err = scheduler.cancel_action(row.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn undecodable_payload_fails_immediately() {
    let env = TestEnv::new().await;
    let scheduler = &env.data.scheduler;
    let now = env.tick(0);

    let row = scheduled_actions::ActiveModel {
        guild_id: Set(GUILD as i64),
        action_type: Set(ActionType::Unmute),
        args: Set(serde_json::json!({ "type": "unban", "member_id": MEMBER })),
        due_at: Set(now.into()),
        reason: Set(None),
        attempts: Set(0),
        last_error: Set(None),
        created_at: Set(now.into()),
        executed_at: Set(None),
        failed_at: Set(None),
        deleted_at: Set(None),
        ..Default::default()
    }
    .insert(&env.data.db)
    .await
    .unwrap();

    let report = scheduler.poll_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = scheduler.get_action(row.id).await.unwrap().unwrap();
    assert!(stored.failed_at.is_some());
    assert!(env.gateway.unbans().is_empty());
}
