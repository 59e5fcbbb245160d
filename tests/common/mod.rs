//! Shared fixtures for the integration tests: an in-memory store, a scripted platform and a
//! clock the tests move by hand.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use invite_ledger::Data;
use invite_ledger::config::AppConfig;
use invite_ledger::db::migrations::Migrator;
use invite_ledger::services::clock::ManualClock;
use invite_ledger::services::gateway::{GuildActions, InviteSnapshot, InviteSource};

pub const GUILD: u64 = 1_000;
pub const INVITER: u64 = 100;
pub const OTHER_INVITER: u64 = 200;

/// Create an in-memory SQLite database with every migration applied.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn create_test_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .expect("Failed to create test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run test migrations");

    db
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleCall {
    Add { member: u64, role: u64 },
    Remove { member: u64, role: u64 },
}

/// Platform stand-in. Invite lists and member roles are whatever the test puts in.
#[derive(Default)]
pub struct FakeGateway {
    invites: Mutex<HashMap<u64, Vec<InviteSnapshot>>>,
    roles: Mutex<HashMap<(u64, u64), Vec<u64>>>,
    role_calls: Mutex<Vec<RoleCall>>,
    unbans: Mutex<Vec<(u64, u64)>>,
    fail_actions: AtomicBool,
    invite_list_failures: AtomicUsize,
}

impl FakeGateway {
    pub fn set_invites(&self, guild_id: u64, invites: Vec<InviteSnapshot>) {
        self.invites.lock().unwrap().insert(guild_id, invites);
    }

    /// Bumps the use counter of `code`, as the platform does when someone joins through it.
    pub fn use_code(&self, guild_id: u64, code: &str) {
        let mut invites = self.invites.lock().unwrap();
        let invite = invites
            .get_mut(&guild_id)
            .and_then(|list| list.iter_mut().find(|i| i.code == code))
            .expect("code is not listed");
        invite.uses += 1;
    }

    pub fn remove_code(&self, guild_id: u64, code: &str) {
        if let Some(list) = self.invites.lock().unwrap().get_mut(&guild_id) {
            list.retain(|i| i.code != code);
        }
    }

    pub fn set_member_roles(&self, guild_id: u64, member_id: u64, roles: Vec<u64>) {
        self.roles.lock().unwrap().insert((guild_id, member_id), roles);
    }

    pub fn member_roles_now(&self, guild_id: u64, member_id: u64) -> Option<Vec<u64>> {
        self.roles.lock().unwrap().get(&(guild_id, member_id)).cloned()
    }

    pub fn role_calls(&self) -> Vec<RoleCall> {
        self.role_calls.lock().unwrap().clone()
    }

    pub fn unbans(&self) -> Vec<(u64, u64)> {
        self.unbans.lock().unwrap().clone()
    }

    /// Makes every role and ban mutation fail until switched back.
    pub fn fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `times` invite listings fail.
    pub fn fail_invite_lists(&self, times: usize) {
        self.invite_list_failures.store(times, Ordering::SeqCst);
    }

    fn check_failing(&self) -> anyhow::Result<()> {
        if self.fail_actions.load(Ordering::SeqCst) {
            anyhow::bail!("platform rejected the request");
        }
        Ok(())
    }
}

#[async_trait]
impl InviteSource for FakeGateway {
    async fn list_invite_codes(&self, guild_id: u64) -> anyhow::Result<Vec<InviteSnapshot>> {
        let failing = self
            .invite_list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("invite listing timed out");
        }

        Ok(self
            .invites
            .lock()
            .unwrap()
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl GuildActions for FakeGateway {
    async fn member_roles(&self, guild_id: u64, member_id: u64) -> anyhow::Result<Option<Vec<u64>>> {
        Ok(self.member_roles_now(guild_id, member_id))
    }

    async fn add_role(&self, guild_id: u64, member_id: u64, role_id: u64, _: &str) -> anyhow::Result<()> {
        self.check_failing()?;
        self.role_calls.lock().unwrap().push(RoleCall::Add {
            member: member_id,
            role: role_id,
        });
        let mut roles = self.roles.lock().unwrap();
        let held = roles.entry((guild_id, member_id)).or_default();
        if !held.contains(&role_id) {
            held.push(role_id);
        }
        Ok(())
    }

    async fn remove_role(&self, guild_id: u64, member_id: u64, role_id: u64, _: &str) -> anyhow::Result<()> {
        self.check_failing()?;
        self.role_calls.lock().unwrap().push(RoleCall::Remove {
            member: member_id,
            role: role_id,
        });
        if let Some(held) = self.roles.lock().unwrap().get_mut(&(guild_id, member_id)) {
            held.retain(|r| *r != role_id);
        }
        Ok(())
    }

    async fn unban(&self, guild_id: u64, member_id: u64, _: &str) -> anyhow::Result<()> {
        self.check_failing()?;
        self.unbans.lock().unwrap().push((guild_id, member_id));
        Ok(())
    }
}

pub struct TestEnv {
    pub data: Data,
    pub gateway: Arc<FakeGateway>,
    pub clock: Arc<ManualClock>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let db = create_test_db().await;
        let gateway = Arc::new(FakeGateway::default());
        let clock = Arc::new(ManualClock::new(start_time()));

        let data = Data::new(db, config, gateway.clone(), gateway.clone(), clock.clone());

        Self {
            data,
            gateway,
            clock,
        }
    }

    /// Moves the clock forward and returns the new "now".
    pub fn tick(&self, secs: i64) -> DateTime<Utc> {
        self.clock.advance(Duration::seconds(secs));
        invite_ledger::services::clock::Clock::now(self.clock.as_ref())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        scheduler_max_attempts: 3,
        event_retry_backoff: std::time::Duration::from_millis(10),
        ..AppConfig::default()
    }
}
