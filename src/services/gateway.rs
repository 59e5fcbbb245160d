//! Collaborators owned by the chat platform side.
//!
//! The tracking core never talks to the platform directly; it is handed implementations of
//! these traits (the REST adapter in [`crate::services::discord`] in production, in-memory
//! fakes in tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One invite code as currently reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteSnapshot {
    pub code: String,
    pub uses: i32,
    pub inviter_id: Option<u64>,
    pub channel_id: Option<u64>,
    pub max_age: i32,
    pub max_uses: i32,
    pub temporary: bool,
    pub is_vanity: bool,
    pub is_widget: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl InviteSnapshot {
    /// A regular invite created by `inviter_id`.
    pub fn regular(code: impl Into<String>, uses: i32, inviter_id: u64) -> Self {
        Self {
            code: code.into(),
            uses,
            inviter_id: Some(inviter_id),
            channel_id: None,
            max_age: 0,
            max_uses: 0,
            temporary: false,
            is_vanity: false,
            is_widget: false,
            created_at: None,
        }
    }

    pub fn vanity(code: impl Into<String>, uses: i32) -> Self {
        Self {
            inviter_id: None,
            is_vanity: true,
            ..Self::regular(code, uses, 0)
        }
    }
}

#[async_trait]
pub trait InviteSource: Send + Sync {
    async fn list_invite_codes(&self, guild_id: u64) -> anyhow::Result<Vec<InviteSnapshot>>;
}

/// Role and ban mutations. Implementations must treat "already in the requested state" as
/// success so that retried scheduled actions stay harmless.
#[async_trait]
pub trait GuildActions: Send + Sync {
    /// `None` when the member is no longer in the guild.
    async fn member_roles(&self, guild_id: u64, member_id: u64) -> anyhow::Result<Option<Vec<u64>>>;

    async fn add_role(
        &self,
        guild_id: u64,
        member_id: u64,
        role_id: u64,
        reason: &str,
    ) -> anyhow::Result<()>;

    async fn remove_role(
        &self,
        guild_id: u64,
        member_id: u64,
        role_id: u64,
        reason: &str,
    ) -> anyhow::Result<()>;

    async fn unban(&self, guild_id: u64, member_id: u64, reason: &str) -> anyhow::Result<()>;
}

/// Stand-in for offline commands that have no platform connection. Every call fails.
pub struct Disconnected;

fn disconnected<T>() -> anyhow::Result<T> {
    Err(anyhow::anyhow!("no platform connection configured"))
}

#[async_trait]
impl InviteSource for Disconnected {
    async fn list_invite_codes(&self, _guild_id: u64) -> anyhow::Result<Vec<InviteSnapshot>> {
        disconnected()
    }
}

#[async_trait]
impl GuildActions for Disconnected {
    async fn member_roles(&self, _guild_id: u64, _member_id: u64) -> anyhow::Result<Option<Vec<u64>>> {
        disconnected()
    }

    async fn add_role(&self, _: u64, _: u64, _: u64, _: &str) -> anyhow::Result<()> {
        disconnected()
    }

    async fn remove_role(&self, _: u64, _: u64, _: u64, _: &str) -> anyhow::Result<()> {
        disconnected()
    }

    async fn unban(&self, _: u64, _: u64, _: &str) -> anyhow::Result<()> {
        disconnected()
    }
}
