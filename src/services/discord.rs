//! REST implementation of the platform collaborators.

use crate::services::gateway::{GuildActions, InviteSnapshot, InviteSource};
use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://discord.com/api/v10";

pub struct DiscordRest {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RawId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawInvite {
    code: String,
    #[serde(default)]
    uses: i32,
    #[serde(default)]
    max_uses: i32,
    #[serde(default)]
    max_age: i32,
    #[serde(default)]
    temporary: bool,
    created_at: Option<DateTime<Utc>>,
    inviter: Option<RawId>,
    channel: Option<RawId>,
}

#[derive(Debug, Deserialize)]
struct RawVanity {
    code: Option<String>,
    #[serde(default)]
    uses: i32,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    roles: Vec<String>,
}

fn parse_id(raw: &str) -> anyhow::Result<u64> {
    raw.parse().with_context(|| format!("invalid snowflake {raw:?}"))
}

impl RawInvite {
    fn into_snapshot(self) -> anyhow::Result<InviteSnapshot> {
        // Widget invites are generated by the guild itself and have no inviter
        let is_widget = self.inviter.is_none();
        Ok(InviteSnapshot {
            inviter_id: self.inviter.map(|u| parse_id(&u.id)).transpose()?,
            channel_id: self.channel.map(|c| parse_id(&c.id)).transpose()?,
            code: self.code,
            uses: self.uses,
            max_age: self.max_age,
            max_uses: self.max_uses,
            temporary: self.temporary,
            is_vanity: false,
            is_widget,
            created_at: self.created_at,
        })
    }
}

/// Audit log reasons travel in a header, which only takes visible ASCII.
fn header_safe(reason: &str) -> String {
    reason
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .take(512)
        .collect()
}

impl DiscordRest {
    pub fn new(token: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            token: token.into(),
            base_url: API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn vanity_invite(&self, guild_id: u64) -> anyhow::Result<Option<InviteSnapshot>> {
        let resp = self
            .request(Method::GET, &format!("/guilds/{guild_id}/vanity-url"))
            .send()
            .await?;

        // Guilds without the vanity feature answer 403
        if matches!(resp.status(), StatusCode::FORBIDDEN | StatusCode::NOT_FOUND) {
            return Ok(None);
        }

        let vanity: RawVanity = resp.error_for_status()?.json().await?;
        Ok(vanity.code.map(|code| InviteSnapshot::vanity(code, vanity.uses)))
    }

    /// Sends a role or ban mutation. `404` means the target is already gone, which counts as done.
    async fn mutate(&self, method: Method, path: &str, reason: &str) -> anyhow::Result<()> {
        let resp = self
            .request(method, path)
            .header("X-Audit-Log-Reason", header_safe(reason))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(path, "Target already absent, treating as success");
            return Ok(());
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{path} returned {status}: {body}"));
        }
        Ok(())
    }
}

#[async_trait]
impl InviteSource for DiscordRest {
    async fn list_invite_codes(&self, guild_id: u64) -> anyhow::Result<Vec<InviteSnapshot>> {
        let invites: Vec<RawInvite> = self
            .request(Method::GET, &format!("/guilds/{guild_id}/invites"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to decode guild invites")?;

        let mut snapshots = invites
            .into_iter()
            .map(RawInvite::into_snapshot)
            .collect::<anyhow::Result<Vec<_>>>()?;

        if let Some(vanity) = self.vanity_invite(guild_id).await? {
            snapshots.retain(|s| s.code != vanity.code);
            snapshots.push(vanity);
        }

        Ok(snapshots)
    }
}

#[async_trait]
impl GuildActions for DiscordRest {
    async fn member_roles(&self, guild_id: u64, member_id: u64) -> anyhow::Result<Option<Vec<u64>>> {
        let resp = self
            .request(Method::GET, &format!("/guilds/{guild_id}/members/{member_id}"))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let member: RawMember = resp.error_for_status()?.json().await?;
        let roles = member
            .roles
            .iter()
            .map(|r| parse_id(r))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Some(roles))
    }

    async fn add_role(&self, guild_id: u64, member_id: u64, role_id: u64, reason: &str) -> anyhow::Result<()> {
        self.mutate(
            Method::PUT,
            &format!("/guilds/{guild_id}/members/{member_id}/roles/{role_id}"),
            reason,
        )
        .await
    }

    async fn remove_role(&self, guild_id: u64, member_id: u64, role_id: u64, reason: &str) -> anyhow::Result<()> {
        self.mutate(
            Method::DELETE,
            &format!("/guilds/{guild_id}/members/{member_id}/roles/{role_id}"),
            reason,
        )
        .await
    }

    async fn unban(&self, guild_id: u64, member_id: u64, reason: &str) -> anyhow::Result<()> {
        self.mutate(
            Method::DELETE,
            &format!("/guilds/{guild_id}/bans/{member_id}"),
            reason,
        )
        .await
    }
}
