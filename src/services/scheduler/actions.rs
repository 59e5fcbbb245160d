use crate::db::entities::scheduled_actions::{self, ActionType};
use crate::error::{Error, Result};
use crate::services::gateway::GuildActions;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Payload of a scheduled action. The variant decides which handler runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduledAction {
    /// Take the muted role away again.
    Unmute { member_id: u64, role_id: u64 },
    /// Lift a temporary ban.
    Unban { member_id: u64 },
}

impl ScheduledAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            ScheduledAction::Unmute { .. } => ActionType::Unmute,
            ScheduledAction::Unban { .. } => ActionType::Unban,
        }
    }

    pub fn member_id(&self) -> u64 {
        match self {
            ScheduledAction::Unmute { member_id, .. } | ScheduledAction::Unban { member_id } => {
                *member_id
            }
        }
    }

    pub fn to_args(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes a stored row. The `action_type` column and the payload tag must agree.
    pub fn from_row(row: &scheduled_actions::Model) -> Result<Self> {
        let action: ScheduledAction = serde_json::from_value(row.args.clone())?;
        if action.action_type() != row.action_type {
            return Err(Error::InvalidInput(format!(
                "scheduled action {} is stored as {} but its payload is {}",
                row.id,
                row.action_type,
                action.action_type()
            )));
        }
        Ok(action)
    }

    /// Runs the action. Safe to repeat: an action whose effect is already in place succeeds
    /// without touching the guild.
    pub async fn execute(
        &self,
        guild_id: u64,
        reason: &str,
        actions: &dyn GuildActions,
    ) -> anyhow::Result<()> {
        match *self {
            ScheduledAction::Unmute { member_id, role_id } => {
                let Some(roles) = actions.member_roles(guild_id, member_id).await? else {
                    debug!(guild_id, member_id, "Unmute target left the guild, nothing to do");
                    return Ok(());
                };

                if !roles.contains(&role_id) {
                    debug!(guild_id, member_id, role_id, "Muted role already removed");
                    return Ok(());
                }

                actions
                    .remove_role(guild_id, member_id, role_id, reason)
                    .await?;
                info!(guild_id, member_id, role_id, "Unmuted member");
            }
            ScheduledAction::Unban { member_id } => {
                actions.unban(guild_id, member_id, reason).await?;
                info!(guild_id, member_id, "Unbanned member");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_by_type() {
        let action = ScheduledAction::Unmute {
            member_id: 5,
            role_id: 9,
        };
        let args = action.to_args().unwrap();

        assert_eq!(
            args,
            serde_json::json!({ "type": "unmute", "member_id": 5, "role_id": 9 })
        );
        assert_eq!(action.action_type(), ActionType::Unmute);
        assert_eq!(action.member_id(), 5);
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let now = chrono::Utc::now().fixed_offset();
        let row = scheduled_actions::Model {
            id: 1,
            guild_id: 1,
            action_type: ActionType::Unban,
            args: serde_json::json!({ "type": "unmute", "member_id": 5, "role_id": 9 }),
            due_at: now,
            reason: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            executed_at: None,
            failed_at: None,
            deleted_at: None,
        };

        assert!(matches!(
            ScheduledAction::from_row(&row),
            Err(Error::InvalidInput(_))
        ));
    }
}
