use crate::db::entities::scheduled_actions;
use crate::error::{Error, Result};
use crate::services::clock::Clock;
use crate::services::gateway::GuildActions;
use crate::services::store::bounded;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub mod actions;
pub mod runner;

pub use actions::ScheduledAction;

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub executed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Rows another poller marked while this one was running the handler.
    pub skipped: usize,
}

enum Outcome {
    Executed,
    Skipped,
    Retried,
    Failed,
}

/// Durable queue of delayed actions.
///
/// A row is pending until its handler succeeds, at which point it is soft-deleted. Execution is
/// at least once: a crash between the handler and the mark runs the handler again on the next
/// poll, so handlers must tolerate repeats.
pub struct SchedulerService {
    db: DatabaseConnection,
    actions: Arc<dyn GuildActions>,
    clock: Arc<dyn Clock>,
    max_attempts: i32,
    batch_size: u64,
    timeout: Duration,
    poll_lock: Mutex<()>,
}

impl SchedulerService {
    pub fn new(
        db: DatabaseConnection,
        actions: Arc<dyn GuildActions>,
        clock: Arc<dyn Clock>,
        max_attempts: i32,
        batch_size: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            actions,
            clock,
            max_attempts: max_attempts.max(1),
            batch_size: batch_size.max(1),
            timeout,
            poll_lock: Mutex::new(()),
        }
    }

    pub async fn schedule_action(
        &self,
        guild_id: u64,
        action: ScheduledAction,
        due_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<scheduled_actions::Model> {
        bounded("schedule_action", Some(guild_id), self.timeout, async {
            let model = scheduled_actions::ActiveModel {
                guild_id: Set(guild_id as i64),
                action_type: Set(action.action_type()),
                args: Set(action.to_args()?),
                due_at: Set(due_at.into()),
                reason: Set(reason),
                attempts: Set(0),
                last_error: Set(None),
                created_at: Set(self.clock.now().into()),
                executed_at: Set(None),
                failed_at: Set(None),
                deleted_at: Set(None),
                ..Default::default()
            }
            .insert(&self.db)
            .await?;

            info!(
                action_id = model.id,
                guild_id,
                action_type = %model.action_type,
                %due_at,
                "Scheduled action"
            );
            Ok(model)
        })
        .await
    }

    /// Removes an action that has not run yet. Executed actions cannot be cancelled.
    pub async fn cancel_action(&self, id: i32) -> Result<()> {
        bounded("cancel_action", None, self.timeout, async {
            let res = scheduled_actions::Entity::delete_many()
                .filter(scheduled_actions::Column::Id.eq(id))
                .filter(scheduled_actions::Column::DeletedAt.is_null())
                .exec(&self.db)
                .await?;

            if res.rows_affected == 0 {
                return Err(Error::not_found("scheduled action", id));
            }

            info!(action_id = id, "Cancelled scheduled action");
            Ok(())
        })
        .await
    }

    pub async fn get_action(&self, id: i32) -> Result<Option<scheduled_actions::Model>> {
        bounded("get_action", None, self.timeout, async {
            Ok(scheduled_actions::Entity::find_by_id(id)
                .one(&self.db)
                .await?)
        })
        .await
    }

    pub async fn list_pending_actions(&self, guild_id: u64) -> Result<Vec<scheduled_actions::Model>> {
        bounded("list_pending_actions", Some(guild_id), self.timeout, async {
            Ok(scheduled_actions::Entity::find()
                .filter(scheduled_actions::Column::GuildId.eq(guild_id as i64))
                .filter(scheduled_actions::Column::DeletedAt.is_null())
                .filter(scheduled_actions::Column::FailedAt.is_null())
                .order_by_asc(scheduled_actions::Column::DueAt)
                .all(&self.db)
                .await?)
        })
        .await
    }

    /// Actions that ran out of attempts and wait for an operator.
    pub async fn list_failed_actions(&self, guild_id: u64) -> Result<Vec<scheduled_actions::Model>> {
        bounded("list_failed_actions", Some(guild_id), self.timeout, async {
            Ok(scheduled_actions::Entity::find()
                .filter(scheduled_actions::Column::GuildId.eq(guild_id as i64))
                .filter(scheduled_actions::Column::DeletedAt.is_null())
                .filter(scheduled_actions::Column::FailedAt.is_not_null())
                .order_by_asc(scheduled_actions::Column::FailedAt)
                .all(&self.db)
                .await?)
        })
        .await
    }

    /// Runs every pending action that is due. Polls in this process never overlap.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let _guard = self.poll_lock.lock().await;
        let now = self.clock.now();

        let due = bounded("poll_scheduled_actions", None, self.timeout, async {
            let now: DateTimeWithTimeZone = now.into();
            Ok(scheduled_actions::Entity::find()
                .filter(scheduled_actions::Column::DeletedAt.is_null())
                .filter(scheduled_actions::Column::FailedAt.is_null())
                .filter(scheduled_actions::Column::DueAt.lte(now))
                .order_by_asc(scheduled_actions::Column::DueAt)
                .order_by_asc(scheduled_actions::Column::Id)
                .limit(self.batch_size)
                .all(&self.db)
                .await?)
        })
        .await?;

        let mut report = PollReport::default();
        for row in due {
            match self.run(row, now).await? {
                Outcome::Executed => report.executed += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Retried => report.retried += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        if report != PollReport::default() {
            info!(?report, "Scheduler poll finished");
        }
        Ok(report)
    }

    async fn run(&self, row: scheduled_actions::Model, now: DateTime<Utc>) -> Result<Outcome> {
        let guild_id = row.guild_id as u64;

        let action = match ScheduledAction::from_row(&row) {
            Ok(action) => action,
            Err(e) => {
                // An unreadable payload will never succeed
                error!(action_id = row.id, guild_id, error = %e, "Scheduled action payload is invalid");
                return self.record_failure(&row, &e.to_string(), now, true).await;
            }
        };

        let reason = row.reason.as_deref().unwrap_or("Scheduled action");
        let result = match tokio::time::timeout(
            self.timeout,
            action.execute(guild_id, reason, self.actions.as_ref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("handler timed out after {:?}", self.timeout)),
        };

        match result {
            Ok(()) => self.mark_executed(&row, now).await,
            Err(source) => {
                let err = Error::HandlerFailed {
                    action_id: row.id,
                    action_type: row.action_type.to_string(),
                    source,
                };
                warn!(guild_id, attempt = row.attempts + 1, error = %err, "Scheduled action failed");
                self.record_failure(&row, &format!("{err:#}"), now, false).await
            }
        }
    }

    async fn mark_executed(&self, row: &scheduled_actions::Model, now: DateTime<Utc>) -> Result<Outcome> {
        let id = row.id;
        let res = bounded("mark_action_executed", Some(row.guild_id as u64), self.timeout, async {
            let now: DateTimeWithTimeZone = now.into();
            Ok(scheduled_actions::Entity::update_many()
                .col_expr(scheduled_actions::Column::ExecutedAt, Expr::value(now))
                .col_expr(scheduled_actions::Column::DeletedAt, Expr::value(now))
                .filter(scheduled_actions::Column::Id.eq(id))
                .filter(scheduled_actions::Column::DeletedAt.is_null())
                .exec(&self.db)
                .await?)
        })
        .await?;

        if res.rows_affected == 0 {
            debug!(action_id = id, "Scheduled action was already marked executed");
            return Ok(Outcome::Skipped);
        }

        info!(action_id = id, action_type = %row.action_type, "Scheduled action executed");
        Ok(Outcome::Executed)
    }

    async fn record_failure(
        &self,
        row: &scheduled_actions::Model,
        message: &str,
        now: DateTime<Utc>,
        permanent: bool,
    ) -> Result<Outcome> {
        let attempts = row.attempts.saturating_add(1);
        let give_up = permanent || attempts >= self.max_attempts;
        let id = row.id;

        bounded("record_action_failure", Some(row.guild_id as u64), self.timeout, async {
            let failed_at: Option<DateTimeWithTimeZone> =
                give_up.then(|| now.into());
            scheduled_actions::Entity::update_many()
                .col_expr(scheduled_actions::Column::Attempts, Expr::value(attempts))
                .col_expr(
                    scheduled_actions::Column::LastError,
                    Expr::value(Some(message.to_string())),
                )
                .col_expr(scheduled_actions::Column::FailedAt, Expr::value(failed_at))
                .filter(scheduled_actions::Column::Id.eq(id))
                .filter(scheduled_actions::Column::DeletedAt.is_null())
                .exec(&self.db)
                .await?;
            Ok(())
        })
        .await?;

        if give_up {
            error!(action_id = id, attempts, "Scheduled action marked failed, operator attention needed");
            Ok(Outcome::Failed)
        } else {
            Ok(Outcome::Retried)
        }
    }
}
