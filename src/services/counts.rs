use crate::db::entities::guilds;
use crate::error::Result;
use crate::services::clock::Clock;
use crate::services::store::bounded;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub guilds: u64,
    pub members: u64,
    pub refreshed_at: DateTime<Utc>,
}

/// Process-wide guild and member counts, reloaded once they are older than `staleness`.
pub struct CountsCache {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
    staleness: Duration,
    timeout: Duration,
    current: Mutex<Option<Counts>>,
}

impl CountsCache {
    pub fn new(
        db: DatabaseConnection,
        clock: Arc<dyn Clock>,
        staleness: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            staleness,
            timeout,
            current: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<Counts> {
        let mut current = self.current.lock().await;
        let now = self.clock.now();

        if let Some(counts) = *current {
            let age = (now - counts.refreshed_at).to_std().unwrap_or_default();
            if age < self.staleness {
                return Ok(counts);
            }
        }

        let counts = bounded("refresh_counts", None, self.timeout, self.load(now)).await?;
        debug!(guilds = counts.guilds, members = counts.members, "Refreshed counts");
        *current = Some(counts);
        Ok(counts)
    }

    /// Forces the next `get` to hit the store.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    async fn load(&self, now: DateTime<Utc>) -> Result<Counts> {
        let member_counts: Vec<i32> = guilds::Entity::find()
            .select_only()
            .column(guilds::Column::MemberCount)
            .filter(guilds::Column::DeletedAt.is_null())
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(Counts {
            guilds: member_counts.len() as u64,
            members: member_counts.iter().map(|&n| n.max(0) as u64).sum(),
            refreshed_at: now,
        })
    }
}
