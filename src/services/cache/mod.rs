use crate::error::Result;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub mod invites;
pub mod ranks;
pub mod settings;

pub use invites::{GuildInvites, InviteTotals, InvitesCache};
pub use ranks::{GuildRanks, RanksCache};
pub use settings::SettingsCache;

type Loader<T> = Arc<dyn Fn(u64) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Values that can be looked up by a sub key inside one guild's cached entry.
pub trait GuildEntry {
    type Key: ?Sized;
    type Value;

    /// Must return a default value, never fail, for keys with no data.
    fn lookup(&self, key: &Self::Key) -> Self::Value;
}

/// Lazily loaded, per-guild cache.
///
/// The first `get` for a guild runs the loader; concurrent callers for the same guild wait on
/// that single load and share its result. A failed load leaves nothing behind, so the next
/// `get` tries again. Entries live until `flush`.
pub struct GuildCache<T> {
    name: &'static str,
    entries: DashMap<u64, Arc<OnceCell<Arc<T>>>>,
    loader: Loader<T>,
}

impl<T> GuildCache<T>
where
    T: Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: &'static str, loader: F) -> Self
    where
        F: Fn(u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name,
            entries: DashMap::new(),
            loader: Arc::new(move |guild_id| Box::pin(loader(guild_id))),
        }
    }

    pub async fn get(&self, guild_id: u64) -> Result<Arc<T>> {
        // Clone the cell out so no map shard lock is held across the load
        let cell = self.entries.entry(guild_id).or_default().clone();

        let value = cell
            .get_or_try_init(|| async {
                debug!(cache = self.name, guild_id, "Loading guild cache entry");
                (self.loader)(guild_id).await.map(Arc::new).inspect_err(|e| {
                    warn!(cache = self.name, guild_id, error = %e, "Guild cache load failed");
                })
            })
            .await?;

        Ok(Arc::clone(value))
    }

    /// Drops the cached entry; the next `get` reloads from the store.
    pub fn flush(&self, guild_id: u64) {
        if self.entries.remove(&guild_id).is_some() {
            debug!(cache = self.name, guild_id, "Flushed guild cache entry");
        }
    }

    pub fn is_loaded(&self, guild_id: u64) -> bool {
        self.entries
            .get(&guild_id)
            .is_some_and(|cell| cell.initialized())
    }
}

impl<T> GuildCache<T>
where
    T: GuildEntry + Send + Sync + 'static,
{
    pub async fn get_one(&self, guild_id: u64, key: &T::Key) -> Result<T::Value> {
        Ok(self.get(guild_id).await?.lookup(key))
    }
}
