//! Durable key/value settings: checkpoints, backoff counters and flags.
use crate::db::{self, Pool};
use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

/// Last successful (or backed-off) update, epoch milliseconds.
pub const KEY_LAST_UPDATE: &str = "update.last_update";
pub const KEY_FAILED_COUNTER: &str = "update.failed_counter";
/// Server-side time of the last applied activity feed, epoch milliseconds.
pub const KEY_LAST_TRAKT_UPDATE: &str = "trakt.last_update";
pub const KEY_TMDB_BASE_URL: &str = "tmdb.base_url";
pub const KEY_AUTO_ADD_TRAKT_SHOWS: &str = "trakt.auto_add_shows";

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Commit all entries together, like a single preferences edit.
    async fn put_all(&self, entries: &[(&str, String)]) -> Result<()>;

    async fn get_i64(&self, key: &str, default: i64) -> Result<i64> {
        Ok(match self.get(key).await? {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, raw = %raw, "unparsable integer setting, using default");
                default
            }),
            None => default,
        })
    }

    async fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get(key).await? {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, raw = %raw, "unparsable boolean setting, using default");
                default
            }),
            None => default,
        })
    }
}

/// Settings persisted in the `settings` table of the content database.
#[derive(Debug, Clone)]
pub struct SqliteSettings {
    pool: Pool,
}

impl SqliteSettings {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettings {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        db::get_setting(&self.pool, key).await
    }

    async fn put_all(&self, entries: &[(&str, String)]) -> Result<()> {
        db::put_settings(&self.pool, entries).await
    }
}
