//! Show metadata refresh: pulls a show from the metadata service and stores it.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::connectivity::ConnectivityGate;
use crate::db::{self, ChangeNotifier, ChangeTopic, Pool};
use crate::model::{DiscoveredShow, ShowId};
use crate::tvdb::{FetchError, MetadataService};

/// Takes shows found in remote activity and adds them to the library.
#[async_trait]
pub trait ShowInserter: Send + Sync {
    /// Returns how many shows were actually added.
    async fn add_shows(&self, shows: &[DiscoveredShow]) -> usize;
}

#[derive(Clone)]
pub struct ShowFetcher {
    pool: Pool,
    metadata: Arc<dyn MetadataService>,
    changes: ChangeNotifier,
    stale_after: Duration,
    gate: Option<Arc<dyn ConnectivityGate>>,
}

impl ShowFetcher {
    pub fn new(
        pool: Pool,
        metadata: Arc<dyn MetadataService>,
        changes: ChangeNotifier,
        stale_after: Duration,
    ) -> Self {
        Self {
            pool,
            metadata,
            changes,
            stale_after,
            gate: None,
        }
    }

    /// Consult `gate` before each network call made while adding shows.
    pub fn with_gate(mut self, gate: Arc<dyn ConnectivityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn network_allowed(&self) -> bool {
        self.gate.as_ref().map_or(true, |g| g.is_allowed())
    }

    /// Refresh one show. On success the episode topic is broadcast so views
    /// showing this show reload.
    #[instrument(skip(self))]
    pub async fn update_show(&self, show_id: ShowId) -> Result<(), FetchError> {
        let meta = self.metadata.fetch_show(show_id).await?;
        db::upsert_show(&self.pool, &meta, Utc::now().timestamp_millis()).await?;
        self.changes.notify(ChangeTopic::Episodes);
        Ok(())
    }

    pub async fn list_stale_targets(&self, now: DateTime<Utc>) -> Result<Vec<ShowId>> {
        let cutoff = now - self.stale_after;
        db::list_stale_show_ids(&self.pool, cutoff.timestamp_millis()).await
    }

    pub async fn list_all_targets(&self) -> Result<Vec<ShowId>> {
        db::list_show_ids(&self.pool).await
    }

    /// Title for progress and failure reports; falls back to the id.
    pub async fn display_name(&self, show_id: ShowId) -> String {
        match db::show_title(&self.pool, show_id).await {
            Ok(Some(title)) => title,
            Ok(None) => show_id.to_string(),
            Err(err) => {
                warn!(?err, show_id, "failed to read show title");
                show_id.to_string()
            }
        }
    }
}

#[async_trait]
impl ShowInserter for ShowFetcher {
    async fn add_shows(&self, shows: &[DiscoveredShow]) -> usize {
        let existing = match db::existing_show_ids(&self.pool).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(?err, "cannot list shows, skipping discovered shows");
                return 0;
            }
        };

        let mut added = 0;
        for show in shows.iter().filter(|s| !existing.contains(&s.show_id)) {
            if !self.network_allowed() {
                info!(added, "offline, stopped adding discovered shows");
                break;
            }
            match self.update_show(show.show_id).await {
                Ok(()) => {
                    info!(show_id = show.show_id, title = %show.title, "added discovered show");
                    added += 1;
                }
                Err(FetchError::Transport(err)) => {
                    warn!(%err, show_id = show.show_id, "transport error, stopped adding shows");
                    break;
                }
                Err(err) => {
                    warn!(?err, show_id = show.show_id, title = %show.title, "failed to add show");
                }
            }
        }
        if added > 0 {
            self.changes.notify(ChangeTopic::Shows);
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::NetworkGate;
    use crate::model::{EpisodeMetadata, ShowMetadata};
    use std::sync::Mutex;

    struct StaticMetadata {
        calls: Mutex<Vec<ShowId>>,
        /// Drops the connection once this show has been fetched.
        offline_after: Mutex<Option<(ShowId, Arc<NetworkGate>)>>,
    }

    #[async_trait]
    impl MetadataService for StaticMetadata {
        async fn fetch_show(&self, show_id: ShowId) -> Result<ShowMetadata, FetchError> {
            self.calls.lock().unwrap().push(show_id);
            if let Some((trigger, gate)) = self.offline_after.lock().unwrap().as_ref() {
                if *trigger == show_id {
                    gate.set_online(false);
                }
            }
            if show_id == 404 {
                return Err(FetchError::NotFound(show_id));
            }
            Ok(ShowMetadata {
                show_id,
                title: format!("Show {}", show_id),
                overview: None,
                status: None,
                episodes: vec![EpisodeMetadata {
                    episode_id: show_id * 100,
                    season: 1,
                    number: 1,
                    title: None,
                    overview: None,
                    first_aired: None,
                }],
            })
        }
    }

    async fn fetcher() -> (ShowFetcher, Arc<StaticMetadata>, Pool) {
        let pool = db::memory_pool().await.unwrap();
        let metadata = Arc::new(StaticMetadata {
            calls: Mutex::new(Vec::new()),
            offline_after: Mutex::new(None),
        });
        let fetcher = ShowFetcher::new(
            pool.clone(),
            metadata.clone(),
            ChangeNotifier::new(),
            Duration::hours(12),
        );
        (fetcher, metadata, pool)
    }

    #[tokio::test]
    async fn update_show_stores_and_notifies() {
        let (fetcher, _metadata, pool) = fetcher().await;
        let mut changes = fetcher.changes.subscribe();

        fetcher.update_show(5).await.unwrap();

        assert_eq!(db::show_title(&pool, 5).await.unwrap().as_deref(), Some("Show 5"));
        assert_eq!(changes.try_recv().unwrap(), ChangeTopic::Episodes);
        assert_eq!(fetcher.display_name(5).await, "Show 5");
        assert_eq!(fetcher.display_name(6).await, "6");
    }

    #[tokio::test]
    async fn fresh_shows_are_not_stale() {
        let (fetcher, _metadata, _pool) = fetcher().await;
        fetcher.update_show(1).await.unwrap();

        assert!(fetcher.list_stale_targets(Utc::now()).await.unwrap().is_empty());
        let later = Utc::now() + Duration::hours(13);
        assert_eq!(fetcher.list_stale_targets(later).await.unwrap(), vec![1]);
        assert_eq!(fetcher.list_all_targets().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn add_shows_skips_existing_and_failures() {
        let (fetcher, metadata, _pool) = fetcher().await;
        fetcher.update_show(1).await.unwrap();
        metadata.calls.lock().unwrap().clear();

        let added = fetcher
            .add_shows(&[
                DiscoveredShow { show_id: 1, title: "Known".into() },
                DiscoveredShow { show_id: 2, title: "New".into() },
                DiscoveredShow { show_id: 404, title: "Gone".into() },
            ])
            .await;

        assert_eq!(added, 1);
        assert_eq!(*metadata.calls.lock().unwrap(), vec![2, 404]);
    }

    #[tokio::test]
    async fn add_shows_stops_when_connection_drops() {
        let (fetcher, metadata, pool) = fetcher().await;
        let gate = Arc::new(NetworkGate::new(false));
        *metadata.offline_after.lock().unwrap() = Some((2, gate.clone()));
        let fetcher = fetcher.with_gate(gate);

        let added = fetcher
            .add_shows(&[
                DiscoveredShow { show_id: 2, title: "First".into() },
                DiscoveredShow { show_id: 3, title: "Second".into() },
                DiscoveredShow { show_id: 4, title: "Third".into() },
            ])
            .await;

        assert_eq!(added, 1);
        assert_eq!(*metadata.calls.lock().unwrap(), vec![2]);
        assert_eq!(db::count_shows(&pool).await.unwrap(), 1);
    }
}
