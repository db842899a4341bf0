#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use showsync::connectivity::NetworkGate;
use showsync::db::{self, ChangeNotifier, Pool};
use showsync::fetcher::{ShowFetcher, ShowInserter};
use showsync::model::{ActivityFeed, DiscoveredShow, EpisodeMetadata, ShowId, ShowMetadata};
use showsync::reconcile::ActivityReconciler;
use showsync::settings::{SettingsStore, SqliteSettings};
use showsync::tmdb::ImageConfigService;
use showsync::trakt::{ActivityError, ActivityService};
use showsync::tvdb::{FetchError, MetadataService};
use showsync::update::{ProgressEvent, ProgressSink, UpdateDeps};

/// Side effect fired right after a show was fetched.
#[derive(Clone)]
pub enum Hook {
    Cancel(CancellationToken),
    GoOffline(Arc<NetworkGate>),
}

pub fn episodes_for(show_id: ShowId) -> Vec<EpisodeMetadata> {
    let aired = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    (1..=3)
        .map(|number| EpisodeMetadata {
            episode_id: show_id * 100 + number as i64,
            season: 1,
            number,
            title: Some(format!("Episode {}", number)),
            overview: None,
            first_aired: Some(aired + Duration::weeks(number as i64)),
        })
        .collect()
}

/// Metadata service answering from per-show scripts; unscripted calls succeed.
#[derive(Clone, Default)]
pub struct RecordingMetadata {
    scripts: Arc<Mutex<HashMap<ShowId, VecDeque<bool>>>>,
    hooks: Arc<Mutex<HashMap<ShowId, Hook>>>,
    calls: Arc<Mutex<Vec<ShowId>>>,
    /// When set, every fetch signals `started` and waits for `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl RecordingMetadata {
    pub fn blocking(started: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((started, release)),
            ..Default::default()
        }
    }

    /// `true` entries succeed, `false` entries fail.
    pub async fn script(&self, show_id: ShowId, outcomes: &[bool]) {
        self.scripts
            .lock()
            .await
            .insert(show_id, outcomes.iter().copied().collect());
    }

    pub async fn hook(&self, show_id: ShowId, hook: Hook) {
        self.hooks.lock().await.insert(show_id, hook);
    }

    pub async fn calls(&self) -> Vec<ShowId> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }
}

#[async_trait]
impl MetadataService for RecordingMetadata {
    async fn fetch_show(&self, show_id: ShowId) -> Result<ShowMetadata, FetchError> {
        self.calls.lock().await.push(show_id);
        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }

        let ok = self
            .scripts
            .lock()
            .await
            .get_mut(&show_id)
            .and_then(|s| s.pop_front())
            .unwrap_or(true);

        if let Some(hook) = self.hooks.lock().await.get(&show_id) {
            match hook {
                Hook::Cancel(token) => token.cancel(),
                Hook::GoOffline(gate) => gate.set_online(false),
            }
        }

        if !ok {
            return Err(FetchError::Other(format!("scripted failure for {}", show_id)));
        }
        Ok(ShowMetadata {
            show_id,
            title: format!("Show {}", show_id),
            overview: None,
            status: Some("Continuing".into()),
            episodes: episodes_for(show_id),
        })
    }
}

#[derive(Clone, Default)]
pub struct RecordingActivity {
    configured: bool,
    responses: Arc<Mutex<VecDeque<Result<ActivityFeed, ActivityError>>>>,
    calls: Arc<Mutex<Vec<i64>>>,
}

impl RecordingActivity {
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<ActivityFeed, ActivityError>>) -> Self {
        Self {
            configured: true,
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<i64> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ActivityService for RecordingActivity {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn fetch_activity(&self, since_secs: i64) -> Result<ActivityFeed, ActivityError> {
        self.calls.lock().await.push(since_secs);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(ActivityError::MissingActivity))
    }
}

#[derive(Clone)]
pub struct RecordingImages {
    base_url: Option<String>,
    calls: Arc<Mutex<usize>>,
    cancel_on_call: Arc<Mutex<Option<CancellationToken>>>,
}

impl RecordingImages {
    pub fn returning(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.map(str::to_string),
            calls: Arc::new(Mutex::new(0)),
            cancel_on_call: Arc::new(Mutex::new(None)),
        }
    }

    /// Cancel `token` while the image config request is in flight.
    pub async fn cancel_on_call(&self, token: CancellationToken) {
        *self.cancel_on_call.lock().await = Some(token);
    }

    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl ImageConfigService for RecordingImages {
    async fn image_base_url(&self) -> Result<Option<String>> {
        *self.calls.lock().await += 1;
        if let Some(token) = self.cancel_on_call.lock().await.as_ref() {
            token.cancel();
        }
        match &self.base_url {
            Some(url) if url == "error" => Err(anyhow!("scripted image config failure")),
            other => Ok(other.clone()),
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingInserter {
    batches: Arc<Mutex<Vec<Vec<DiscoveredShow>>>>,
}

impl RecordingInserter {
    pub async fn batches(&self) -> Vec<Vec<DiscoveredShow>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl ShowInserter for RecordingInserter {
    async fn add_shows(&self, shows: &[DiscoveredShow]) -> usize {
        self.batches.lock().await.push(shows.to_vec());
        shows.len()
    }
}

#[derive(Default)]
pub struct RecordingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub pool: Pool,
    pub metadata: RecordingMetadata,
    pub activity: RecordingActivity,
    pub images: RecordingImages,
    pub inserter: RecordingInserter,
    pub gate: Arc<NetworkGate>,
    pub settings: Arc<SqliteSettings>,
    pub deps: UpdateDeps,
}

impl Harness {
    pub async fn new(metadata: RecordingMetadata, activity: RecordingActivity) -> Harness {
        let pool = db::memory_pool().await.unwrap();
        let images = RecordingImages::returning(Some("https://image.tmdb.org/t/p/"));
        let inserter = RecordingInserter::default();
        let gate = Arc::new(NetworkGate::new(false));
        let settings = Arc::new(SqliteSettings::new(pool.clone()));
        let changes = ChangeNotifier::new();

        let fetcher = ShowFetcher::new(
            pool.clone(),
            Arc::new(metadata.clone()),
            changes.clone(),
            Duration::hours(12),
        )
        .with_gate(gate.clone());
        let reconciler =
            ActivityReconciler::new(pool.clone(), Arc::new(activity.clone()), settings.clone());
        let deps = UpdateDeps {
            pool: pool.clone(),
            fetcher,
            reconciler,
            images: Arc::new(images.clone()),
            gate: gate.clone(),
            settings: settings.clone(),
            inserter: Arc::new(inserter.clone()),
            changes,
        };

        Harness {
            pool,
            metadata,
            activity,
            images,
            inserter,
            gate,
            settings,
            deps,
        }
    }

    /// Store shows that have never been refreshed, so every one is stale.
    pub async fn seed(&self, shows: &[(ShowId, &str)]) {
        for &(show_id, title) in shows {
            let meta = ShowMetadata {
                show_id,
                title: title.to_string(),
                overview: None,
                status: None,
                episodes: episodes_for(show_id),
            };
            db::upsert_show(&self.pool, &meta, 0).await.unwrap();
        }
    }

    pub async fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key).await.unwrap()
    }
}
