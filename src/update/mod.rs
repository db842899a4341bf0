//! The update run: refresh shows, reconcile remote activity, persist
//! checkpoints.
//!
//! A run moves through preparing, updating each target in order,
//! reconciling and finalizing. Cancellation and connectivity are polled
//! before each target and before each network call; neither interrupts a
//! call already in flight.

pub mod backoff;
pub mod manager;
pub mod progress;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::batch::{self, BatchError};
use crate::connectivity::ConnectivityGate;
use crate::db::{self, ChangeNotifier, ChangeTopic, Pool};
use crate::fetcher::{ShowFetcher, ShowInserter};
use crate::model::{DiscoveredShow, ShowId, UpdateKind, UpdateResult};
use crate::reconcile::ActivityReconciler;
use crate::settings::{SettingsStore, KEY_LAST_TRAKT_UPDATE, KEY_TMDB_BASE_URL};
use crate::tmdb::ImageConfigService;

pub use manager::{RunHandle, UpdateManager};
pub use progress::{ChannelProgress, NoProgress, ProgressEvent, ProgressLabel, ProgressSink};

/// Attempts per target before it counts as failed.
const FETCH_ATTEMPTS: usize = 2;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("an update is already running")]
    Busy,
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error("update task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateRequest {
    /// Refresh a single show, e.g. right after it was opened.
    AutoSingle(ShowId),
    /// Refresh shows not updated recently.
    Delta,
    /// Refresh every show.
    Full,
    /// Continue an interrupted run from its resume point.
    Resume(ResumePoint),
}

/// Where an interrupted run stopped. Feeding it back as
/// [`UpdateRequest::Resume`] processes `targets[cursor..]` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub targets: Vec<ShowId>,
    pub cursor: usize,
    pub failed_shows: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub run_id: Uuid,
    pub kind: UpdateKind,
    pub result: UpdateResult,
    pub failed_shows: Vec<String>,
    pub discovered: Vec<DiscoveredShow>,
    pub resume: Option<ResumePoint>,
}

impl UpdateOutcome {
    /// Message for the user, `None` when there is nothing to report.
    pub fn summary(&self) -> Option<String> {
        let base = match self.result {
            UpdateResult::Success | UpdateResult::Cancelled => return None,
            UpdateResult::PartialFailure => "Update failed",
            UpdateResult::Offline => "No connection",
        };
        if self.failed_shows.is_empty() {
            Some(base.to_string())
        } else {
            Some(format!("{} ({})", base, self.failed_shows.join(", ")))
        }
    }
}

/// Everything a run talks to.
#[derive(Clone)]
pub struct UpdateDeps {
    pub pool: Pool,
    pub fetcher: ShowFetcher,
    pub reconciler: ActivityReconciler,
    pub images: Arc<dyn ImageConfigService>,
    pub gate: Arc<dyn ConnectivityGate>,
    pub settings: Arc<dyn SettingsStore>,
    pub inserter: Arc<dyn ShowInserter>,
    pub changes: ChangeNotifier,
}

/// Mutable state of one run.
struct UpdateRun {
    run_id: Uuid,
    kind: UpdateKind,
    targets: Vec<ShowId>,
    cursor: usize,
    processed: usize,
    failed_shows: Vec<String>,
    result: UpdateResult,
    discovered: Vec<DiscoveredShow>,
}

impl UpdateRun {
    fn total_steps(&self) -> usize {
        self.targets.len() + 2
    }

    /// A non-success result is never replaced.
    fn record(&mut self, result: UpdateResult) {
        if self.result.is_success() {
            self.result = result;
        }
    }

    fn into_outcome(self, stopped_early: bool) -> UpdateOutcome {
        let resume = stopped_early.then(|| ResumePoint {
            targets: self.targets.clone(),
            cursor: self.cursor,
            failed_shows: self.failed_shows.clone(),
        });
        UpdateOutcome {
            run_id: self.run_id,
            kind: self.kind,
            result: self.result,
            failed_shows: self.failed_shows,
            discovered: self.discovered,
            resume,
        }
    }
}

enum TargetOutcome {
    Updated,
    Failed,
    Cancelled,
    Offline,
}

/// Run one update to completion.
///
/// `Ok` carries every terminal result including offline and cancelled;
/// `Err` means the run was aborted and nothing was persisted.
pub async fn run_update(
    deps: &UpdateDeps,
    request: UpdateRequest,
    run_id: Uuid,
    cancel: &CancellationToken,
    progress: &dyn ProgressSink,
) -> Result<UpdateOutcome, UpdateError> {
    let span = info_span!("update_run", %run_id);
    async move {
        let started = Utc::now();
        let mut run = prepare(deps, request, run_id, started).await?;
        info!(
            kind = run.kind.as_str(),
            targets = run.targets.len(),
            cursor = run.cursor,
            "update started"
        );

        let total = run.total_steps();
        while run.cursor < run.targets.len() {
            let show_id = run.targets[run.cursor];
            let outcome = match interrupted(deps, cancel) {
                Some(stop) => stop,
                None => {
                    let name = deps.fetcher.display_name(show_id).await;
                    progress.report(ProgressEvent::new(run.cursor, total, &name));
                    match update_target(deps, show_id, cancel).await {
                        TargetOutcome::Failed => {
                            run.failed_shows.push(name);
                            TargetOutcome::Failed
                        }
                        other => other,
                    }
                }
            };

            match outcome {
                TargetOutcome::Updated => run.processed += 1,
                TargetOutcome::Failed => run.record(UpdateResult::PartialFailure),
                TargetOutcome::Cancelled => {
                    info!(step = run.cursor, "update cancelled");
                    run.result = UpdateResult::Cancelled;
                    return Ok(run.into_outcome(true));
                }
                TargetOutcome::Offline => {
                    info!(step = run.cursor, "connection lost, finalizing early");
                    run.result = UpdateResult::Offline;
                    break;
                }
            }
            run.cursor += 1;
        }

        if run.kind == UpdateKind::AutoSingle {
            progress.report(ProgressEvent::new(total, total, ""));
            let stopped_early = run.result == UpdateResult::Offline;
            info!(result = run.result.as_str(), "single show update finished");
            return Ok(run.into_outcome(stopped_early));
        }

        let stopped_early = run.result == UpdateResult::Offline;
        if !stopped_early {
            refresh_derived_data(deps, &run, cancel, progress).await;

            let trakt = reconcile_activity(deps, &mut run, started, cancel, progress).await?;
            if trakt == UpdateResult::Cancelled {
                info!("update cancelled after refreshing shows");
                run.result = UpdateResult::Cancelled;
                return Ok(run.into_outcome(true));
            }
            run.record(trakt);
        }

        progress.report(ProgressEvent::new(total, total, ""));
        finalize(deps, &run, Utc::now()).await?;

        info!(
            result = run.result.as_str(),
            processed = run.processed,
            failed = run.failed_shows.len(),
            discovered = run.discovered.len(),
            "update finished"
        );
        Ok(run.into_outcome(stopped_early))
    }
    .instrument(span)
    .await
}

async fn prepare(
    deps: &UpdateDeps,
    request: UpdateRequest,
    run_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UpdateRun, UpdateError> {
    let (kind, targets, cursor, failed_shows) = match request {
        UpdateRequest::AutoSingle(show_id) => (UpdateKind::AutoSingle, vec![show_id], 0, Vec::new()),
        UpdateRequest::Delta => (
            UpdateKind::Delta,
            deps.fetcher.list_stale_targets(now).await?,
            0,
            Vec::new(),
        ),
        UpdateRequest::Full => (
            UpdateKind::Full,
            deps.fetcher.list_all_targets().await?,
            0,
            Vec::new(),
        ),
        UpdateRequest::Resume(point) => {
            let cursor = point.cursor.min(point.targets.len());
            (UpdateKind::Delta, point.targets, cursor, point.failed_shows)
        }
    };

    // Failures carried over from an interrupted run still count.
    let result = if failed_shows.is_empty() {
        UpdateResult::Success
    } else {
        UpdateResult::PartialFailure
    };

    Ok(UpdateRun {
        run_id,
        kind,
        targets,
        cursor,
        processed: 0,
        failed_shows,
        result,
        discovered: Vec::new(),
    })
}

/// Cancellation wins over connectivity.
fn interrupted(deps: &UpdateDeps, cancel: &CancellationToken) -> Option<TargetOutcome> {
    if cancel.is_cancelled() {
        Some(TargetOutcome::Cancelled)
    } else if !deps.gate.is_allowed() {
        Some(TargetOutcome::Offline)
    } else {
        None
    }
}

async fn update_target(
    deps: &UpdateDeps,
    show_id: ShowId,
    cancel: &CancellationToken,
) -> TargetOutcome {
    for attempt in 1..=FETCH_ATTEMPTS {
        if let Some(stop) = interrupted(deps, cancel) {
            return stop;
        }
        match deps.fetcher.update_show(show_id).await {
            Ok(()) => {
                debug!(show_id, attempt, "show updated");
                return TargetOutcome::Updated;
            }
            Err(err) => warn!(show_id, attempt, error = %err, "show update failed"),
        }
    }
    TargetOutcome::Failed
}

/// Search index and image config. Both are best-effort and both are
/// skipped once the run is cancelled.
async fn refresh_derived_data(
    deps: &UpdateDeps,
    run: &UpdateRun,
    cancel: &CancellationToken,
    progress: &dyn ProgressSink,
) {
    if run.processed == 0 || run.targets.is_empty() || cancel.is_cancelled() {
        return;
    }
    let total = run.total_steps();
    progress.report(ProgressEvent::new(run.targets.len(), total, ""));

    match db::rebuild_search_index(&deps.pool).await {
        Ok(rows) => debug!(rows, "search index rebuilt"),
        Err(err) => warn!(?err, step = "search_index", "search index rebuild failed"),
    }

    if interrupted(deps, cancel).is_some() {
        return;
    }
    match deps.images.image_base_url().await {
        Ok(Some(url)) => {
            if let Err(err) = deps.settings.put_all(&[(KEY_TMDB_BASE_URL, url)]).await {
                warn!(?err, step = "image_config", "failed to store image base url");
            }
        }
        Ok(None) => debug!("image config has no base url"),
        Err(err) => warn!(?err, step = "image_config", "image config refresh failed"),
    }
}

/// Pull activity since the last checkpoint and apply it. Anything but a
/// batch failure is reported through the returned result.
async fn reconcile_activity(
    deps: &UpdateDeps,
    run: &mut UpdateRun,
    started: DateTime<Utc>,
    cancel: &CancellationToken,
    progress: &dyn ProgressSink,
) -> Result<UpdateResult, UpdateError> {
    if cancel.is_cancelled() {
        return Ok(UpdateResult::Cancelled);
    }
    if !deps.reconciler.is_configured() {
        return Ok(UpdateResult::Success);
    }
    if !deps.gate.is_allowed() {
        return Ok(UpdateResult::Offline);
    }

    let total = run.total_steps();
    progress.report(ProgressEvent::new(total - 1, total, ""));

    let since_ms = deps
        .settings
        .get_i64(KEY_LAST_TRAKT_UPDATE, started.timestamp_millis())
        .await?;
    let feed = match deps.reconciler.fetch_activity(since_ms / 1000).await {
        Ok(feed) => feed,
        Err(err) => {
            warn!(error = %err, step = "activity", "activity fetch failed");
            return Ok(UpdateResult::PartialFailure);
        }
    };

    let plan = deps.reconciler.plan(&feed).await?;
    let touched = batch::apply_batch(&deps.pool, &plan.ops)
        .await
        .map_err(|err| {
            error!(error = %err, step = "batch", "activity batch failed");
            err
        })?;
    if !plan.ops.is_empty() {
        deps.changes.notify(ChangeTopic::Episodes);
        deps.changes.notify(ChangeTopic::Shows);
    }
    info!(
        ops = plan.ops.len(),
        touched,
        discovered = plan.discovered.len(),
        "activity applied"
    );

    deps.settings
        .put_all(&[(
            KEY_LAST_TRAKT_UPDATE,
            feed.current.timestamp_millis().to_string(),
        )])
        .await?;
    run.discovered = plan.discovered;
    Ok(UpdateResult::Success)
}

async fn finalize(deps: &UpdateDeps, run: &UpdateRun, now: DateTime<Utc>) -> Result<(), UpdateError> {
    match db::update_latest_episodes(&deps.pool, now.timestamp_millis()).await {
        Ok(()) => debug!("latest episodes recomputed"),
        Err(err) => warn!(?err, step = "latest_episodes", "latest episode update failed"),
    }

    if run.result.is_success() {
        backoff::record_success(deps.settings.as_ref(), now).await?;
    } else {
        backoff::record_failure(deps.settings.as_ref(), now).await?;
    }

    if !run.discovered.is_empty() {
        if deps.gate.is_allowed() {
            let added = deps.inserter.add_shows(&run.discovered).await;
            info!(added, candidates = run.discovered.len(), "discovered shows handed off");
        } else {
            info!(candidates = run.discovered.len(), "offline, not adding discovered shows");
        }
    }
    Ok(())
}
