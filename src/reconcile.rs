//! Turns a remote activity feed into local mutations.
//!
//! Classification is pure: it only needs the feed and, when shows are
//! auto-added, the set of shows already in the library. Nothing here writes
//! to the store; the plan is handed to [`crate::batch::apply_batch`].

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::db::{self, Pool};
use crate::model::{ActivityAction, ActivityFeed, ActivityItem, DiscoveredShow, MutationOp, ShowId};
use crate::settings::{SettingsStore, KEY_AUTO_ADD_TRAKT_SHOWS};
use crate::trakt::{ActivityError, ActivityService};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub ops: Vec<MutationOp>,
    /// Shows referenced by activity but missing locally, in first-seen order.
    pub discovered: Vec<DiscoveredShow>,
}

/// Classify every item of the feed.
///
/// `known_shows` is `Some` only when auto-adding is enabled. Items of shows
/// outside that set produce a discovery candidate (once per show) and no
/// mutations at all.
pub fn classify(items: &[ActivityItem], known_shows: Option<&HashSet<ShowId>>) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut discovered_ids: HashSet<ShowId> = HashSet::new();

    for item in items {
        if let Some(known) = known_shows {
            if !known.contains(&item.show_id) {
                if discovered_ids.insert(item.show_id) {
                    plan.discovered.push(DiscoveredShow {
                        show_id: item.show_id,
                        title: item.show_title.clone(),
                    });
                }
                continue;
            }
        }
        push_item_ops(&mut plan.ops, item);
    }

    plan
}

fn push_item_ops(ops: &mut Vec<MutationOp>, item: &ActivityItem) {
    let show_id = item.show_id;
    match item.action {
        ActivityAction::Seen => {
            ops.extend(
                item.episodes
                    .iter()
                    .map(|&episode| MutationOp::MarkWatched { show_id, episode }),
            );
            // Highest season/number, not the last listed episode.
            if let Some(&episode) = item.episodes.iter().max() {
                ops.push(MutationOp::SetLastWatched { show_id, episode });
            }
        }
        ActivityAction::Checkin | ActivityAction::Scrobble => {
            if let Some(&episode) = item.episodes.first() {
                ops.push(MutationOp::MarkWatched { show_id, episode });
                ops.push(MutationOp::SetLastWatched { show_id, episode });
            }
        }
        ActivityAction::Collection => {
            ops.extend(
                item.episodes
                    .iter()
                    .map(|&episode| MutationOp::MarkCollected { show_id, episode }),
            );
        }
    }
}

/// Fetches remote activity and plans it against the local library.
#[derive(Clone)]
pub struct ActivityReconciler {
    pool: Pool,
    activity: Arc<dyn ActivityService>,
    settings: Arc<dyn SettingsStore>,
}

impl ActivityReconciler {
    pub fn new(
        pool: Pool,
        activity: Arc<dyn ActivityService>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            pool,
            activity,
            settings,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.activity.is_configured()
    }

    pub async fn fetch_activity(&self, since_secs: i64) -> Result<ActivityFeed, ActivityError> {
        self.activity.fetch_activity(since_secs).await
    }

    #[instrument(skip_all, fields(items = feed.items.len()))]
    pub async fn plan(&self, feed: &ActivityFeed) -> Result<ReconcilePlan> {
        let auto_add = self.settings.get_bool(KEY_AUTO_ADD_TRAKT_SHOWS, true).await?;
        let known = if auto_add {
            Some(db::existing_show_ids(&self.pool).await?)
        } else {
            None
        };
        let plan = classify(&feed.items, known.as_ref());
        debug!(
            ops = plan.ops.len(),
            discovered = plan.discovered.len(),
            "activity classified"
        );
        Ok(plan)
    }
}
