use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::model::{ActivityAction, ActivityFeed, ActivityItem, EpisodeNumber, ShowId};

/// Ids arrive as strings from older endpoints and as numbers from newer ones.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawId {
    Num(i64),
    Str(String),
}

impl RawId {
    pub fn as_show_id(&self) -> Option<ShowId> {
        match self {
            RawId::Num(n) => Some(*n),
            RawId::Str(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ActivityResponse {
    pub timestamps: Timestamps,
    pub activity: Option<Vec<RawActivityItem>>,
}

#[derive(Deserialize, Debug)]
pub struct Timestamps {
    /// Seconds since epoch.
    pub current: i64,
}

#[derive(Deserialize, Debug)]
pub struct RawActivityItem {
    pub timestamp: Option<i64>,
    pub action: Option<String>,
    pub show: Option<RawShow>,
    pub episode: Option<RawEpisode>,
    pub episodes: Option<Vec<RawEpisode>>,
}

#[derive(Deserialize, Debug)]
pub struct RawShow {
    pub title: Option<String>,
    pub tvdb_id: Option<RawId>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct RawEpisode {
    pub season: i32,
    pub number: i32,
}

fn from_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

impl RawActivityItem {
    /// Items missing an action or a show are dropped. Items without episodes
    /// are kept: their show may still need to be discovered.
    pub fn into_item(self) -> Option<ActivityItem> {
        let action = ActivityAction::parse_action(self.action.as_deref()?)?;
        let show = self.show?;
        let show_id = show.tvdb_id.as_ref().and_then(RawId::as_show_id)?;

        let episodes: Vec<EpisodeNumber> = match action {
            ActivityAction::Seen | ActivityAction::Collection => self
                .episodes
                .unwrap_or_default()
                .into_iter()
                .map(|e| EpisodeNumber::new(e.season, e.number))
                .collect(),
            ActivityAction::Checkin | ActivityAction::Scrobble => self
                .episode
                .map(|e| vec![EpisodeNumber::new(e.season, e.number)])
                .unwrap_or_default(),
        };
        if episodes.is_empty() {
            debug!(show_id, action = action.as_str(), "activity item without episodes");
        }

        Some(ActivityItem {
            action,
            show_id,
            show_title: show.title.unwrap_or_default(),
            episodes,
            timestamp: from_secs(self.timestamp.unwrap_or_default()),
        })
    }
}

impl ActivityResponse {
    /// `None` when the server sent no activity list at all, which is not the
    /// same as an empty one.
    pub fn into_feed(self) -> Option<ActivityFeed> {
        let current = from_secs(self.timestamps.current);
        let items = self
            .activity?
            .into_iter()
            .filter_map(RawActivityItem::into_item)
            .collect();
        Some(ActivityFeed { items, current })
    }
}
