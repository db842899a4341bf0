use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// TVDB identifier of a show; also the primary key of the `shows` table.
pub type ShowId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UpdateKind {
    /// Lightweight refresh of one show, triggered when it is opened.
    AutoSingle,
    Delta,
    Full,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::AutoSingle => "auto_single",
            UpdateKind::Delta => "delta",
            UpdateKind::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UpdateResult {
    Success,
    PartialFailure,
    Offline,
    Cancelled,
}

impl UpdateResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateResult::Success => "success",
            UpdateResult::PartialFailure => "partial_failure",
            UpdateResult::Offline => "offline",
            UpdateResult::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UpdateResult::Success)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActivityAction {
    Seen,
    Checkin,
    Scrobble,
    Collection,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Seen => "seen",
            ActivityAction::Checkin => "checkin",
            ActivityAction::Scrobble => "scrobble",
            ActivityAction::Collection => "collection",
        }
    }

    pub fn parse_action(s: &str) -> Option<Self> {
        match s {
            "seen" => Some(ActivityAction::Seen),
            "checkin" => Some(ActivityAction::Checkin),
            "scrobble" => Some(ActivityAction::Scrobble),
            "collection" => Some(ActivityAction::Collection),
            _ => None,
        }
    }
}

/// Season/number pair. Ordering is lexicographic: season first, then number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpisodeNumber {
    pub season: i32,
    pub number: i32,
}

impl EpisodeNumber {
    pub fn new(season: i32, number: i32) -> Self {
        Self { season, number }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityItem {
    pub action: ActivityAction,
    pub show_id: ShowId,
    pub show_title: String,
    /// Checkin and scrobble carry exactly one entry.
    pub episodes: Vec<EpisodeNumber>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFeed {
    pub items: Vec<ActivityItem>,
    /// Server time of this response, stored as the next activity checkpoint.
    pub current: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredShow {
    pub show_id: ShowId,
    pub title: String,
}

/// One pending write against the content store. Each variant is a selection
/// (one episode of one show, or the show row) plus a single field assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    MarkWatched {
        show_id: ShowId,
        episode: EpisodeNumber,
    },
    MarkCollected {
        show_id: ShowId,
        episode: EpisodeNumber,
    },
    SetLastWatched {
        show_id: ShowId,
        episode: EpisodeNumber,
    },
}

impl MutationOp {
    pub fn show_id(&self) -> ShowId {
        match self {
            MutationOp::MarkWatched { show_id, .. }
            | MutationOp::MarkCollected { show_id, .. }
            | MutationOp::SetLastWatched { show_id, .. } => *show_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MutationOp::MarkWatched { .. } => "mark_watched",
            MutationOp::MarkCollected { .. } => "mark_collected",
            MutationOp::SetLastWatched { .. } => "set_last_watched",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowMetadata {
    pub show_id: ShowId,
    pub title: String,
    pub overview: Option<String>,
    pub status: Option<String>,
    pub episodes: Vec<EpisodeMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMetadata {
    pub episode_id: i64,
    pub season: i32,
    pub number: i32,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub first_aired: Option<DateTime<Utc>>,
}
