//! Row views returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! lives in the fetcher, reconciler and orchestrator.

use crate::model::ShowId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowRow {
    pub id: ShowId,
    pub title: String,
    pub last_updated: i64,
    pub last_watched_id: Option<i64>,
    pub next_episode_id: Option<i64>,
    pub unwatched_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRow {
    pub id: i64,
    pub show_id: ShowId,
    pub season: i32,
    pub number: i32,
    pub title: Option<String>,
    pub watched: bool,
    pub collected: bool,
}

/// One match from the episode search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub episode_id: i64,
    pub show_id: ShowId,
    pub show_title: String,
    pub episode_title: Option<String>,
}
