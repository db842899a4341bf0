use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;

use crate::model::{EpisodeMetadata, ShowMetadata};

#[derive(Deserialize, Debug)]
pub struct Envelope<T> {
    pub data: Option<T>,
}

#[derive(Deserialize, Debug)]
pub struct LoginData {
    pub token: String,
}

#[derive(Deserialize, Debug)]
pub struct SeriesExtended {
    pub id: i64,
    pub name: String,
    pub overview: Option<String>,
    pub status: Option<SeriesStatus>,
    #[serde(default)]
    pub episodes: Vec<SeriesEpisode>,
}

#[derive(Deserialize, Debug)]
pub struct SeriesStatus {
    pub name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SeriesEpisode {
    pub id: i64,
    #[serde(rename = "seasonNumber")]
    pub season_number: i32,
    pub number: i32,
    pub name: Option<String>,
    pub overview: Option<String>,
    /// `YYYY-MM-DD`, absent for unaired episodes.
    pub aired: Option<String>,
}

impl SeriesExtended {
    pub fn into_metadata(self) -> ShowMetadata {
        ShowMetadata {
            show_id: self.id,
            title: self.name,
            overview: self.overview.filter(|s| !s.trim().is_empty()),
            status: self.status.and_then(|s| s.name),
            episodes: self
                .episodes
                .into_iter()
                .map(|ep| EpisodeMetadata {
                    episode_id: ep.id,
                    season: ep.season_number,
                    number: ep.number,
                    title: ep.name,
                    overview: ep.overview,
                    first_aired: ep
                        .aired
                        .as_deref()
                        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|dt| Utc.from_utc_datetime(&dt)),
                })
                .collect(),
        }
    }
}
