use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::config::Trakt;
use crate::model::ActivityFeed;
use crate::trakt::model::ActivityResponse;

pub mod model;

const TRAKT_API_BASE: &str = "https://api.trakt.tv/";
const ACTIVITY_ACTIONS: &str = "checkin,seen,scrobble,collection";

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("trakt credentials missing")]
    NotConfigured,
    #[error("trakt rejected credentials ({0})")]
    Auth(StatusCode),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed activity response: {0}")]
    Parse(String),
    #[error("activity response without activity list")]
    MissingActivity,
}

#[async_trait]
pub trait ActivityService: Send + Sync {
    /// Whether credentials are present; reconciliation is a no-op otherwise.
    fn is_configured(&self) -> bool;

    /// Episode activity of the configured user since `since_secs`.
    async fn fetch_activity(&self, since_secs: i64) -> Result<ActivityFeed, ActivityError>;
}

pub struct TraktClient {
    http: Client,
    base_url: Url,
    account: Option<Trakt>,
}

impl fmt::Debug for TraktClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraktClient")
            .field("base_url", &self.base_url)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

impl TraktClient {
    pub fn new(account: Option<Trakt>) -> Self {
        let base_url = account
            .as_ref()
            .and_then(|a| a.base_url.as_deref())
            .and_then(|u| Url::parse(u).ok())
            .unwrap_or_else(|| Url::parse(TRAKT_API_BASE).expect("valid default Trakt URL"));
        Self::with_base_url(account, base_url)
    }

    pub fn with_base_url(account: Option<Trakt>, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("showsync/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            account,
        }
    }

    pub fn build_request(&self, since_secs: i64) -> Result<reqwest::Request, ActivityError> {
        let account = self
            .account
            .as_ref()
            .filter(|a| a.has_credentials())
            .ok_or(ActivityError::NotConfigured)?;
        let url = self
            .base_url
            .join(&format!(
                "activity/user.json/{}/{}/episode/{}/{}",
                account.api_key, account.username, ACTIVITY_ACTIONS, since_secs
            ))
            .map_err(|e| ActivityError::Parse(format!("invalid Trakt URL: {}", e)))?;
        Ok(self
            .http
            .get(url)
            .bearer_auth(&account.access_token)
            .build()?)
    }
}

#[async_trait]
impl ActivityService for TraktClient {
    fn is_configured(&self) -> bool {
        self.account.as_ref().is_some_and(Trakt::has_credentials)
    }

    async fn fetch_activity(&self, since_secs: i64) -> Result<ActivityFeed, ActivityError> {
        let request = self.build_request(since_secs)?;
        debug!(since_secs, "fetching trakt activity");
        let res = self.http.execute(request).await?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ActivityError::Auth(status));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ActivityError::Status { status, body });
        }

        let body = res.text().await?;
        parse_activity(&body)
    }
}

pub fn parse_activity(body: &str) -> Result<ActivityFeed, ActivityError> {
    let response: ActivityResponse =
        serde_json::from_str(body).map_err(|e| ActivityError::Parse(e.to_string()))?;
    response.into_feed().ok_or(ActivityError::MissingActivity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivityAction, EpisodeNumber};

    fn account() -> Trakt {
        Trakt {
            username: "someone".into(),
            api_key: "key".into(),
            access_token: "token".into(),
            base_url: None,
        }
    }

    #[test]
    fn build_request_targets_user_activity() {
        let client = TraktClient::new(Some(account()));
        assert!(client.is_configured());
        let request = client.build_request(1_700_000_000).unwrap();
        assert_eq!(
            request.url().path(),
            "/activity/user.json/key/someone/episode/checkin,seen,scrobble,collection/1700000000"
        );
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
    }

    #[test]
    fn missing_credentials_are_reported() {
        let client = TraktClient::new(None);
        assert!(!client.is_configured());
        assert!(matches!(
            client.build_request(0),
            Err(ActivityError::NotConfigured)
        ));

        let mut partial = account();
        partial.access_token.clear();
        assert!(!TraktClient::new(Some(partial)).is_configured());
    }

    #[test]
    fn parse_activity_drops_items_without_action_or_show() {
        let body = r#"{
            "timestamps": { "start": 1, "end": 2, "current": 1700000500 },
            "activity": [
                { "timestamp": 1700000100, "action": "seen",
                  "show": { "title": "Alpha", "tvdb_id": "10" },
                  "episodes": [ { "season": 1, "number": 5 }, { "season": 2, "number": 1 } ] },
                { "timestamp": 1700000200, "action": "checkin",
                  "show": { "title": "Beta", "tvdb_id": 20 },
                  "episode": { "season": 3, "number": 4 } },
                { "timestamp": 1700000300, "action": "rating",
                  "show": { "title": "Gamma", "tvdb_id": "30" } },
                { "timestamp": 1700000400, "action": "seen", "show": null,
                  "episodes": [ { "season": 1, "number": 1 } ] },
                { "timestamp": 1700000450, "action": null,
                  "show": { "title": "Delta", "tvdb_id": "40" } },
                { "timestamp": 1700000480, "action": "collection",
                  "show": { "title": "Epsilon", "tvdb_id": 50 } }
            ]
        }"#;
        let feed = parse_activity(body).unwrap();
        assert_eq!(feed.current.timestamp(), 1_700_000_500);
        assert_eq!(feed.items.len(), 3);
        assert_eq!(feed.items[0].action, ActivityAction::Seen);
        assert_eq!(feed.items[0].show_id, 10);
        assert_eq!(
            feed.items[0].episodes,
            vec![EpisodeNumber::new(1, 5), EpisodeNumber::new(2, 1)]
        );
        assert_eq!(feed.items[1].action, ActivityAction::Checkin);
        assert_eq!(feed.items[1].show_id, 20);
        assert_eq!(feed.items[1].episodes, vec![EpisodeNumber::new(3, 4)]);
        // Kept without episodes so the show can still be discovered.
        assert_eq!(feed.items[2].action, ActivityAction::Collection);
        assert_eq!(feed.items[2].show_id, 50);
        assert!(feed.items[2].episodes.is_empty());
    }

    #[test]
    fn empty_and_missing_activity_differ() {
        let feed = parse_activity(r#"{ "timestamps": { "current": 5 }, "activity": [] }"#).unwrap();
        assert!(feed.items.is_empty());

        let err = parse_activity(r#"{ "timestamps": { "current": 5 } }"#).unwrap_err();
        assert!(matches!(err, ActivityError::MissingActivity));

        let err = parse_activity("not json").unwrap_err();
        assert!(matches!(err, ActivityError::Parse(_)));
    }
}
