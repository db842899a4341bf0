use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::{ShowId, ShowMetadata};
use crate::tvdb::model::{Envelope, LoginData, SeriesExtended};

pub mod model;

const TVDB_API_BASE: &str = "https://api4.thetvdb.com/v4/";

/// Failure to fetch show metadata. The orchestrator treats every variant as
/// transient and retries once.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("show {0} not found")]
    NotFound(ShowId),
    #[error("{0}")]
    Other(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn fetch_show(&self, show_id: ShowId) -> Result<ShowMetadata, FetchError>;
}

pub struct TvdbClient {
    http: Client,
    base_url: Url,
    api_key: String,
    token: Mutex<Option<String>>,
}

impl fmt::Debug for TvdbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TvdbClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TvdbClient {
    pub fn new(api_key: String) -> Self {
        let base_url = Url::parse(TVDB_API_BASE).expect("valid default TVDB URL");
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("showsync/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            token: Mutex::new(None),
        }
    }

    pub fn build_series_request(
        &self,
        show_id: ShowId,
        token: &str,
    ) -> Result<reqwest::Request, FetchError> {
        let mut url = self
            .base_url
            .join(&format!("series/{}/extended", show_id))
            .map_err(|e| FetchError::Other(format!("invalid TVDB base URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("meta", "episodes")
            .append_pair("short", "true");
        Ok(self.http.get(url).bearer_auth(token).build()?)
    }

    async fn token(&self) -> Result<String, FetchError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let url = self
            .base_url
            .join("login")
            .map_err(|e| FetchError::Other(format!("invalid TVDB base URL: {}", e)))?;
        let res = self
            .http
            .post(url)
            .json(&json!({ "apikey": self.api_key }))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        let login: Envelope<LoginData> = res
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        let token = login
            .data
            .ok_or_else(|| FetchError::Parse("login response without token".into()))?
            .token;
        *guard = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl MetadataService for TvdbClient {
    async fn fetch_show(&self, show_id: ShowId) -> Result<ShowMetadata, FetchError> {
        let token = self.token().await?;
        let request = self.build_series_request(show_id, &token)?;
        debug!(show_id, url = %request.url(), "fetching show metadata");
        let res = self.http.execute(request).await?;

        match res.status() {
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(show_id)),
            StatusCode::UNAUTHORIZED => {
                // Token expired; the retry will log in again.
                *self.token.lock().await = None;
                warn!(show_id, "TVDB token rejected");
            }
            _ => {}
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let body = res.text().await?;
        let envelope: Envelope<SeriesExtended> =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))?;
        let series = envelope
            .data
            .ok_or_else(|| FetchError::Parse(format!("no series data for {}", show_id)))?;
        Ok(series.into_metadata())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_series_request_sets_auth_and_query() {
        let client = TvdbClient::new("key".into());
        let request = client.build_series_request(81189, "tok").unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/v4/series/81189/extended");
        assert_eq!(request.url().query(), Some("meta=episodes&short=true"));
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn series_payload_maps_to_metadata() {
        let body = r#"{
            "status": "success",
            "data": {
                "id": 81189,
                "name": "Breaking Bad",
                "overview": "",
                "status": { "name": "Ended" },
                "episodes": [
                    { "id": 349232, "seasonNumber": 1, "number": 1, "name": "Pilot", "aired": "2008-01-20" },
                    { "id": 349233, "seasonNumber": 1, "number": 2, "name": null, "aired": null }
                ]
            }
        }"#;
        let envelope: Envelope<SeriesExtended> = serde_json::from_str(body).unwrap();
        let meta = envelope.data.unwrap().into_metadata();
        assert_eq!(meta.show_id, 81189);
        assert_eq!(meta.overview, None);
        assert_eq!(meta.status.as_deref(), Some("Ended"));
        assert_eq!(meta.episodes.len(), 2);
        assert_eq!(
            meta.episodes[0].first_aired.map(|t| t.timestamp()),
            Some(1_200_787_200)
        );
        assert!(meta.episodes[1].first_aired.is_none());
    }
}
