use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3/";

/// Source of the image CDN base URL used to build poster links.
#[async_trait]
pub trait ImageConfigService: Send + Sync {
    async fn image_base_url(&self) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct TmdbClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for TmdbClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmdbClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize, Debug)]
struct Configuration {
    images: Option<ImagesConfiguration>,
}

#[derive(Deserialize, Debug)]
struct ImagesConfiguration {
    base_url: Option<String>,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        let base_url = Url::parse(TMDB_API_BASE).expect("valid default TMDb URL");
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
        }
    }

    pub fn build_request(&self) -> Result<reqwest::Request> {
        let mut url = self
            .base_url
            .join("configuration")
            .context("invalid TMDb base URL")?;
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        self.http
            .get(url)
            .build()
            .context("failed to build TMDb request")
    }
}

#[async_trait]
impl ImageConfigService for TmdbClient {
    async fn image_base_url(&self) -> Result<Option<String>> {
        let request = self.build_request()?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach TMDb")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("tmdb error {}: {}", status, body));
        }
        let config: Configuration = res.json().await.context("invalid TMDb configuration JSON")?;
        Ok(extract_base_url(config))
    }
}

fn extract_base_url(config: Configuration) -> Option<String> {
    config
        .images
        .and_then(|images| images.base_url)
        .filter(|url| !url.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_carries_api_key() {
        let client = TmdbClient::new("secret".into());
        let request = client.build_request().unwrap();
        assert_eq!(request.url().path(), "/3/configuration");
        assert_eq!(request.url().query(), Some("api_key=secret"));
    }

    #[test]
    fn empty_base_url_is_ignored() {
        let config: Configuration =
            serde_json::from_str(r#"{ "images": { "base_url": "" } }"#).unwrap();
        assert_eq!(extract_base_url(config), None);

        let config: Configuration = serde_json::from_str(r#"{ "images": null }"#).unwrap();
        assert_eq!(extract_base_url(config), None);

        let config: Configuration =
            serde_json::from_str(r#"{ "images": { "base_url": "http://image.tmdb.org/t/p/" } }"#)
                .unwrap();
        assert_eq!(
            extract_base_url(config).as_deref(),
            Some("http://image.tmdb.org/t/p/")
        );
    }
}
