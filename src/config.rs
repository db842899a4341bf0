//! Configuration loader and validator for the show update service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub update: Update,
    pub tvdb: Tvdb,
    pub tmdb: Tmdb,
    #[serde(default)]
    pub trakt: Option<Trakt>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Update scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Update {
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: u64,
    #[serde(default)]
    pub only_wifi: bool,
}

impl Default for Update {
    fn default() -> Self {
        Self {
            stale_after_hours: default_stale_after_hours(),
            only_wifi: false,
        }
    }
}

/// One year. Larger values would overflow the refresh cutoff arithmetic.
pub const MAX_STALE_AFTER_HOURS: u64 = 24 * 365;

fn default_stale_after_hours() -> u64 {
    12
}

/// TVDB metadata API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tvdb {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// TMDb API settings (image configuration only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tmdb {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Trakt account used for activity reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trakt {
    pub username: String,
    pub api_key: String,
    pub access_token: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Trakt {
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty()
            && !self.api_key.trim().is_empty()
            && !self.access_token.trim().is_empty()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over `app.database_url`, which wins over the
    /// default file inside `app.data_dir`.
    pub fn database_url(&self) -> String {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return url;
        }
        self.app.database_url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}/showsync.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.update.stale_after_hours == 0 {
        return Err(ConfigError::Invalid("update.stale_after_hours must be > 0"));
    }
    if cfg.update.stale_after_hours > MAX_STALE_AFTER_HOURS {
        return Err(ConfigError::Invalid(
            "update.stale_after_hours must be at most 8760 (one year)",
        ));
    }

    if cfg.tvdb.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("tvdb.api_key must be non-empty"));
    }
    if cfg.tmdb.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("tmdb.api_key must be non-empty"));
    }

    // A trakt section is optional, but a half-filled one is a typo.
    if let Some(trakt) = &cfg.trakt {
        if trakt.username.trim().is_empty() {
            return Err(ConfigError::Invalid("trakt.username must be non-empty"));
        }
        if trakt.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("trakt.api_key must be non-empty"));
        }
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

update:
  stale_after_hours: 12
  only_wifi: false

tvdb:
  api_key: "YOUR_TVDB_API_KEY"

tmdb:
  api_key: "YOUR_TMDB_API_KEY"

trakt:
  username: "someone"
  api_key: "YOUR_TRAKT_API_KEY"
  access_token: "YOUR_TRAKT_ACCESS_TOKEN"
"#
}
