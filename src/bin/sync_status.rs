use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::Parser;
use std::path::PathBuf;

use showsync::config;
use showsync::db;
use showsync::settings::{
    SettingsStore, SqliteSettings, KEY_FAILED_COUNTER, KEY_LAST_TRAKT_UPDATE, KEY_LAST_UPDATE,
    KEY_TMDB_BASE_URL,
};
use showsync::update::backoff::UPDATE_INTERVAL_MINUTES;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print update checkpoints, backoff state and library size")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Also search episode titles and overviews for this term
    #[arg(long)]
    search: Option<String>,
}

fn format_ms(ms: i64) -> String {
    if ms <= 0 {
        return "never".to_string();
    }
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t: DateTime<Utc>| t.to_rfc3339())
        .unwrap_or_else(|| format!("invalid ({})", ms))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let settings = SqliteSettings::new(pool.clone());

    let last_update = settings.get_i64(KEY_LAST_UPDATE, 0).await?;
    let failed = settings.get_i64(KEY_FAILED_COUNTER, 0).await?;
    let last_trakt = settings.get_i64(KEY_LAST_TRAKT_UPDATE, 0).await?;
    let image_base = settings.get(KEY_TMDB_BASE_URL).await?;

    println!("shows:               {}", db::count_shows(&pool).await?);
    println!("last update:         {}", format_ms(last_update));
    println!("failed updates:      {}", failed);
    let next_due = last_update + Duration::minutes(UPDATE_INTERVAL_MINUTES).num_milliseconds();
    println!("next update due:     {}", format_ms(next_due));
    println!("last trakt activity: {}", format_ms(last_trakt));
    println!(
        "image base url:      {}",
        image_base.as_deref().unwrap_or("unset")
    );

    if let Some(term) = args.search.as_deref() {
        let hits = db::search_episodes(&pool, term).await?;
        println!("\n{} episode(s) matching {:?}", hits.len(), term);
        for hit in hits {
            println!(
                "  [{}] {} - {}",
                hit.episode_id,
                hit.show_title,
                hit.episode_title.as_deref().unwrap_or("?")
            );
        }
    }
    Ok(())
}
