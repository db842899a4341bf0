use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use showsync::config::{self, Config};
use showsync::connectivity::NetworkGate;
use showsync::db::{self, ChangeNotifier};
use showsync::fetcher::ShowFetcher;
use showsync::model::ShowId;
use showsync::reconcile::ActivityReconciler;
use showsync::settings::SqliteSettings;
use showsync::tmdb::TmdbClient;
use showsync::trakt::TraktClient;
use showsync::tvdb::TvdbClient;
use showsync::update::{backoff, UpdateDeps, UpdateManager, UpdateRequest};

#[derive(Debug, Parser)]
#[command(author, version, about = "Refresh the show library and reconcile trakt activity")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Refresh every show, not just stale ones
    #[arg(long, conflicts_with_all = ["show", "delta"])]
    full: bool,

    /// Refresh a single show by id
    #[arg(long, conflicts_with = "delta")]
    show: Option<ShowId>,

    /// Refresh shows not updated recently (default)
    #[arg(long)]
    delta: bool,

    /// Exit without updating unless the update interval (or backoff) has elapsed
    #[arg(long)]
    if_due: bool,
}

impl Args {
    fn request(&self) -> UpdateRequest {
        match (self.full, self.show) {
            (true, _) => UpdateRequest::Full,
            (false, Some(show_id)) => UpdateRequest::AutoSingle(show_id),
            _ => UpdateRequest::Delta,
        }
    }
}

fn parse_url(raw: Option<&str>, what: &str) -> Result<Option<Url>> {
    raw.map(|u| Url::parse(u).with_context(|| format!("invalid {} base_url: {}", what, u)))
        .transpose()
}

fn build_manager(cfg: &Config, pool: db::Pool) -> Result<(UpdateManager, Arc<SqliteSettings>)> {
    let tvdb = match parse_url(cfg.tvdb.base_url.as_deref(), "tvdb")? {
        Some(url) => TvdbClient::with_base_url(cfg.tvdb.api_key.clone(), url),
        None => TvdbClient::new(cfg.tvdb.api_key.clone()),
    };
    let tmdb = match parse_url(cfg.tmdb.base_url.as_deref(), "tmdb")? {
        Some(url) => TmdbClient::with_base_url(cfg.tmdb.api_key.clone(), url),
        None => TmdbClient::new(cfg.tmdb.api_key.clone()),
    };
    let trakt = TraktClient::new(cfg.trakt.clone());

    let settings = Arc::new(SqliteSettings::new(pool.clone()));
    let changes = ChangeNotifier::new();
    let gate = Arc::new(NetworkGate::new(cfg.update.only_wifi));
    let fetcher = ShowFetcher::new(
        pool.clone(),
        Arc::new(tvdb),
        changes.clone(),
        Duration::hours(cfg.update.stale_after_hours as i64),
    )
    .with_gate(gate.clone());
    let reconciler = ActivityReconciler::new(pool.clone(), Arc::new(trakt), settings.clone());

    let deps = UpdateDeps {
        pool,
        fetcher: fetcher.clone(),
        reconciler,
        images: Arc::new(tmdb),
        gate,
        settings: settings.clone(),
        inserter: Arc::new(fetcher),
        changes,
    };
    Ok((UpdateManager::new(deps), settings))
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
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let (manager, settings) = build_manager(&cfg, pool)?;
    if args.if_due && !backoff::is_update_due(&*settings, Utc::now()).await? {
        info!("update not due yet, exiting");
        return Ok(());
    }

    let mut handle = manager.start(args.request())?;
    info!(run_id = %handle.id(), "update started");

    if let Some(mut progress) = handle.progress() {
        tokio::spawn(async move {
            while let Some(event) = progress.recv().await {
                info!(step = event.current, total = event.total, "{}", event.label);
            }
        });
    }

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling update");
            cancel.cancel();
        }
    });

    let outcome = match handle.wait().await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(%err, "update aborted");
            return Err(err.into());
        }
    };

    match outcome.summary() {
        Some(message) => println!("{}", message),
        None => println!("Update finished: {}", outcome.result.as_str()),
    }
    if let Some(resume) = &outcome.resume {
        println!(
            "Stopped at {}/{} shows",
            resume.cursor,
            resume.targets.len()
        );
    }
    Ok(())
}
