use super::model::{EpisodeRow, SearchHit, ShowRow};
use crate::model::{ShowId, ShowMetadata};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied. Every
/// connection to `sqlite::memory:` is a separate database, so the pool must
/// never open a second one.
pub async fn memory_pool() -> Result<Pool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // sqlx refuses to create a missing file unless asked to.
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// All show ids in store order.
#[instrument(skip_all)]
pub async fn list_show_ids(pool: &Pool) -> Result<Vec<ShowId>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM shows ORDER BY rowid")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Shows whose metadata was last refreshed before `cutoff_ms`.
#[instrument(skip_all)]
pub async fn list_stale_show_ids(pool: &Pool, cutoff_ms: i64) -> Result<Vec<ShowId>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM shows WHERE last_updated < ? ORDER BY last_updated ASC, rowid ASC",
    )
    .bind(cutoff_ms)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn existing_show_ids(pool: &Pool) -> Result<HashSet<ShowId>> {
    Ok(list_show_ids(pool).await?.into_iter().collect())
}

#[instrument(skip_all)]
pub async fn count_shows(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shows")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn show_title(pool: &Pool, show_id: ShowId) -> Result<Option<String>> {
    let title = sqlx::query_scalar::<_, String>("SELECT title FROM shows WHERE id = ?")
        .bind(show_id)
        .fetch_optional(pool)
        .await?;
    Ok(title)
}

pub async fn fetch_show(pool: &Pool, show_id: ShowId) -> Result<Option<ShowRow>> {
    let row = sqlx::query(
        "SELECT id, title, last_updated, last_watched_id, next_episode_id, unwatched_count \
         FROM shows WHERE id = ?",
    )
    .bind(show_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| ShowRow {
        id: row.get("id"),
        title: row.get("title"),
        last_updated: row.get("last_updated"),
        last_watched_id: row.get("last_watched_id"),
        next_episode_id: row.get("next_episode_id"),
        unwatched_count: row.get("unwatched_count"),
    }))
}

pub async fn fetch_episode(
    pool: &Pool,
    show_id: ShowId,
    season: i32,
    number: i32,
) -> Result<Option<EpisodeRow>> {
    let row = sqlx::query(
        "SELECT id, show_id, season, number, title, watched, collected FROM episodes \
         WHERE show_id = ? AND season = ? AND number = ?",
    )
    .bind(show_id)
    .bind(season)
    .bind(number)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| EpisodeRow {
        id: row.get("id"),
        show_id: row.get("show_id"),
        season: row.get("season"),
        number: row.get("number"),
        title: row.get("title"),
        watched: row.get("watched"),
        collected: row.get("collected"),
    }))
}

/// Insert or refresh a show and its episodes in one transaction. Watched and
/// collected flags of known episodes survive; episodes the remote no longer
/// lists are removed.
#[instrument(skip_all, fields(show_id = meta.show_id))]
pub async fn upsert_show(pool: &Pool, meta: &ShowMetadata, now_ms: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO shows (id, title, overview, status, last_updated) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET title = excluded.title, overview = excluded.overview, \
         status = excluded.status, last_updated = excluded.last_updated",
    )
    .bind(meta.show_id)
    .bind(&meta.title)
    .bind(&meta.overview)
    .bind(&meta.status)
    .bind(now_ms)
    .execute(&mut *tx)
    .await?;

    let known: Vec<i64> = sqlx::query_scalar("SELECT id FROM episodes WHERE show_id = ?")
        .bind(meta.show_id)
        .fetch_all(&mut *tx)
        .await?;
    let incoming: HashSet<i64> = meta.episodes.iter().map(|e| e.episode_id).collect();
    for gone in known.into_iter().filter(|id| !incoming.contains(id)) {
        sqlx::query("DELETE FROM episodes WHERE id = ?")
            .bind(gone)
            .execute(&mut *tx)
            .await?;
    }

    for ep in &meta.episodes {
        sqlx::query(
            "INSERT INTO episodes (id, show_id, season, number, title, overview, first_aired) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET show_id = excluded.show_id, season = excluded.season, \
             number = excluded.number, title = excluded.title, overview = excluded.overview, \
             first_aired = excluded.first_aired",
        )
        .bind(ep.episode_id)
        .bind(meta.show_id)
        .bind(ep.season)
        .bind(ep.number)
        .bind(&ep.title)
        .bind(&ep.overview)
        .bind(ep.first_aired.map(|t| t.timestamp_millis()))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!(episodes = meta.episodes.len(), "show stored");
    Ok(())
}

/// Drop and repopulate the episode search index. Returns the row count.
#[instrument(skip_all)]
pub async fn rebuild_search_index(pool: &Pool) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM episode_search")
        .execute(&mut *tx)
        .await?;
    let inserted = sqlx::query(
        "INSERT INTO episode_search (episode_id, show_id, show_title, episode_title, overview) \
         SELECT e.id, s.id, s.title, e.title, e.overview \
         FROM episodes e JOIN shows s ON s.id = e.show_id",
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;
    Ok(inserted)
}

#[instrument(skip_all)]
pub async fn search_episodes(pool: &Pool, term: &str) -> Result<Vec<SearchHit>> {
    let pattern = format!("%{}%", term.trim());
    let rows = sqlx::query(
        "SELECT episode_id, show_id, show_title, episode_title FROM episode_search \
         WHERE episode_title LIKE ? OR overview LIKE ? OR show_title LIKE ? \
         ORDER BY show_title, episode_id",
    )
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SearchHit {
            episode_id: row.get("episode_id"),
            show_id: row.get("show_id"),
            show_title: row.get("show_title"),
            episode_title: row.get("episode_title"),
        })
        .collect())
}

/// Recompute the denormalized next-episode pointer and unwatched count of
/// every show. Specials (season 0) and unaired episodes are ignored.
#[instrument(skip_all)]
pub async fn update_latest_episodes(pool: &Pool, now_ms: i64) -> Result<()> {
    sqlx::query(
        "UPDATE shows SET \
           next_episode_id = (SELECT e.id FROM episodes e \
              WHERE e.show_id = shows.id AND e.watched = 0 AND e.season > 0 \
                AND e.first_aired IS NOT NULL AND e.first_aired <= ?1 \
              ORDER BY e.season, e.number LIMIT 1), \
           unwatched_count = (SELECT COUNT(*) FROM episodes e \
              WHERE e.show_id = shows.id AND e.watched = 0 AND e.season > 0 \
                AND e.first_aired IS NOT NULL AND e.first_aired <= ?1)",
    )
    .bind(now_ms)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_setting(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Write several settings at once; either all land or none.
#[instrument(skip_all)]
pub async fn put_settings(pool: &Pool, entries: &[(&str, String)]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (key, value) in entries {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(*key)
        .bind(value.as_str())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
