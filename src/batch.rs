//! Applies a mutation plan as one SQLite transaction.
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{error, instrument};

use crate::db::Pool;
use crate::model::MutationOp;

/// Any failure here is fatal for the run: a partially applied batch would
/// leave watched and collected state inconsistent, so nothing is committed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to open transaction: {0}")]
    Begin(#[source] sqlx::Error),
    #[error("op {index} ({kind}) failed: {source}")]
    Op {
        index: usize,
        kind: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to commit batch: {0}")]
    Commit(#[source] sqlx::Error),
}

/// Apply every op or none. Returns the number of rows touched.
#[instrument(skip_all, fields(ops = ops.len()))]
pub async fn apply_batch(pool: &Pool, ops: &[MutationOp]) -> Result<u64, BatchError> {
    if ops.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.map_err(BatchError::Begin)?;
    let mut touched = 0;
    for (index, op) in ops.iter().enumerate() {
        match apply_op(&mut tx, op).await {
            Ok(rows) => touched += rows,
            Err(source) => {
                error!(index, kind = op.kind(), show_id = op.show_id(), %source, "batch op failed");
                if let Err(err) = tx.rollback().await {
                    error!(%err, "rollback after failed op also failed");
                }
                return Err(BatchError::Op {
                    index,
                    kind: op.kind(),
                    source,
                });
            }
        }
    }
    tx.commit().await.map_err(BatchError::Commit)?;
    Ok(touched)
}

async fn apply_op(tx: &mut Transaction<'_, Sqlite>, op: &MutationOp) -> Result<u64, sqlx::Error> {
    let result = match *op {
        MutationOp::MarkWatched { show_id, episode } => {
            sqlx::query(
                "UPDATE episodes SET watched = 1 WHERE show_id = ? AND season = ? AND number = ?",
            )
            .bind(show_id)
            .bind(episode.season)
            .bind(episode.number)
            .execute(&mut **tx)
            .await?
        }
        MutationOp::MarkCollected { show_id, episode } => {
            sqlx::query(
                "UPDATE episodes SET collected = 1 WHERE show_id = ? AND season = ? AND number = ?",
            )
            .bind(show_id)
            .bind(episode.season)
            .bind(episode.number)
            .execute(&mut **tx)
            .await?
        }
        // No-op when the episode is unknown locally.
        MutationOp::SetLastWatched { show_id, episode } => {
            sqlx::query(
                "UPDATE shows SET last_watched_id = ( \
                   SELECT id FROM episodes WHERE show_id = ?1 AND season = ?2 AND number = ?3 \
                   ORDER BY id LIMIT 1) \
                 WHERE id = ?1 AND EXISTS ( \
                   SELECT 1 FROM episodes WHERE show_id = ?1 AND season = ?2 AND number = ?3)",
            )
            .bind(show_id)
            .bind(episode.season)
            .bind(episode.number)
            .execute(&mut **tx)
            .await?
        }
    };
    Ok(result.rows_affected())
}
