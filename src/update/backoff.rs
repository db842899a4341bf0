//! Checkpoint and failure backoff bookkeeping.
//!
//! The scheduler triggers an update [`UPDATE_INTERVAL_MINUTES`] after the
//! stored last-update time. A failed run stores a last-update time in the
//! past, so the next attempt comes sooner than a full interval would allow:
//! after 1, 2, 4, then 8 minutes. From the fourth consecutive failure on the
//! stored time is simply "now", i.e. a full interval.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::info;

use crate::settings::{SettingsStore, KEY_FAILED_COUNTER, KEY_LAST_UPDATE};

pub const UPDATE_INTERVAL_MINUTES: i64 = 15;

/// Value stored as last-update time after a failed run, given the number of
/// consecutive failures *before* this one.
pub fn next_eligible_update(now: DateTime<Utc>, failed: i64) -> DateTime<Utc> {
    if failed < 4 {
        let exp = failed.max(0) as u32;
        now - Duration::minutes(UPDATE_INTERVAL_MINUTES - 2_i64.pow(exp))
    } else {
        now
    }
}

pub async fn record_success(settings: &dyn SettingsStore, now: DateTime<Utc>) -> Result<()> {
    settings
        .put_all(&[
            (KEY_LAST_UPDATE, now.timestamp_millis().to_string()),
            (KEY_FAILED_COUNTER, "0".to_string()),
        ])
        .await
}

/// Returns the new consecutive failure count.
pub async fn record_failure(settings: &dyn SettingsStore, now: DateTime<Utc>) -> Result<i64> {
    let failed = settings.get_i64(KEY_FAILED_COUNTER, 0).await?;
    let eligible = next_eligible_update(now, failed);
    let failed = failed + 1;
    settings
        .put_all(&[
            (KEY_LAST_UPDATE, eligible.timestamp_millis().to_string()),
            (KEY_FAILED_COUNTER, failed.to_string()),
        ])
        .await?;
    info!(failed, next_update = %(eligible + Duration::minutes(UPDATE_INTERVAL_MINUTES)), "update backed off");
    Ok(failed)
}

/// Whether a scheduled update should run at `now`.
pub async fn is_update_due(settings: &dyn SettingsStore, now: DateTime<Utc>) -> Result<bool> {
    let last = settings.get_i64(KEY_LAST_UPDATE, 0).await?;
    let last = Utc.timestamp_millis_opt(last).single().unwrap_or_default();
    Ok(now >= last + Duration::minutes(UPDATE_INTERVAL_MINUTES))
}
