//! Optional background sweep that hard-deletes tombstoned messages once
//! their retention window lapses. Guarded off by default.

use chrono::{Duration, Utc};
use tokio::task::JoinHandle;

use crate::config::RetentionConfig;
use crate::store::Store;

/// Tombstones are kept this long after soft deletion before the sweep may
/// remove the rows for good.
const TOMBSTONE_TTL_DAYS: i64 = 7;

pub fn spawn_retention_task(store: Store, config: RetentionConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval);
        // The first tick fires immediately; skip it so the server finishes
        // starting up before the first sweep.
        interval.tick().await;

        loop {
            interval.tick().await;
            let cutoff = Utc::now() - Duration::days(TOMBSTONE_TTL_DAYS);
            match store.hard_delete_expired_tombstones(cutoff).await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(removed, "retention sweep removed expired tombstones");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "retention sweep failed");
                }
            }
        }
    })
}
