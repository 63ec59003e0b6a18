use std::path::Path;

use chrono::{DateTime, Utc};
use herdsync_core::models::SyncStatus;
use herdsync_core::sync::LAST_FULL_SYNC_KEY;

use crate::commands::common::{
    format_status_lines, format_sync_timestamp, open_queue, ResolvedProfile, StatusItem,
};
use crate::error::CliError;

pub async fn run_status(
    as_json: bool,
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(), CliError> {
    let (store, queue) = open_queue(db_path, resolved).await?;
    let last_full_sync: Option<DateTime<Utc>> = store.kv_get_json(LAST_FULL_SYNC_KEY).await?;
    let item = StatusItem {
        profile: resolved.name.clone(),
        db_path: db_path.display().to_string(),
        last_full_sync: last_full_sync.map(format_sync_timestamp),
        pending_ops: queue.pending_count().await,
        failed_ops: queue.failed_count().await,
        pending_rows: store.count_by_status(SyncStatus::Pending).await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }
    for line in format_status_lines(&item) {
        println!("{line}");
    }
    Ok(())
}
