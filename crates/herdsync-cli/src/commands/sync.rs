use std::path::Path;

use herdsync_core::sync::{FullSyncOptions, FullSyncOutcome, FullSyncReport, PushAllOutcome};
use herdsync_core::EntityType;

use crate::commands::common::{
    format_snapshot_line, format_sync_timestamp, open_engine, ResolvedProfile,
};
use crate::error::CliError;

pub async fn run_sync(
    force_reference: bool,
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(), CliError> {
    let handle = open_engine(db_path, resolved).await?;
    let outcome = handle
        .engine
        .manager()
        .perform_full_sync(FullSyncOptions { force_reference })
        .await?;

    match outcome {
        FullSyncOutcome::AlreadyRunning => return Err(CliError::AlreadyRunning("full sync")),
        FullSyncOutcome::Completed(report) => {
            for line in format_full_sync_lines(&report) {
                println!("{line}");
            }
        }
    }

    // Replay whatever the queue already holds while we are connected
    let processed = handle.engine.processor().process_queue().await;
    tracing::debug!(?processed, "Retry pass after full sync");
    Ok(())
}

pub async fn run_pull(
    entity: EntityType,
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(), CliError> {
    let handle = open_engine(db_path, resolved).await?;
    let changed = handle.engine.manager().pull_entity(entity).await?;
    println!("Pulled {entity}: {changed} row(s) changed");
    Ok(())
}

pub async fn run_push_all(db_path: &Path, resolved: &ResolvedProfile) -> Result<(), CliError> {
    let handle = open_engine(db_path, resolved).await?;
    match handle.engine.manager().push_all_pending_records().await? {
        PushAllOutcome::AlreadyRunning => Err(CliError::AlreadyRunning("push-all")),
        PushAllOutcome::Completed(report) => {
            println!("Pushed {} row(s)", report.pushed);
            for (row, error) in &report.failures {
                println!("  failed {row}: {error}");
            }
            Ok(())
        }
    }
}

/// Host every sync trigger until Ctrl-C.
pub async fn run_watch(
    no_initial_sync: bool,
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(), CliError> {
    let handle = open_engine(db_path, resolved).await?;
    let engine = handle.engine.with_probe(handle.health_url);

    let report = engine.start().await?;
    for (entity, error) in &report.failed {
        tracing::warn!(entity = %entity, "Subscription failed: {error}");
    }
    println!(
        "Watching farm {} ({} of {} channels live). Press Ctrl-C to stop.",
        report.farm_id,
        report.established.len(),
        report.established.len() + report.failed.len()
    );

    if !no_initial_sync {
        match engine
            .manager()
            .perform_full_sync(FullSyncOptions::default())
            .await
        {
            Ok(FullSyncOutcome::Completed(report)) => {
                for line in format_full_sync_lines(&report) {
                    println!("{line}");
                }
            }
            Ok(FullSyncOutcome::AlreadyRunning) => {}
            Err(error) => tracing::error!("Initial full sync failed: {error}"),
        }
    }

    let mut status = engine.manager().status().subscribe();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                tracing::info!("{}", format_snapshot_line(&snapshot));
            }
        }
    }

    println!("Stopping...");
    engine.shutdown().await;
    Ok(())
}

pub fn format_full_sync_lines(report: &FullSyncReport) -> Vec<String> {
    let total: usize = report.pulled.values().sum();
    let mut lines = vec![format!(
        "Full sync for farm {} finished at {}: {total} row(s) changed",
        report.farm_id,
        format_sync_timestamp(report.finished_at)
    )];
    lines.extend(
        report
            .pulled
            .iter()
            .filter(|(_, changed)| **changed > 0)
            .map(|(table, changed)| format!("  {table}: {changed}")),
    );
    if !report.skipped.is_empty() {
        lines.push(format!("  skipped (fresh): {}", report.skipped.join(", ")));
    }
    lines.extend(
        report
            .stage_errors
            .iter()
            .map(|(table, error)| format!("  failed {table}: {error}")),
    );
    lines
}
