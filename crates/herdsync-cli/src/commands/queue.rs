use std::path::Path;

use herdsync_core::sync::ProcessOutcome;

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_queue_line, open_engine, open_queue, queue_item, QueueItem, ResolvedProfile,
};
use crate::error::CliError;

pub async fn run_queue(
    command: QueueCommands,
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(), CliError> {
    match command {
        QueueCommands::List { json } => run_queue_list(json, db_path, resolved).await,
        QueueCommands::Clear { all } => run_queue_clear(all, db_path, resolved).await,
        QueueCommands::Process => run_queue_process(db_path, resolved).await,
    }
}

async fn run_queue_list(
    as_json: bool,
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(), CliError> {
    let (_store, queue) = open_queue(db_path, resolved).await?;
    let policy = queue.policy();
    let items = queue
        .all()
        .await
        .iter()
        .map(|operation| queue_item(operation, operation.is_exhausted(policy)))
        .collect::<Vec<QueueItem>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Retry queue is empty.");
        return Ok(());
    }
    for item in &items {
        println!("{}", format_queue_line(item));
    }
    Ok(())
}

async fn run_queue_clear(
    all: bool,
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(), CliError> {
    let (_store, queue) = open_queue(db_path, resolved).await?;
    if all {
        let removed = queue.clear_all().await?;
        println!("Removed {removed} queued operation(s)");
    } else {
        let removed = queue.clear_failed().await?;
        println!("Removed {removed} failed operation(s)");
    }
    Ok(())
}

async fn run_queue_process(db_path: &Path, resolved: &ResolvedProfile) -> Result<(), CliError> {
    let handle = open_engine(db_path, resolved).await?;
    match handle.engine.processor().process_queue().await {
        ProcessOutcome::AlreadyRunning => Err(CliError::AlreadyRunning("retry pass")),
        ProcessOutcome::Offline => {
            println!("Backend unreachable; nothing replayed.");
            Ok(())
        }
        ProcessOutcome::Processed(report) => {
            println!(
                "Replayed {} operation(s): {} failed, {} discarded, {} purged",
                report.succeeded, report.failed, report.discarded, report.purged
            );
            let remaining = handle.engine.queue().pending_count().await;
            if remaining > 0 {
                println!("{remaining} operation(s) still pending");
            }
            Ok(())
        }
    }
}
