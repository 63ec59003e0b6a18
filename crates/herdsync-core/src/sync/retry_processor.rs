//! Replaying queued operations once the network allows

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::guard::SingleFlight;
use super::retry_queue::RetryQueue;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, RemoteErrorKind, Result};
use crate::models::{descriptor, OperationKind, SyncOperation, SyncStatus, WriteOrigin};
use crate::repository::RepositoryRegistry;
use crate::store::{Change, LocalStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Entries dropped because the local row is gone
    pub discarded: usize,
    /// Rows removed locally after the remote refused their references
    pub purged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    AlreadyRunning,
    Offline,
    Processed(ProcessReport),
}

enum Replay {
    Done,
    Discarded,
    Purged,
}

pub struct RetryProcessor {
    store: LocalStore,
    repositories: RepositoryRegistry,
    connectivity: ConnectivityMonitor,
    queue: Arc<RetryQueue>,
    flight: SingleFlight,
}

impl RetryProcessor {
    pub fn new(
        store: LocalStore,
        repositories: RepositoryRegistry,
        connectivity: ConnectivityMonitor,
        queue: Arc<RetryQueue>,
    ) -> Self {
        Self {
            store,
            repositories,
            connectivity,
            queue,
            flight: SingleFlight::new(),
        }
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Replay every eligible entry once.
    pub async fn process_queue(&self) -> ProcessOutcome {
        let Some(_flight) = self.flight.try_begin() else {
            return ProcessOutcome::AlreadyRunning;
        };
        if !self.connectivity.is_suitable_for_sync() {
            tracing::debug!("Skipping retry pass while offline");
            return ProcessOutcome::Offline;
        }

        let mut operations = self.queue.pending_operations().await;
        operations.sort_by_key(|op| descriptor(op.entity_type).push_priority);

        let mut report = ProcessReport::default();
        for op in operations {
            match self.replay(&op).await {
                Ok(replay) => {
                    match replay {
                        Replay::Done => report.succeeded += 1,
                        Replay::Discarded => report.discarded += 1,
                        Replay::Purged => report.purged += 1,
                    }
                    if let Err(error) = self.queue.remove(op.id).await {
                        tracing::error!(
                            id = %op.id,
                            "Failed to remove replayed operation: {error}"
                        );
                    }
                }
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        entity = %op.entity_type,
                        id = %op.entity_id,
                        operation = %op.operation,
                        attempt = op.retry_count + 1,
                        "Retry failed: {error}"
                    );
                    match self.queue.record_failure(op.id, &error.to_string()).await {
                        Ok(Some(updated)) if updated.is_exhausted(self.queue.policy()) => {
                            self.mark_failed(&updated).await;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            tracing::error!(id = %op.id, "Failed to record retry failure: {error}");
                        }
                    }
                }
            }
        }

        if report != ProcessReport::default() {
            tracing::info!(
                succeeded = report.succeeded,
                failed = report.failed,
                discarded = report.discarded,
                purged = report.purged,
                "Retry pass finished"
            );
        }
        ProcessOutcome::Processed(report)
    }

    async fn mark_failed(&self, op: &SyncOperation) {
        if let Err(error) = self
            .store
            .set_sync_status(op.entity_type, &op.entity_id, SyncStatus::Failed)
            .await
        {
            tracing::error!(
                entity = %op.entity_type,
                id = %op.entity_id,
                "Failed to mark row as failed: {error}"
            );
        }
    }

    async fn replay(&self, op: &SyncOperation) -> Result<Replay> {
        let repository = self.repositories.get(op.entity_type);
        let local = self.store.get(op.entity_type, &op.entity_id).await?;

        match op.operation {
            OperationKind::Create => {
                let Some(record) = local else {
                    return Ok(Replay::Discarded);
                };
                match repository.create(&record).await {
                    Ok(()) => {}
                    Err(error) if error.is_duplicate() => repository.update(&record).await?,
                    Err(error) if error.is_foreign_key_violation() => {
                        tracing::warn!(
                            entity = %op.entity_type,
                            id = %op.entity_id,
                            "Remote refused queued row with a missing reference; removing it locally: {error}"
                        );
                        let purge = Change::Purge {
                            entity: op.entity_type,
                            id: op.entity_id.clone(),
                        };
                        self.store.commit(WriteOrigin::Internal, vec![purge]).await?;
                        return Ok(Replay::Purged);
                    }
                    Err(error) => return Err(Error::Remote(error)),
                }
            }
            OperationKind::Update => {
                let Some(record) = local else {
                    return Ok(Replay::Discarded);
                };
                match repository.update(&record).await {
                    Ok(()) => {}
                    Err(error) if error.kind == RemoteErrorKind::NotFound => {
                        repository.create(&record).await?;
                    }
                    Err(error) => return Err(Error::Remote(error)),
                }
            }
            OperationKind::Delete => {
                let deleted_at = local.as_ref().and_then(|record| record.deleted_at);
                repository.delete(&op.entity_id, deleted_at).await?;
                if local.is_none() {
                    return Ok(Replay::Done);
                }
            }
        }

        self.store
            .set_sync_status(op.entity_type, &op.entity_id, SyncStatus::Synced)
            .await?;
        Ok(Replay::Done)
    }

    /// Replay on connectivity transitions and whenever backoff expires.
    pub fn spawn_watcher(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).watch(shutdown))
    }

    async fn watch(self: Arc<Self>, shutdown: CancellationToken) {
        let mut status = self.connectivity.subscribe();
        let mut available = status.borrow_and_update().is_suitable_for_sync();
        if available && self.queue.pending_count().await > 0 {
            self.process_queue().await;
        }

        loop {
            let delay = if available {
                self.queue.next_retry_delay(Utc::now()).await
            } else {
                None
            };
            let backoff_elapsed = async {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_available = status.borrow_and_update().is_suitable_for_sync();
                    if now_available && !available && self.queue.pending_count().await > 0 {
                        tracing::info!("Connectivity restored; draining retry queue");
                        self.process_queue().await;
                    }
                    available = now_available;
                }
                () = self.queue.wait_for_enqueue() => {}
                () = backoff_elapsed => {
                    if self.process_queue().await == ProcessOutcome::AlreadyRunning {
                        tokio::time::sleep(self.queue.policy().base).await;
                    }
                }
            }
        }
        tracing::debug!("Retry watcher stopped");
    }
}
