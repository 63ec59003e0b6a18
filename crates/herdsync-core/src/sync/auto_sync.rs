//! Pushing local commits to the remote store
//!
//! Every `Local` commit is pushed row by row. Rows that cannot be pushed right
//! now land in the retry queue; rows the remote refuses because a referenced
//! row is missing are purged from the replica.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::guard::{PushSuppression, SingleFlight};
use super::retry_queue::RetryQueue;
use crate::connectivity::ConnectivityMonitor;
use crate::error::RemoteError;
use crate::models::{
    descriptor, EntityType, LocalRecord, OperationKind, SyncOperation, SyncStatus, WriteOrigin,
};
use crate::repository::RepositoryRegistry;
use crate::store::{Change, CommitEvent, LocalStore};

/// Per-cycle push counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub pushed: usize,
    pub queued: usize,
    pub purged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Not a local commit
    Ignored,
    /// Pushes are suppressed; the rows were queued instead
    Deferred(usize),
    /// A push cycle for an earlier commit is still running
    SkippedInFlight,
    Processed(PushReport),
}

pub struct AutoSync {
    store: LocalStore,
    repositories: RepositoryRegistry,
    connectivity: ConnectivityMonitor,
    queue: Arc<RetryQueue>,
    suppression: PushSuppression,
    flight: SingleFlight,
}

impl AutoSync {
    pub fn new(
        store: LocalStore,
        repositories: RepositoryRegistry,
        connectivity: ConnectivityMonitor,
        queue: Arc<RetryQueue>,
        suppression: PushSuppression,
    ) -> Self {
        Self {
            store,
            repositories,
            connectivity,
            queue,
            suppression,
            flight: SingleFlight::new(),
        }
    }

    /// Push the rows of one commit.
    pub async fn handle_commit(&self, event: &CommitEvent) -> PushOutcome {
        if event.origin != WriteOrigin::Local || event.is_empty() {
            return PushOutcome::Ignored;
        }
        if self.suppression.is_active() {
            return PushOutcome::Deferred(self.defer(event).await);
        }
        let Some(_flight) = self.flight.try_begin() else {
            tracing::debug!("Push cycle already in flight; skipping commit");
            return PushOutcome::SkippedInFlight;
        };

        let mut report = PushReport::default();
        let mut inserted: Vec<&LocalRecord> = event.inserted.iter().collect();
        inserted.sort_by_key(|record| descriptor(record.entity_type).push_priority);

        for record in inserted {
            self.push_insert(record, &mut report).await;
        }
        for record in &event.updated {
            self.push_update(record, &mut report).await;
        }
        for record in &event.deleted {
            self.push_delete(record, &mut report).await;
        }

        tracing::info!(
            pushed = report.pushed,
            queued = report.queued,
            purged = report.purged,
            "Push cycle finished"
        );
        PushOutcome::Processed(report)
    }

    /// Subscribe to commits now and handle each on its own task until cancelled.
    pub fn spawn_listener(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let commits = self.store.subscribe();
        tokio::spawn(Arc::clone(self).listen(commits, shutdown))
    }

    async fn listen(
        self: Arc<Self>,
        mut commits: broadcast::Receiver<CommitEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = commits.recv() => match received {
                    Ok(event) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            this.handle_commit(&event).await;
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            skipped,
                            "Commit listener lagged; missed commits are not pushed"
                        );
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Commit listener stopped");
    }

    async fn push_insert(&self, record: &LocalRecord, report: &mut PushReport) {
        if !self.connectivity.is_suitable_for_sync() {
            self.queue_row(record, OperationKind::Create, None, report).await;
            return;
        }

        match self.repositories.get(record.entity_type).create(record).await {
            Ok(()) => self.mark(record, SyncStatus::Synced, report).await,
            Err(error) if error.is_foreign_key_violation() => {
                tracing::warn!(
                    entity = %record.entity_type,
                    id = %record.id,
                    "Remote refused row with a missing reference; removing it locally: {error}"
                );
                self.purge(record.entity_type, &record.id, report).await;
            }
            Err(error) => {
                self.queue_row(record, OperationKind::Create, Some(&error), report)
                    .await;
            }
        }
    }

    async fn push_update(&self, record: &LocalRecord, report: &mut PushReport) {
        if !self.connectivity.is_suitable_for_sync() {
            self.queue_row(record, OperationKind::Update, None, report).await;
            return;
        }

        match self.repositories.get(record.entity_type).update(record).await {
            Ok(()) => self.mark(record, SyncStatus::Synced, report).await,
            Err(error) => {
                if error.is_foreign_key_violation() {
                    tracing::warn!(
                        entity = %record.entity_type,
                        id = %record.id,
                        "Update references a row the remote does not have yet: {error}"
                    );
                }
                self.queue_row(record, OperationKind::Update, Some(&error), report)
                    .await;
            }
        }
    }

    async fn push_delete(&self, record: &LocalRecord, report: &mut PushReport) {
        if !self.connectivity.is_suitable_for_sync() {
            self.queue_row(record, OperationKind::Delete, None, report).await;
            return;
        }

        match self
            .repositories
            .get(record.entity_type)
            .delete(&record.id, record.deleted_at)
            .await
        {
            Ok(()) => self.mark(record, SyncStatus::Synced, report).await,
            Err(error) => {
                self.queue_row(record, OperationKind::Delete, Some(&error), report)
                    .await;
            }
        }
    }

    /// Queue every row of a commit made while pushes are suppressed.
    async fn defer(&self, event: &CommitEvent) -> usize {
        let mut report = PushReport::default();
        for record in &event.inserted {
            self.queue_row(record, OperationKind::Create, None, &mut report)
                .await;
        }
        for record in &event.updated {
            self.queue_row(record, OperationKind::Update, None, &mut report)
                .await;
        }
        for record in &event.deleted {
            self.queue_row(record, OperationKind::Delete, None, &mut report)
                .await;
        }
        report.queued
    }

    async fn queue_row(
        &self,
        record: &LocalRecord,
        operation: OperationKind,
        error: Option<&RemoteError>,
        report: &mut PushReport,
    ) {
        match error {
            Some(error) => tracing::warn!(
                entity = %record.entity_type,
                id = %record.id,
                operation = %operation,
                "Push failed; queued for retry: {error}"
            ),
            None => tracing::debug!(
                entity = %record.entity_type,
                id = %record.id,
                operation = %operation,
                "Push deferred; queued for retry"
            ),
        }

        // Must land before the enqueue wakes the retry watcher
        self.set_status(record.entity_type, &record.id, SyncStatus::Pending)
            .await;
        let op = SyncOperation::new(record.entity_type, record.id.clone(), operation);
        if let Err(error) = self.queue.enqueue(op).await {
            tracing::error!(
                entity = %record.entity_type,
                id = %record.id,
                "Failed to persist retry operation: {error}"
            );
            return;
        }
        report.queued += 1;
    }

    async fn mark(&self, record: &LocalRecord, status: SyncStatus, report: &mut PushReport) {
        report.pushed += 1;
        tracing::debug!(entity = %record.entity_type, id = %record.id, "Pushed row");
        self.set_status(record.entity_type, &record.id, status).await;
    }

    async fn set_status(&self, entity: EntityType, id: &str, status: SyncStatus) {
        if let Err(error) = self.store.set_sync_status(entity, id, status).await {
            tracing::warn!(entity = %entity, id = %id, "Failed to update sync status: {error}");
        }
    }

    async fn purge(&self, entity: EntityType, id: &str, report: &mut PushReport) {
        let change = Change::Purge {
            entity,
            id: id.to_string(),
        };
        match self.store.commit(WriteOrigin::Internal, vec![change]).await {
            Ok(_) => report.purged += 1,
            Err(error) => {
                tracing::error!(entity = %entity, id = %id, "Failed to purge refused row: {error}");
            }
        }
    }
}
