//! Durable queue of deferred pushes
//!
//! The whole queue is kept in memory and rewritten to the replica's key-value
//! table on every mutation, so a crash never leaves a half-written queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{BackoffPolicy, SyncOperation};
use crate::store::LocalStore;

/// Key-value slot holding the serialized queue.
pub const RETRY_QUEUE_KEY: &str = "sync.retry_queue";

pub struct RetryQueue {
    store: LocalStore,
    policy: BackoffPolicy,
    operations: Mutex<Vec<SyncOperation>>,
    enqueued: Notify,
}

impl RetryQueue {
    /// Load the persisted queue. An unreadable blob is logged and replaced.
    pub async fn load(store: LocalStore, policy: BackoffPolicy) -> Result<Self> {
        let operations = match store.kv_get_json::<Vec<SyncOperation>>(RETRY_QUEUE_KEY).await {
            Ok(operations) => operations.unwrap_or_default(),
            Err(crate::Error::Serialization(error)) => {
                tracing::warn!("Discarding unreadable retry queue: {error}");
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        if !operations.is_empty() {
            tracing::info!(count = operations.len(), "Loaded retry queue");
        }

        Ok(Self {
            store,
            policy,
            operations: Mutex::new(operations),
            enqueued: Notify::new(),
        })
    }

    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Add `operation`, replacing any entry with the same entity, id and kind.
    pub async fn enqueue(&self, operation: SyncOperation) -> Result<()> {
        let mut operations = self.operations.lock().await;
        let mut next = operations.clone();
        match next.iter_mut().find(|existing| existing.key() == operation.key()) {
            Some(existing) => *existing = operation.clone(),
            None => next.push(operation.clone()),
        }
        self.persist(&next).await?;
        *operations = next;
        drop(operations);

        tracing::debug!(
            entity = %operation.entity_type,
            id = %operation.entity_id,
            operation = %operation.operation,
            "Enqueued sync operation"
        );
        self.enqueued.notify_one();
        Ok(())
    }

    /// Resolves after the next [`RetryQueue::enqueue`].
    pub async fn wait_for_enqueue(&self) {
        self.enqueued.notified().await;
    }

    /// Every entry, exhausted ones included, in queue order.
    pub async fn all(&self) -> Vec<SyncOperation> {
        self.operations.lock().await.clone()
    }

    /// Entries eligible for replay now.
    pub async fn pending_operations(&self) -> Vec<SyncOperation> {
        self.pending_operations_at(Utc::now()).await
    }

    pub async fn pending_operations_at(&self, now: DateTime<Utc>) -> Vec<SyncOperation> {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|operation| operation.can_retry_now(now, &self.policy))
            .cloned()
            .collect()
    }

    /// Entries that ran out of retries.
    pub async fn failed_operations(&self) -> Vec<SyncOperation> {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|operation| operation.is_exhausted(&self.policy))
            .cloned()
            .collect()
    }

    /// Entries still scheduled for automatic replay.
    pub async fn pending_count(&self) -> usize {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|operation| !operation.is_exhausted(&self.policy))
            .count()
    }

    pub async fn failed_count(&self) -> usize {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|operation| operation.is_exhausted(&self.policy))
            .count()
    }

    /// Count a failed replay and push the entry's next attempt back.
    pub async fn record_failure(&self, id: Uuid, error: &str) -> Result<Option<SyncOperation>> {
        let mut operations = self.operations.lock().await;
        let mut next = operations.clone();
        let Some(operation) = next.iter_mut().find(|operation| operation.id == id) else {
            return Ok(None);
        };
        operation.retry_count = operation.retry_count.saturating_add(1);
        operation.last_attempt_at = Some(Utc::now());
        operation.last_error = Some(error.to_string());
        let updated = operation.clone();

        self.persist(&next).await?;
        *operations = next;

        if updated.is_exhausted(&self.policy) {
            tracing::warn!(
                entity = %updated.entity_type,
                id = %updated.entity_id,
                operation = %updated.operation,
                "Sync operation exhausted its retries: {error}"
            );
        }
        Ok(Some(updated))
    }

    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        self.retain(|operation| operation.id != id).await.map(|removed| removed > 0)
    }

    /// Drop every exhausted entry, returning how many were removed.
    pub async fn clear_failed(&self) -> Result<usize> {
        let policy = self.policy;
        self.retain(|operation| !operation.is_exhausted(&policy)).await
    }

    pub async fn clear_all(&self) -> Result<usize> {
        self.retain(|_| false).await
    }

    /// Time until the soonest scheduled entry becomes eligible.
    ///
    /// `Some(Duration::ZERO)` when something is eligible already; `None` when
    /// nothing is scheduled.
    pub async fn next_retry_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.operations
            .lock()
            .await
            .iter()
            .filter_map(|operation| operation.next_attempt_at(&self.policy))
            .min()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    async fn retain(&self, keep: impl Fn(&SyncOperation) -> bool) -> Result<usize> {
        let mut operations = self.operations.lock().await;
        let next: Vec<SyncOperation> = operations.iter().filter(|op| keep(op)).cloned().collect();
        let removed = operations.len() - next.len();
        if removed == 0 {
            return Ok(0);
        }
        self.persist(&next).await?;
        *operations = next;
        Ok(removed)
    }

    async fn persist(&self, operations: &[SyncOperation]) -> Result<()> {
        self.store.kv_set_json(RETRY_QUEUE_KEY, operations).await
    }
}
