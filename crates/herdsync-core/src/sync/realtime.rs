//! Applying remote change notifications as they arrive
//!
//! One listening task per realtime-enabled entity kind. Applied rows are
//! committed with [`WriteOrigin::Remote`](crate::models::WriteOrigin), so the
//! push coordinator never echoes them back.

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::apply::{apply_remote_change, ApplyOutcome};
use crate::auth::IdentityProvider;
use crate::error::{RemoteError, Result};
use crate::models::{descriptor, entity_for_table, realtime_entities, BackoffPolicy, EntityType};
use crate::remote::{ChangeStream, RemoteChange, RemoteStore};
use crate::store::LocalStore;

/// Which channels a [`RealtimeSync::start_subscriptions`] call opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionReport {
    pub farm_id: String,
    pub established: Vec<EntityType>,
    pub failed: Vec<(EntityType, RemoteError)>,
}

impl SubscriptionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Session {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct RealtimeSync {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    reconnect: BackoffPolicy,
    shutdown: CancellationToken,
    session: Mutex<Option<Session>>,
}

impl RealtimeSync {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        reconnect: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            remote,
            identity,
            reconnect,
            shutdown,
            session: Mutex::new(None),
        }
    }

    /// Open every channel for the current farm, replacing any running session.
    ///
    /// Fails only when the farm cannot be resolved; per-channel failures are
    /// reported in the returned [`SubscriptionReport`].
    pub async fn start_subscriptions(&self) -> Result<SubscriptionReport> {
        self.stop_subscriptions().await;
        let farm_id = self.identity.farm_id().await?;

        let opened = join_all(realtime_entities().map(|entity| {
            let farm_id = farm_id.clone();
            async move {
                let stream = self.remote.subscribe(descriptor(entity).table, &farm_id).await;
                (entity, stream)
            }
        }))
        .await;

        let cancel = self.shutdown.child_token();
        let mut report = SubscriptionReport {
            farm_id: farm_id.clone(),
            established: Vec::new(),
            failed: Vec::new(),
        };
        let mut tasks = Vec::new();
        for (entity, stream) in opened {
            match stream {
                Ok(stream) => {
                    let listener = Listener {
                        entity,
                        farm_id: farm_id.clone(),
                        store: self.store.clone(),
                        remote: Arc::clone(&self.remote),
                        reconnect: self.reconnect,
                    };
                    tasks.push(tokio::spawn(listener.run(stream, cancel.clone())));
                    report.established.push(entity);
                }
                Err(error) => {
                    tracing::warn!(entity = %entity, "Failed to open realtime channel: {error}");
                    report.failed.push((entity, error));
                }
            }
        }

        tracing::info!(
            farm_id = %farm_id,
            established = report.established.len(),
            failed = report.failed.len(),
            "Realtime subscriptions started"
        );
        *self.session.lock().await = Some(Session { cancel, tasks });
        Ok(report)
    }

    /// Cancel every listening task and wait for it to finish. Safe to repeat.
    pub async fn stop_subscriptions(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        session.cancel.cancel();
        for task in session.tasks {
            if let Err(error) = task.await {
                tracing::warn!("Realtime listener ended abnormally: {error}");
            }
        }
        tracing::info!("Realtime subscriptions stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Apply one notification to the replica.
    pub async fn apply_change(&self, change: &RemoteChange) -> Result<ApplyOutcome> {
        let Some(entity) = entity_for_table(&change.table) else {
            tracing::warn!(table = %change.table, "Dropping change for unknown table");
            return Ok(ApplyOutcome::Dropped);
        };
        apply_remote_change(&self.store, entity, change).await
    }
}

struct Listener {
    entity: EntityType,
    farm_id: String,
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    reconnect: BackoffPolicy,
}

impl Listener {
    async fn run(self, mut stream: ChangeStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(change) => self.apply(&change).await,
                    None => {
                        tracing::warn!(
                            entity = %self.entity,
                            "Realtime channel closed; reconnecting"
                        );
                        match self.resubscribe(&cancel).await {
                            Some(reopened) => stream = reopened,
                            None => break,
                        }
                    }
                },
            }
        }
        tracing::debug!(entity = %self.entity, "Realtime listener stopped");
    }

    async fn apply(&self, change: &RemoteChange) {
        match apply_remote_change(&self.store, self.entity, change).await {
            Ok(outcome) => {
                tracing::debug!(
                    entity = %self.entity,
                    kind = ?change.kind,
                    ?outcome,
                    "Applied remote change"
                );
            }
            Err(error) => {
                tracing::warn!(
                    entity = %self.entity,
                    kind = ?change.kind,
                    "Failed to apply remote change: {error}"
                );
            }
        }
    }

    /// Reopen the channel with capped backoff. `None` once cancelled.
    async fn resubscribe(&self, cancel: &CancellationToken) -> Option<ChangeStream> {
        let table = descriptor(self.entity).table;
        let mut attempt = 0u32;
        loop {
            let delay = self.reconnect.delay_for(attempt);
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            match self.remote.subscribe(table, &self.farm_id).await {
                Ok(stream) => {
                    tracing::info!(entity = %self.entity, attempt, "Realtime channel reopened");
                    return Some(stream);
                }
                Err(error) => {
                    tracing::warn!(
                        entity = %self.entity,
                        attempt,
                        "Realtime reconnect failed: {error}"
                    );
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FixedIdentity;
    use crate::error::Error;
    use crate::models::{Cattle, LocalRecord, WriteOrigin};
    use crate::remote::ChangeKind;
    use crate::store::Change;
    use crate::test_support::{InMemoryRemote, RemoteOp};
    use serde_json::json;
    use std::time::Duration;

    fn fast_reconnect() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(5),
            cap: Duration::from_millis(20),
            max_retries: 5,
        }
    }

    async fn realtime(
        remote: &Arc<InMemoryRemote>,
        identity: FixedIdentity,
    ) -> (LocalStore, RealtimeSync) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let dyn_remote: Arc<dyn RemoteStore> = remote.clone();
        let sync = RealtimeSync::new(
            store.clone(),
            dyn_remote,
            Arc::new(identity),
            fast_reconnect(),
            CancellationToken::new(),
        );
        (store, sync)
    }

    fn cattle_insert(id: &str) -> RemoteChange {
        RemoteChange {
            table: "cattle".to_string(),
            kind: ChangeKind::Insert,
            record: Some(json!({ "id": id, "farm_id": "farm-1", "tag_number": "A-1" })),
            old_record: None,
        }
    }

    async fn wait_for_row(store: &LocalStore, id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.get(EntityType::Cattle, id).await.unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn wait_for_subscribers(remote: &InMemoryRemote, table: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote.subscriber_count(table) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_redelivered_insert_is_idempotent() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, sync) = realtime(&remote, FixedIdentity::new("farm-1")).await;

        let first = sync.apply_change(&cattle_insert("cow-1")).await.unwrap();
        let once = store.get(EntityType::Cattle, "cow-1").await.unwrap().unwrap();
        let second = sync.apply_change(&cattle_insert("cow-1")).await.unwrap();
        let twice = store.get(EntityType::Cattle, "cow-1").await.unwrap().unwrap();

        assert_eq!(first, ApplyOutcome::Inserted);
        assert_eq!(second, ApplyOutcome::Unchanged);
        assert_eq!(once, twice);
        assert_eq!(store.list_all(EntityType::Cattle, None).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_for_unknown_row_is_a_no_op() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, sync) = realtime(&remote, FixedIdentity::new("farm-1")).await;
        let delete = RemoteChange {
            table: "cattle".to_string(),
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(json!({ "id": "never-seen" })),
        };

        let outcome = sync.apply_change(&delete).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert!(store.list_all(EntityType::Cattle, None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_applied_changes_are_committed_as_remote() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, sync) = realtime(&remote, FixedIdentity::new("farm-1")).await;
        let mut commits = store.subscribe();

        sync.apply_change(&cattle_insert("cow-1")).await.unwrap();
        let event = commits.recv().await.unwrap();
        assert_eq!(event.origin, WriteOrigin::Remote);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscriptions_apply_stream_and_stop() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, sync) = realtime(&remote, FixedIdentity::new("farm-1")).await;

        let report = sync.start_subscriptions().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.farm_id, "farm-1");
        assert_eq!(report.established.len(), realtime_entities().count());
        assert_eq!(remote.subscriber_count("cattle"), 1);

        remote.emit(cattle_insert("cow-1"));
        wait_for_row(&store, "cow-1").await;

        sync.stop_subscriptions().await;
        sync.stop_subscriptions().await;
        assert!(!sync.is_running().await);
        assert_eq!(remote.subscriber_count("cattle"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_individual_channel_failures_are_reported() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.fail("photos", RemoteOp::Subscribe, RemoteError::transient("socket closed"));
        let (_store, sync) = realtime(&remote, FixedIdentity::new("farm-1")).await;

        let report = sync.start_subscriptions().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, EntityType::Photo);
        assert!(report.established.contains(&EntityType::Cattle));
        sync.stop_subscriptions().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_session_aborts_startup() {
        let remote = Arc::new(InMemoryRemote::new());
        let (_store, sync) = realtime(&remote, FixedIdentity::signed_out()).await;

        let error = sync.start_subscriptions().await.unwrap_err();
        assert!(matches!(error, Error::Auth(_)));
        assert!(!sync.is_running().await);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_channel_is_reopened() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, sync) = realtime(&remote, FixedIdentity::new("farm-1")).await;
        sync.start_subscriptions().await.unwrap();

        remote.drop_subscriptions("cattle");
        wait_for_subscribers(&remote, "cattle", 1).await;

        remote.emit(cattle_insert("cow-2"));
        wait_for_row(&store, "cow-2").await;
        sync.stop_subscriptions().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_rows_are_untouched_by_foreign_table_changes() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, sync) = realtime(&remote, FixedIdentity::new("farm-1")).await;
        let cow = LocalRecord::from_model(&Cattle::new("farm-1", "A-9")).unwrap();
        store
            .commit(WriteOrigin::Local, vec![Change::Insert(cow)])
            .await
            .unwrap();

        let change = RemoteChange {
            table: "not_a_table".to_string(),
            kind: ChangeKind::Insert,
            record: Some(json!({ "id": "x" })),
            old_record: None,
        };
        assert_eq!(sync.apply_change(&change).await.unwrap(), ApplyOutcome::Dropped);
        assert_eq!(store.list_all(EntityType::Cattle, None).await.unwrap().len(), 1);
    }
}
