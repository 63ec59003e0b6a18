//! Wiring of the sync components around one replica

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::auto_sync::AutoSync;
use super::guard::PushSuppression;
use super::manager::SyncManager;
use super::realtime::{RealtimeSync, SubscriptionReport};
use super::retry_processor::RetryProcessor;
use super::retry_queue::RetryQueue;
use super::status::SyncSnapshot;
use crate::auth::IdentityProvider;
use crate::config::SyncSettings;
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::error::{Error, Result};
use crate::remote::RemoteStore;
use crate::repository::RepositoryRegistry;
use crate::store::LocalStore;

/// Owns every sync component and the background tasks that drive them.
pub struct SyncEngine {
    store: LocalStore,
    connectivity: ConnectivityMonitor,
    suppression: PushSuppression,
    queue: Arc<RetryQueue>,
    auto_sync: Arc<AutoSync>,
    realtime: Arc<RealtimeSync>,
    manager: Arc<SyncManager>,
    processor: Arc<RetryProcessor>,
    settings: SyncSettings,
    probe_url: Option<String>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub async fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        connectivity: ConnectivityMonitor,
        settings: SyncSettings,
    ) -> Result<Self> {
        let policy = settings.backoff_policy();
        let queue = Arc::new(RetryQueue::load(store.clone(), policy).await?);
        let repositories = RepositoryRegistry::new(&remote);
        let suppression = PushSuppression::new();
        let shutdown = CancellationToken::new();

        let auto_sync = Arc::new(AutoSync::new(
            store.clone(),
            repositories.clone(),
            connectivity.clone(),
            Arc::clone(&queue),
            suppression.clone(),
        ));
        let realtime = Arc::new(RealtimeSync::new(
            store.clone(),
            Arc::clone(&remote),
            Arc::clone(&identity),
            policy,
            shutdown.child_token(),
        ));
        let manager = Arc::new(SyncManager::new(
            store.clone(),
            repositories.clone(),
            identity,
            Arc::clone(&queue),
            suppression.clone(),
            settings.reference_ttl,
        ));
        let processor = Arc::new(RetryProcessor::new(
            store.clone(),
            repositories,
            connectivity.clone(),
            Arc::clone(&queue),
        ));

        Ok(Self {
            store,
            connectivity,
            suppression,
            queue,
            auto_sync,
            realtime,
            manager,
            processor,
            settings,
            probe_url: None,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Probe `url` periodically and feed the connectivity monitor.
    #[must_use]
    pub fn with_probe(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }

    /// Start the commit listener, the retry watcher, the probe and the
    /// realtime subscriptions.
    ///
    /// Background tasks keep running when subscription startup fails; the
    /// error is returned so the caller can retry [`RealtimeSync::start_subscriptions`].
    pub async fn start(&self) -> Result<SubscriptionReport> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            tasks.push(self.auto_sync.spawn_listener(self.shutdown.child_token()));
            tasks.push(self.processor.spawn_watcher(self.shutdown.child_token()));
            if let Some(url) = &self.probe_url {
                let probe = ReachabilityProbe::new(
                    url.clone(),
                    self.settings.probe_interval,
                    self.settings.probe_timeout,
                    self.connectivity.clone(),
                )
                .map_err(|error| Error::InvalidInput(format!("reachability probe: {error}")))?;
                tasks.push(tokio::spawn(probe.run(self.shutdown.child_token())));
            }
            tracing::info!(tasks = tasks.len(), "Sync engine started");
        }
        drop(tasks);

        self.realtime.start_subscriptions().await
    }

    /// Stop every background task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.realtime.stop_subscriptions().await;
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(error) = task.await {
                tracing::warn!("Sync task ended abnormally: {error}");
            }
        }
        tracing::info!("Sync engine stopped");
    }

    pub async fn snapshot(&self) -> Result<SyncSnapshot> {
        self.manager.snapshot().await
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub const fn suppression(&self) -> &PushSuppression {
        &self.suppression
    }

    pub const fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    pub const fn auto_sync(&self) -> &Arc<AutoSync> {
        &self.auto_sync
    }

    pub const fn realtime(&self) -> &Arc<RealtimeSync> {
        &self.realtime
    }

    pub const fn manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    pub const fn processor(&self) -> &Arc<RetryProcessor> {
        &self.processor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FixedIdentity;
    use crate::connectivity::{ConnectionKind, NetworkStatus};
    use crate::models::{Cattle, EntityType, LocalRecord, SyncStatus, WriteOrigin};
    use crate::remote::{ChangeKind, RemoteChange};
    use crate::store::Change;
    use crate::test_support::InMemoryRemote;
    use serde_json::json;
    use std::time::Duration;

    async fn engine(remote: &Arc<InMemoryRemote>, connectivity: ConnectivityMonitor) -> SyncEngine {
        let store = LocalStore::open_in_memory().await.unwrap();
        let dyn_remote: Arc<dyn RemoteStore> = remote.clone();
        SyncEngine::new(
            store,
            dyn_remote,
            Arc::new(FixedIdentity::new("farm-1")),
            connectivity,
            SyncSettings::default(),
        )
        .await
        .unwrap()
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_engine_pushes_local_edits_and_applies_remote_changes() {
        let remote = Arc::new(InMemoryRemote::new());
        let engine = engine(
            &remote,
            ConnectivityMonitor::new(NetworkStatus::online(ConnectionKind::Wifi)),
        )
        .await;
        let report = engine.start().await.unwrap();
        assert!(report.is_complete());

        let cow = LocalRecord::from_model(&Cattle::new("farm-1", "A-1")).unwrap();
        engine
            .store()
            .commit(WriteOrigin::Local, vec![Change::Insert(cow.clone())])
            .await
            .unwrap();
        wait_until(|| remote.row("cattle", &cow.id).is_some()).await;

        remote.emit(RemoteChange {
            table: "cattle".to_string(),
            kind: ChangeKind::Insert,
            record: Some(json!({ "id": "cow-remote", "farm_id": "farm-1", "tag_number": "R-1" })),
            old_record: None,
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine
                .store()
                .get(EntityType::Cattle, "cow-remote")
                .await
                .unwrap()
                .is_none()
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Remote rows are never echoed back
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!remote.pushes().iter().any(|(_, id)| id == "cow-remote"));

        engine.shutdown().await;
        assert_eq!(remote.subscriber_count("cattle"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_edit_is_replayed_when_connectivity_returns() {
        let remote = Arc::new(InMemoryRemote::new());
        let connectivity = ConnectivityMonitor::new(NetworkStatus::offline());
        let engine = engine(&remote, connectivity.clone()).await;
        engine.start().await.unwrap();

        let cow = LocalRecord::from_model(&Cattle::new("farm-1", "A-1")).unwrap();
        engine
            .store()
            .commit(WriteOrigin::Local, vec![Change::Insert(cow.clone())])
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.queue().pending_count().await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        connectivity.set_reachable(true);
        wait_until(|| remote.row("cattle", &cow.id).is_some()).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.queue().pending_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            engine
                .store()
                .get(EntityType::Cattle, &cow.id)
                .await
                .unwrap()
                .unwrap()
                .sync_status,
            SyncStatus::Synced
        );

        engine.shutdown().await;
    }
}
