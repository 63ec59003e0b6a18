//! Staged full synchronization
//!
//! A full sync pulls every table for the farm in dependency order. A failing
//! table is recorded and skipped; only losing the session aborts the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use super::apply::merge_records;
use super::guard::{PushSuppression, SingleFlight};
use super::retry_queue::RetryQueue;
use super::status::{StatusBoard, SyncSnapshot, SyncState};
use crate::auth::IdentityProvider;
use crate::error::{Error, RemoteErrorKind, Result};
use crate::models::{descriptor, EntityType, SyncStatus};
use crate::repository::RepositoryRegistry;
use crate::store::LocalStore;

/// Key-value slot holding the last completed full sync.
pub const LAST_FULL_SYNC_KEY: &str = "sync.last_full_sync";

/// One ordered phase of a full sync.
struct Stage {
    name: &'static str,
    entities: &'static [EntityType],
    /// Tables inside the stage have no mutual dependency
    concurrent: bool,
}

const STAGES: [Stage; 6] = [
    Stage {
        name: "reference_data",
        entities: &[
            EntityType::Breed,
            EntityType::TreatmentPlan,
            EntityType::Contact,
            EntityType::CattleStage,
            EntityType::ProductionPath,
            EntityType::HealthRecordType,
            EntityType::Medication,
            EntityType::Veterinarian,
            EntityType::Processor,
            EntityType::Buyer,
            EntityType::Pasture,
        ],
        concurrent: true,
    },
    Stage {
        name: "cattle",
        entities: &[EntityType::Cattle],
        concurrent: false,
    },
    Stage {
        name: "child_records",
        entities: &[
            EntityType::HealthRecord,
            EntityType::PregnancyRecord,
            EntityType::CalvingRecord,
            EntityType::SaleRecord,
            EntityType::ProcessingRecord,
            EntityType::MortalityRecord,
            EntityType::StageTransition,
        ],
        concurrent: false,
    },
    Stage {
        name: "photos",
        entities: &[EntityType::Photo],
        concurrent: false,
    },
    Stage {
        name: "tasks",
        entities: &[EntityType::Task],
        concurrent: false,
    },
    Stage {
        name: "pasture_logs",
        entities: &[EntityType::PastureLog],
        concurrent: false,
    },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullSyncOptions {
    /// Pull lookup tables even when they were pulled recently
    pub force_reference: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullSyncReport {
    pub farm_id: String,
    /// Rows changed locally, by table
    pub pulled: BTreeMap<String, usize>,
    /// Lookup tables skipped as fresh
    pub skipped: Vec<String>,
    /// Failure message by table
    pub stage_errors: BTreeMap<String, String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullSyncOutcome {
    AlreadyRunning,
    Completed(FullSyncReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushAllReport {
    pub pushed: usize,
    /// Failure message by `table/id`
    pub failures: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAllOutcome {
    AlreadyRunning,
    Completed(PushAllReport),
}

pub struct SyncManager {
    store: LocalStore,
    repositories: RepositoryRegistry,
    identity: Arc<dyn IdentityProvider>,
    queue: Arc<RetryQueue>,
    suppression: PushSuppression,
    status: StatusBoard,
    reference_ttl: Duration,
    full_sync: SingleFlight,
    push_all: SingleFlight,
}

impl SyncManager {
    pub fn new(
        store: LocalStore,
        repositories: RepositoryRegistry,
        identity: Arc<dyn IdentityProvider>,
        queue: Arc<RetryQueue>,
        suppression: PushSuppression,
        reference_ttl: Duration,
    ) -> Self {
        Self {
            store,
            repositories,
            identity,
            queue,
            suppression,
            status: StatusBoard::default(),
            reference_ttl,
            full_sync: SingleFlight::new(),
            push_all: SingleFlight::new(),
        }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Current snapshot with fresh queue counts.
    pub async fn snapshot(&self) -> Result<SyncSnapshot> {
        self.refresh_counts().await?;
        Ok(self.status.snapshot())
    }

    /// Pull every table for the current farm, in dependency order.
    pub async fn perform_full_sync(&self, options: FullSyncOptions) -> Result<FullSyncOutcome> {
        let Some(_flight) = self.full_sync.try_begin() else {
            tracing::info!("Full sync already running");
            return Ok(FullSyncOutcome::AlreadyRunning);
        };
        let _suppressed = self.suppression.suppress();
        self.status.update(|snapshot| {
            snapshot.state = SyncState::Syncing;
            snapshot.progress = 0.0;
            snapshot.last_error = None;
        });

        let result: Result<FullSyncReport> = async {
            let report = self.run_stages(options).await?;
            self.record_completion(&report).await?;
            Ok(report)
        }
        .await;
        match result {
            Ok(report) => {
                tracing::info!(
                    farm_id = %report.farm_id,
                    failed_tables = report.stage_errors.len(),
                    "Full sync finished"
                );
                Ok(FullSyncOutcome::Completed(report))
            }
            Err(error) => {
                tracing::error!("Full sync aborted: {error}");
                let message = error.to_string();
                self.status.update(|snapshot| {
                    snapshot.state = SyncState::Failed;
                    snapshot.last_error = Some(message);
                });
                Err(error)
            }
        }
    }

    async fn record_completion(&self, report: &FullSyncReport) -> Result<()> {
        self.store
            .kv_set_json(LAST_FULL_SYNC_KEY, &report.finished_at)
            .await?;
        self.status.update(|snapshot| {
            snapshot.state = SyncState::Success;
            snapshot.progress = 1.0;
            snapshot.last_full_sync = Some(report.finished_at);
            snapshot.last_error = report
                .stage_errors
                .iter()
                .next()
                .map(|(table, error)| format!("{table}: {error}"));
        });
        self.refresh_counts().await
    }

    async fn run_stages(&self, options: FullSyncOptions) -> Result<FullSyncReport> {
        let farm_id = self.identity.farm_id().await?;
        let total = STAGES.iter().map(|stage| stage.entities.len()).sum::<usize>();
        let mut done = 0usize;
        let mut report = FullSyncReport {
            farm_id: farm_id.clone(),
            pulled: BTreeMap::new(),
            skipped: Vec::new(),
            stage_errors: BTreeMap::new(),
            finished_at: Utc::now(),
        };

        for stage in &STAGES {
            tracing::info!(stage = stage.name, "Full sync stage started");
            let results = if stage.concurrent {
                join_all(
                    stage
                        .entities
                        .iter()
                        .map(|entity| self.pull_table(*entity, &farm_id, options)),
                )
                .await
            } else {
                let mut results = Vec::with_capacity(stage.entities.len());
                for entity in stage.entities {
                    let result = self.pull_table(*entity, &farm_id, options).await;
                    let fatal = matches!(&result, Err(error) if error.is_auth());
                    results.push(result);
                    if fatal {
                        break;
                    }
                }
                results
            };

            for (entity, result) in stage.entities.iter().zip(results) {
                let table = descriptor(*entity).table.to_string();
                match result {
                    Ok(TablePull::Pulled(count)) => {
                        report.pulled.insert(table, count);
                    }
                    Ok(TablePull::Fresh) => report.skipped.push(table),
                    Err(error) if error.is_auth() => return Err(error),
                    Err(error) => {
                        tracing::warn!(
                            stage = stage.name,
                            table = %table,
                            "Full sync table failed: {error}"
                        );
                        report.stage_errors.insert(table, error.to_string());
                    }
                }
                done += 1;
                self.status.advance(progress(done, total));
            }
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    async fn pull_table(
        &self,
        entity: EntityType,
        farm_id: &str,
        options: FullSyncOptions,
    ) -> Result<TablePull> {
        let descriptor = descriptor(entity);
        let freshness_key = format!("sync.reference.{}", descriptor.table);
        if descriptor.reference_data && !options.force_reference {
            let last: Option<DateTime<Utc>> = self.store.kv_get_json(&freshness_key).await?;
            if last.is_some_and(|at| is_fresh(at, self.reference_ttl)) {
                tracing::debug!(table = descriptor.table, "Lookup table is fresh; skipping");
                return Ok(TablePull::Fresh);
            }
        }

        let records = self.repositories.get(entity).fetch_all(farm_id).await?;
        let fetched = records.len();
        let changed = merge_records(&self.store, records).await?;
        if descriptor.reference_data {
            self.store.kv_set_json(&freshness_key, &Utc::now()).await?;
        }
        tracing::debug!(table = descriptor.table, fetched, changed, "Pulled table");
        Ok(TablePull::Pulled(changed))
    }

    /// Pull one table outside of a full sync.
    pub async fn pull_entity(&self, entity: EntityType) -> Result<usize> {
        let _suppressed = self.suppression.suppress();
        let farm_id = self.identity.farm_id().await?;
        let records = self.repositories.get(entity).fetch_all(&farm_id).await?;
        let changed = merge_records(&self.store, records).await?;
        tracing::info!(entity = %entity, changed, "Pulled entity");
        Ok(changed)
    }

    /// Upsert every local row of the farm, parents first, one row at a time.
    pub async fn push_all_pending_records(&self) -> Result<PushAllOutcome> {
        let Some(_flight) = self.push_all.try_begin() else {
            return Ok(PushAllOutcome::AlreadyRunning);
        };
        let farm_id = self.identity.farm_id().await?;

        let mut order = EntityType::ALL;
        order.sort_by_key(|entity| descriptor(*entity).push_priority);

        let mut report = PushAllReport::default();
        for entity in order {
            let repository = self.repositories.get(entity);
            for record in self.store.list_all(entity, Some(&farm_id)).await? {
                match repository.upsert(&record).await {
                    Ok(()) => {
                        report.pushed += 1;
                        self.store
                            .set_sync_status(entity, &record.id, SyncStatus::Synced)
                            .await?;
                    }
                    Err(error) if error.kind == RemoteErrorKind::Unauthorized => {
                        return Err(Error::Remote(error));
                    }
                    Err(error) => {
                        tracing::warn!(
                            entity = %entity,
                            id = %record.id,
                            "Push-all row failed: {error}"
                        );
                        report.failures.insert(
                            format!("{}/{}", descriptor(entity).table, record.id),
                            error.to_string(),
                        );
                    }
                }
            }
        }

        tracing::info!(
            pushed = report.pushed,
            failed = report.failures.len(),
            "Push-all finished"
        );
        Ok(PushAllOutcome::Completed(report))
    }

    async fn refresh_counts(&self) -> Result<()> {
        let pending = self.queue.pending_count().await;
        let failed = self.queue.failed_count().await;
        let last_full_sync: Option<DateTime<Utc>> =
            self.store.kv_get_json(LAST_FULL_SYNC_KEY).await?;
        self.status.update(|snapshot| {
            snapshot.pending_ops = pending;
            snapshot.failed_ops = failed;
            if snapshot.last_full_sync.is_none() {
                snapshot.last_full_sync = last_full_sync;
            }
        });
        Ok(())
    }
}

enum TablePull {
    Pulled(usize),
    Fresh,
}

fn is_fresh(pulled_at: DateTime<Utc>, ttl: Duration) -> bool {
    chrono::Duration::from_std(ttl).is_ok_and(|ttl| Utc::now() - pulled_at < ttl)
}

#[allow(clippy::cast_precision_loss)]
fn progress(done: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FixedIdentity;
    use crate::error::RemoteError;
    use crate::models::{BackoffPolicy, Cattle, LocalRecord, WriteOrigin};
    use crate::remote::RemoteStore;
    use crate::store::Change;
    use crate::test_support::{InMemoryRemote, RemoteOp};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn manager(remote: &Arc<InMemoryRemote>, identity: FixedIdentity) -> (LocalStore, SyncManager) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let dyn_remote: Arc<dyn RemoteStore> = remote.clone();
        let queue = Arc::new(
            RetryQueue::load(store.clone(), BackoffPolicy::default())
                .await
                .unwrap(),
        );
        let manager = SyncManager::new(
            store.clone(),
            RepositoryRegistry::new(&dyn_remote),
            Arc::new(identity),
            queue,
            PushSuppression::new(),
            Duration::from_secs(3600),
        );
        (store, manager)
    }

    fn seed_farm(remote: &InMemoryRemote) {
        remote.seed("breeds", json!({ "id": "angus", "farm_id": "farm-1", "name": "Angus" }));
        remote.seed(
            "cattle",
            json!({ "id": "cow-1", "farm_id": "farm-1", "tag_number": "A-1", "breed_id": "angus" }),
        );
        remote.seed(
            "health_records",
            json!({ "id": "hr-1", "farm_id": "farm-1", "cattle_id": "cow-1", "date": "2024-04-02" }),
        );
        remote.seed(
            "pregnancy_records",
            json!({ "id": "pr-1", "farm_id": "farm-1", "cattle_id": "cow-1" }),
        );
        remote.seed(
            "tasks",
            json!({ "id": "task-1", "farm_id": "farm-1", "title": "Check fences" }),
        );
        remote.seed(
            "cattle",
            json!({ "id": "cow-x", "farm_id": "farm-2", "tag_number": "X-1" }),
        );
    }

    fn completed(outcome: FullSyncOutcome) -> FullSyncReport {
        match outcome {
            FullSyncOutcome::Completed(report) => report,
            FullSyncOutcome::AlreadyRunning => panic!("full sync did not run"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_sync_pulls_every_stage_for_the_farm() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_farm(&remote);
        let (store, manager) = manager(&remote, FixedIdentity::new("farm-1")).await;

        let report = completed(manager.perform_full_sync(FullSyncOptions::default()).await.unwrap());
        assert!(report.stage_errors.is_empty());
        assert_eq!(report.pulled["cattle"], 1);
        assert_eq!(report.pulled["tasks"], 1);
        assert!(store.get(EntityType::Cattle, "cow-x").await.unwrap().is_none());
        assert_eq!(
            store
                .resolved_reference(EntityType::Cattle, "cow-1", "breed_id")
                .await
                .unwrap()
                .as_deref(),
            Some("angus")
        );

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SyncState::Success);
        assert!((snapshot.progress - 1.0).abs() < f64::EPSILON);
        assert!(snapshot.last_full_sync.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_stage_is_isolated() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_farm(&remote);
        remote.fail("health_records", RemoteOp::Select, RemoteError::transient("502 Bad Gateway"));
        let (store, manager) = manager(&remote, FixedIdentity::new("farm-1")).await;

        let report = completed(manager.perform_full_sync(FullSyncOptions::default()).await.unwrap());
        assert_eq!(
            report.stage_errors.keys().cloned().collect::<Vec<_>>(),
            vec!["health_records".to_string()]
        );
        assert!(store.get(EntityType::PregnancyRecord, "pr-1").await.unwrap().is_some());
        assert!(store.get(EntityType::Task, "task-1").await.unwrap().is_some());
        assert!(store.get(EntityType::HealthRecord, "hr-1").await.unwrap().is_none());

        let snapshot = manager.status().snapshot();
        assert_eq!(snapshot.state, SyncState::Success);
        assert!(store.kv_get(LAST_FULL_SYNC_KEY).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unrecordable_completion_leaves_status_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herd.db");
        let store = LocalStore::open_path(&path).await.unwrap();
        let remote = Arc::new(InMemoryRemote::new());
        seed_farm(&remote);
        let dyn_remote: Arc<dyn RemoteStore> = remote.clone();
        let queue = Arc::new(
            RetryQueue::load(store.clone(), BackoffPolicy::default())
                .await
                .unwrap(),
        );
        let manager = SyncManager::new(
            store.clone(),
            RepositoryRegistry::new(&dyn_remote),
            Arc::new(FixedIdentity::new("farm-1")),
            queue,
            PushSuppression::new(),
            Duration::from_secs(3600),
        );

        let other = crate::db::Database::open(&path).await.unwrap();
        other
            .connection()
            .execute("DROP TABLE kv_store", ())
            .await
            .unwrap();

        assert!(manager
            .perform_full_sync(FullSyncOptions::default())
            .await
            .is_err());
        let snapshot = manager.status().snapshot();
        assert_eq!(snapshot.state, SyncState::Failed);
        assert!(snapshot.last_error.is_some());
        assert!(!manager.suppression.is_active());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signed_out_full_sync_fails_and_restores_suppression() {
        let remote = Arc::new(InMemoryRemote::new());
        let (_store, manager) = manager(&remote, FixedIdentity::signed_out()).await;

        let error = manager
            .perform_full_sync(FullSyncOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_auth());
        assert!(!manager.suppression.is_active());
        assert_eq!(manager.status().snapshot().state, SyncState::Failed);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_expired_session_mid_sync_aborts() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_farm(&remote);
        remote.fail("cattle", RemoteOp::Select, RemoteError::unauthorized("JWT expired"));
        let (store, manager) = manager(&remote, FixedIdentity::new("farm-1")).await;

        assert!(manager
            .perform_full_sync(FullSyncOptions::default())
            .await
            .unwrap_err()
            .is_auth());
        assert!(store.get(EntityType::Task, "task-1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fresh_lookup_tables_are_skipped_unless_forced() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_farm(&remote);
        let (_store, manager) = manager(&remote, FixedIdentity::new("farm-1")).await;

        completed(manager.perform_full_sync(FullSyncOptions::default()).await.unwrap());
        let second = completed(manager.perform_full_sync(FullSyncOptions::default()).await.unwrap());
        assert!(second.skipped.contains(&"breeds".to_string()));
        assert!(!second.skipped.contains(&"contacts".to_string()));

        let forced = completed(
            manager
                .perform_full_sync(FullSyncOptions {
                    force_reference: true,
                })
                .await
                .unwrap(),
        );
        assert!(forced.skipped.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_full_sync_is_refused() {
        let remote = Arc::new(InMemoryRemote::new());
        let (_store, manager) = manager(&remote, FixedIdentity::new("farm-1")).await;
        let _running = manager.full_sync.try_begin();

        assert_eq!(
            manager.perform_full_sync(FullSyncOptions::default()).await.unwrap(),
            FullSyncOutcome::AlreadyRunning
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_all_isolates_failing_rows() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, manager) = manager(&remote, FixedIdentity::new("farm-1")).await;
        let cow = Cattle::new("farm-1", "A-1");
        let orphan = crate::models::HealthRecord::new(
            "farm-1",
            "missing-cow",
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        store
            .commit(
                WriteOrigin::Local,
                vec![
                    Change::Insert(LocalRecord::from_model(&orphan).unwrap()),
                    Change::Insert(LocalRecord::from_model(&cow).unwrap()),
                ],
            )
            .await
            .unwrap();

        let PushAllOutcome::Completed(report) = manager.push_all_pending_records().await.unwrap() else {
            panic!("push-all did not run");
        };
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(remote.row("cattle", &cow.id).is_some());
        assert_eq!(
            store.get(EntityType::Cattle, &cow.id).await.unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
        assert_eq!(remote.pushes()[0].0, "cattle");
    }
}
