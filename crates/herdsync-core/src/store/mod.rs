//! Local replica store
//!
//! Every write to the replica goes through [`LocalStore::commit`], which runs
//! one transaction under the store's lock and then broadcasts a
//! [`CommitEvent`] tagged with the write's [`WriteOrigin`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::db::{
    Database, KvRepository, LibSqlKvRepository, LibSqlRecordRepository, RecordRepository,
};
use crate::error::{Error, Result};
use crate::models::{descriptor, EntityType, LocalRecord, Reference, SyncStatus, WriteOrigin};
use crate::util::now_millis;

/// Default capacity of the commit broadcast channel.
pub const DEFAULT_COMMIT_CAPACITY: usize = 256;

/// One row-level mutation inside a commit.
#[derive(Debug, Clone)]
pub enum Change {
    /// Create a row; the commit fails if it already exists
    Insert(LocalRecord),
    /// Create a row unless one with the same identifier exists
    InsertIfAbsent(LocalRecord),
    /// Create the row, or overwrite it if it exists
    Upsert(LocalRecord),
    /// Overwrite an existing row; the commit fails if it is missing
    Update(LocalRecord),
    /// Soft-delete (or hard-delete for kinds without `deleted_at`); no-op if absent
    Delete { entity: EntityType, id: String },
    /// Remove the row regardless of kind; no-op if absent
    Purge { entity: EntityType, id: String },
}

/// Rows touched by one committed transaction.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub origin: WriteOrigin,
    pub inserted: Vec<LocalRecord>,
    pub updated: Vec<LocalRecord>,
    /// Row snapshots as they were when deleted
    pub deleted: Vec<LocalRecord>,
}

impl CommitEvent {
    const fn new(origin: WriteOrigin) -> Self {
        Self {
            origin,
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Thread-safe handle to the local replica.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    commits: broadcast::Sender<CommitEvent>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the replica at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path).await?;
        let mut store = Self::from_database(db, DEFAULT_COMMIT_CAPACITY);
        store.db_path = Some(db_path);
        Ok(store)
    }

    /// Open an in-memory replica (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, DEFAULT_COMMIT_CAPACITY))
    }

    pub fn from_database(db: Database, commit_capacity: usize) -> Self {
        let (commits, _) = broadcast::channel(commit_capacity.max(1));
        Self {
            db: Arc::new(Mutex::new(db)),
            commits,
            db_path: None,
        }
    }

    pub fn db_path(&self) -> Option<&std::path::Path> {
        self.db_path.as_deref()
    }

    /// Receive every commit made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitEvent> {
        self.commits.subscribe()
    }

    /// Apply `changes` atomically and notify subscribers.
    ///
    /// Returns the event that was broadcast. Empty commits are not broadcast.
    pub async fn commit(&self, origin: WriteOrigin, changes: Vec<Change>) -> Result<CommitEvent> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute("BEGIN IMMEDIATE", ()).await?;

        let outcome = apply_changes(conn, origin, changes).await;
        let event = match outcome {
            Ok(event) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                event
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        };
        drop(db);

        if !event.is_empty() {
            tracing::debug!(
                origin = ?event.origin,
                inserted = event.inserted.len(),
                updated = event.updated.len(),
                deleted = event.deleted.len(),
                "Committed replica changes"
            );
            // No receivers is fine
            let _ = self.commits.send(event.clone());
        }
        Ok(event)
    }

    pub async fn get(&self, entity: EntityType, id: &str) -> Result<Option<LocalRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection()).get(entity, id).await
    }

    /// Live rows of one kind, optionally scoped to a farm.
    pub async fn list_active(
        &self,
        entity: EntityType,
        farm_id: Option<&str>,
    ) -> Result<Vec<LocalRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(entity, farm_id, false)
            .await
    }

    /// Every row of one kind, soft-deleted included.
    pub async fn list_all(
        &self,
        entity: EntityType,
        farm_id: Option<&str>,
    ) -> Result<Vec<LocalRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(entity, farm_id, true)
            .await
    }

    /// Update the informational sync tag without emitting a commit event.
    pub async fn set_sync_status(
        &self,
        entity: EntityType,
        id: &str,
        status: SyncStatus,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .set_sync_status(entity, id, status)
            .await
    }

    pub async fn count_by_status(&self, status: SyncStatus) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .count_by_status(status)
            .await
    }

    /// Target of `field` on `(entity, id)` if that reference is resolved locally.
    pub async fn resolved_reference(
        &self,
        entity: EntityType,
        id: &str,
        field: &str,
    ) -> Result<Option<String>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .resolved_reference(entity, id, field)
            .await
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        LibSqlKvRepository::new(db.connection()).get(key).await
    }

    pub async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKvRepository::new(db.connection()).set(key, value).await
    }

    pub async fn kv_remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKvRepository::new(db.connection()).remove(key).await
    }

    /// Load a JSON-encoded value stored under `key`.
    pub async fn kv_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv_get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store `value` JSON-encoded under `key`.
    pub async fn kv_set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv_set(key, &raw).await
    }
}

async fn apply_changes(
    conn: &libsql::Connection,
    origin: WriteOrigin,
    changes: Vec<Change>,
) -> Result<CommitEvent> {
    let repo = LibSqlRecordRepository::new(conn);
    let mut event = CommitEvent::new(origin);

    for change in changes {
        match change {
            Change::Insert(record) => {
                let references = validate(&record)?;
                if repo.get(record.entity_type, &record.id).await?.is_some() {
                    return Err(Error::InvalidInput(format!(
                        "{} {} already exists",
                        record.entity_type, record.id
                    )));
                }
                insert_row(&repo, &record, &references).await?;
                event.inserted.push(record);
            }
            Change::InsertIfAbsent(record) => {
                let references = validate(&record)?;
                if repo.get(record.entity_type, &record.id).await?.is_none() {
                    insert_row(&repo, &record, &references).await?;
                    event.inserted.push(record);
                }
            }
            Change::Upsert(record) => {
                let references = validate(&record)?;
                match repo.get(record.entity_type, &record.id).await? {
                    Some(existing) => {
                        let record = overwrite_row(&repo, existing, record, &references).await?;
                        event.updated.push(record);
                    }
                    None => {
                        insert_row(&repo, &record, &references).await?;
                        event.inserted.push(record);
                    }
                }
            }
            Change::Update(record) => {
                let references = validate(&record)?;
                let Some(existing) = repo.get(record.entity_type, &record.id).await? else {
                    return Err(Error::NotFound(format!("{} {}", record.entity_type, record.id)));
                };
                let record = overwrite_row(&repo, existing, record, &references).await?;
                event.updated.push(record);
            }
            Change::Delete { entity, id } => {
                let Some(mut existing) = repo.get(entity, &id).await? else {
                    continue;
                };
                if descriptor(entity).soft_delete {
                    if existing.is_deleted() {
                        continue;
                    }
                    let now = now_millis();
                    repo.soft_delete(entity, &id, now).await?;
                    existing.deleted_at = Some(now);
                    existing.updated_at = now;
                } else {
                    repo.hard_delete(entity, &id).await?;
                    repo.unresolve_links_to(entity, &id).await?;
                }
                event.deleted.push(existing);
            }
            Change::Purge { entity, id } => {
                let Some(existing) = repo.get(entity, &id).await? else {
                    continue;
                };
                repo.hard_delete(entity, &id).await?;
                repo.unresolve_links_to(entity, &id).await?;
                event.deleted.push(existing);
            }
        }
    }
    Ok(event)
}

/// Check a row against its typed model and derive its references.
fn validate(record: &LocalRecord) -> Result<Vec<Reference>> {
    let decoded = descriptor(record.entity_type)
        .decode(record.wire_value(true))
        .map_err(Error::InvalidInput)?;
    if decoded.id != record.id {
        return Err(Error::InvalidInput(format!(
            "{} payload id {} does not match row id {}",
            record.entity_type, decoded.id, record.id
        )));
    }
    Ok(decoded.references)
}

async fn insert_row(
    repo: &LibSqlRecordRepository<'_>,
    record: &LocalRecord,
    references: &[Reference],
) -> Result<()> {
    repo.insert(record).await?;
    repo.replace_links(record.entity_type, &record.id, references)
        .await?;
    repo.resolve_links_to(record.entity_type, &record.id).await?;
    Ok(())
}

async fn overwrite_row(
    repo: &LibSqlRecordRepository<'_>,
    existing: LocalRecord,
    mut record: LocalRecord,
    references: &[Reference],
) -> Result<LocalRecord> {
    record.created_at = existing.created_at;
    record.updated_at = now_millis().max(existing.updated_at);
    repo.update(&record).await?;
    repo.replace_links(record.entity_type, &record.id, references)
        .await?;
    Ok(record)
}
