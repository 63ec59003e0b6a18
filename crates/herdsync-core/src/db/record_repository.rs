//! Replica row storage

use libsql::{params, Connection, Row, Value};
use serde_json::Map;

use crate::error::{Error, Result};
use crate::models::{EntityType, LocalRecord, Reference, SyncStatus};

/// Trait for replica row operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Get a row by entity kind and identifier
    async fn get(&self, entity: EntityType, id: &str) -> Result<Option<LocalRecord>>;

    /// List rows of one kind, optionally scoped to a farm
    async fn list(
        &self,
        entity: EntityType,
        farm_id: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<LocalRecord>>;

    /// Insert a new row; fails if it already exists
    async fn insert(&self, record: &LocalRecord) -> Result<()>;

    /// Overwrite an existing row's columns. Returns whether a row matched.
    async fn update(&self, record: &LocalRecord) -> Result<bool>;

    /// Set the soft-delete timestamp. Returns whether a live row matched.
    async fn soft_delete(&self, entity: EntityType, id: &str, deleted_at: i64) -> Result<bool>;

    /// Remove the row (and its links). Returns whether a row matched.
    async fn hard_delete(&self, entity: EntityType, id: &str) -> Result<bool>;

    /// Update the informational sync tag. Returns whether a row matched.
    async fn set_sync_status(&self, entity: EntityType, id: &str, status: SyncStatus)
        -> Result<bool>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Replace the outgoing references of a row.
    ///
    /// Each link is marked resolved if its target already exists locally.
    pub async fn replace_links(
        &self,
        entity: EntityType,
        id: &str,
        references: &[Reference],
    ) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM record_links WHERE entity_type = ? AND record_id = ?",
                params![entity.as_str(), id],
            )
            .await?;

        for reference in references {
            self.conn
                .execute(
                    "INSERT INTO record_links
                        (entity_type, record_id, field, target_type, target_id, resolved)
                     VALUES (?1, ?2, ?3, ?4, ?5,
                        EXISTS(SELECT 1 FROM records WHERE entity_type = ?4 AND id = ?5))",
                    params![
                        entity.as_str(),
                        id,
                        reference.field,
                        reference.target.as_str(),
                        reference.target_id.as_str()
                    ],
                )
                .await?;
        }
        Ok(())
    }

    /// Mark every link pointing at `(entity, id)` as resolved.
    pub async fn resolve_links_to(&self, entity: EntityType, id: &str) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "UPDATE record_links SET resolved = 1
                 WHERE target_type = ? AND target_id = ? AND resolved = 0",
                params![entity.as_str(), id],
            )
            .await?;
        Ok(changed)
    }

    /// Mark every link pointing at `(entity, id)` as unresolved.
    pub async fn unresolve_links_to(&self, entity: EntityType, id: &str) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "UPDATE record_links SET resolved = 0
                 WHERE target_type = ? AND target_id = ? AND resolved = 1",
                params![entity.as_str(), id],
            )
            .await?;
        Ok(changed)
    }

    /// Target identifier of a resolved reference, `None` if absent or unresolved.
    pub async fn resolved_reference(
        &self,
        entity: EntityType,
        id: &str,
        field: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT target_id FROM record_links
                 WHERE entity_type = ? AND record_id = ? AND field = ? AND resolved = 1",
                params![entity.as_str(), id, field],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    /// Count rows carrying `status`, across every entity kind.
    pub async fn count_by_status(&self, status: SyncStatus) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM records WHERE sync_status = ?",
                [status.as_str()],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, entity: EntityType, id: &str) -> Result<Option<LocalRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, id, farm_id, payload, sync_status, deleted_at, created_at, updated_at
                 FROM records WHERE entity_type = ? AND id = ?",
                params![entity.as_str(), id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        entity: EntityType,
        farm_id: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<LocalRecord>> {
        let farm = farm_id.map_or(Value::Null, |farm| Value::Text(farm.to_string()));
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, id, farm_id, payload, sync_status, deleted_at, created_at, updated_at
                 FROM records
                 WHERE entity_type = ?1
                   AND (?2 IS NULL OR farm_id = ?2)
                   AND (?3 = 1 OR deleted_at IS NULL)
                 ORDER BY created_at ASC, id ASC",
                params![entity.as_str(), farm, i64::from(include_deleted)],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn insert(&self, record: &LocalRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        self.conn
            .execute(
                "INSERT INTO records
                    (entity_type, id, farm_id, payload, sync_status, deleted_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.entity_type.as_str(),
                    record.id.as_str(),
                    record.farm_id.as_str(),
                    payload,
                    record.sync_status.as_str(),
                    optional_int(record.deleted_at),
                    record.created_at,
                    record.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn update(&self, record: &LocalRecord) -> Result<bool> {
        let payload = serde_json::to_string(&record.payload)?;
        let changed = self
            .conn
            .execute(
                "UPDATE records
                 SET farm_id = ?, payload = ?, sync_status = ?, deleted_at = ?, updated_at = ?
                 WHERE entity_type = ? AND id = ?",
                params![
                    record.farm_id.as_str(),
                    payload,
                    record.sync_status.as_str(),
                    optional_int(record.deleted_at),
                    record.updated_at,
                    record.entity_type.as_str(),
                    record.id.as_str()
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn soft_delete(&self, entity: EntityType, id: &str, deleted_at: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE records SET deleted_at = ?, updated_at = ?
                 WHERE entity_type = ? AND id = ? AND deleted_at IS NULL",
                params![deleted_at, deleted_at, entity.as_str(), id],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn hard_delete(&self, entity: EntityType, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM records WHERE entity_type = ? AND id = ?",
                params![entity.as_str(), id],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn set_sync_status(
        &self,
        entity: EntityType,
        id: &str,
        status: SyncStatus,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE records SET sync_status = ? WHERE entity_type = ? AND id = ?",
                params![status.as_str(), entity.as_str(), id],
            )
            .await?;
        Ok(changed > 0)
    }
}

fn optional_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn row_to_record(row: &Row) -> Result<LocalRecord> {
    let entity_name: String = row.get(0)?;
    let entity_type = entity_name
        .parse::<EntityType>()
        .map_err(Error::Database)?;
    let payload_text: String = row.get(3)?;
    let payload: Map<String, serde_json::Value> = serde_json::from_str(&payload_text)?;
    let sync_status: String = row.get(4)?;
    let deleted_at = match row.get_value(5)? {
        Value::Integer(at) => Some(at),
        _ => None,
    };

    Ok(LocalRecord {
        entity_type,
        id: row.get(1)?,
        farm_id: row.get(2)?,
        payload,
        sync_status: SyncStatus::from_stored(&sync_status),
        deleted_at,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
