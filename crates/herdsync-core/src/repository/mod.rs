//! Per-entity translation between replica rows and remote rows

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{RemoteError, RemoteErrorKind};
use crate::models::{descriptor, EntityDescriptor, EntityType, LocalRecord, RemoteRecord};
use crate::remote::{Query, RemoteResult, RemoteStore};
use crate::util::millis_to_datetime;

/// Remote CRUD for one entity kind.
#[derive(Clone)]
pub struct EntityRepository {
    entity: EntityType,
    remote: Arc<dyn RemoteStore>,
}

impl EntityRepository {
    pub fn new(entity: EntityType, remote: Arc<dyn RemoteStore>) -> Self {
        Self { entity, remote }
    }

    pub const fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        descriptor(self.entity)
    }

    /// Wire shape of a replica row.
    pub fn to_wire(&self, record: &LocalRecord) -> Value {
        record.wire_value(self.descriptor().soft_delete)
    }

    /// Validate a remote row against the typed model.
    pub fn decode(&self, value: Value) -> RemoteResult<RemoteRecord> {
        self.descriptor().decode(value).map_err(RemoteError::decode)
    }

    pub async fn create(&self, record: &LocalRecord) -> RemoteResult<()> {
        self.check_kind(record)?;
        self.remote
            .insert(self.descriptor().table, self.to_wire(record))
            .await
            .map(|_| ())
    }

    pub async fn update(&self, record: &LocalRecord) -> RemoteResult<()> {
        self.check_kind(record)?;
        self.remote
            .update(self.descriptor().table, &record.id, self.to_wire(record))
            .await
            .map(|_| ())
    }

    pub async fn upsert(&self, record: &LocalRecord) -> RemoteResult<()> {
        self.check_kind(record)?;
        self.remote
            .upsert(self.descriptor().table, self.to_wire(record))
            .await
            .map(|_| ())
    }

    /// Mirror a local delete: stamp `deleted_at` on soft-delete tables,
    /// remove the row otherwise. A row already gone remotely counts as deleted.
    pub async fn delete(&self, id: &str, deleted_at: Option<i64>) -> RemoteResult<()> {
        let table = self.descriptor().table;
        if !self.descriptor().soft_delete {
            return self.remote.delete(table, id).await;
        }

        let stamp = deleted_at
            .and_then(millis_to_datetime)
            .unwrap_or_else(chrono::Utc::now);
        match self
            .remote
            .update(table, id, json!({ "deleted_at": stamp.to_rfc3339() }))
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.kind == RemoteErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Every row of the farm, soft-deleted included. Malformed rows are skipped.
    pub async fn fetch_all(&self, farm_id: &str) -> RemoteResult<Vec<RemoteRecord>> {
        let query = Query::new()
            .eq("farm_id", farm_id)
            .order_by("created_at", true);
        let rows = self.remote.select(self.descriptor().table, &query).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match self.decode(row) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(entity = %self.entity, "Skipping malformed remote row: {error}");
                }
            }
        }
        Ok(records)
    }

    pub async fn fetch_by_id(&self, id: &str) -> RemoteResult<Option<RemoteRecord>> {
        let query = Query::new().eq("id", id).limit(1);
        let rows = self.remote.select(self.descriptor().table, &query).await?;
        rows.into_iter().next().map(|row| self.decode(row)).transpose()
    }

    fn check_kind(&self, record: &LocalRecord) -> RemoteResult<()> {
        if record.entity_type == self.entity {
            Ok(())
        } else {
            Err(RemoteError::new(
                RemoteErrorKind::Rejected,
                format!(
                    "{} repository cannot push a {} row",
                    self.entity, record.entity_type
                ),
            ))
        }
    }
}

/// One repository per entity kind, looked up by tag.
#[derive(Clone)]
pub struct RepositoryRegistry {
    repositories: Vec<EntityRepository>,
}

impl RepositoryRegistry {
    pub fn new(remote: &Arc<dyn RemoteStore>) -> Self {
        Self {
            repositories: EntityType::ALL
                .into_iter()
                .map(|entity| EntityRepository::new(entity, Arc::clone(remote)))
                .collect(),
        }
    }

    pub fn get(&self, entity: EntityType) -> &EntityRepository {
        &self.repositories[entity.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cattle, CattleStage, SyncRecord};
    use crate::test_support::InMemoryRemote;

    fn registry(remote: &Arc<InMemoryRemote>) -> RepositoryRegistry {
        let remote: Arc<dyn RemoteStore> = remote.clone();
        RepositoryRegistry::new(&remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_then_fetch_by_id() {
        let remote = Arc::new(InMemoryRemote::new());
        let repos = registry(&remote);
        let cattle = Cattle::new("farm-1", "A-1");
        let record = LocalRecord::from_model(&cattle).unwrap();

        repos.get(EntityType::Cattle).create(&record).await.unwrap();
        let fetched = repos
            .get(EntityType::Cattle)
            .fetch_by_id(cattle.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, cattle.id);
        assert_eq!(fetched.payload["tag_number"], "A-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_soft_delete_stamps_deleted_at() {
        let remote = Arc::new(InMemoryRemote::new());
        let repos = registry(&remote);
        let record = LocalRecord::from_model(&Cattle::new("farm-1", "A-1")).unwrap();
        let repo = repos.get(EntityType::Cattle);
        repo.create(&record).await.unwrap();

        repo.delete(&record.id, Some(1_700_000_000_000)).await.unwrap();
        let row = remote.row("cattle", &record.id).unwrap();
        assert!(row["deleted_at"].as_str().unwrap().starts_with("2023-11-14"));

        // Absent remotely is fine
        repo.delete("ghost", None).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hard_delete_removes_row() {
        let remote = Arc::new(InMemoryRemote::new());
        let repos = registry(&remote);
        let stage = LocalRecord::from_model(&CattleStage {
            id: "stage-1".to_string(),
            farm_id: "farm-1".to_string(),
            name: "weaner".to_string(),
            sort_order: Some(2),
        })
        .unwrap();
        let repo = repos.get(EntityType::CattleStage);
        repo.create(&stage).await.unwrap();
        assert!(remote.row("cattle_stages", "stage-1").unwrap().get("deleted_at").is_none());

        repo.delete("stage-1", None).await.unwrap();
        assert!(remote.row("cattle_stages", "stage-1").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_all_skips_malformed_rows() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.seed(
            "cattle",
            serde_json::json!({ "id": "ok", "farm_id": "farm-1", "tag_number": "A" }),
        );
        remote.seed("cattle", serde_json::json!({ "id": "bad", "farm_id": "farm-1" }));
        remote.seed(
            "cattle",
            serde_json::json!({ "id": "other", "farm_id": "farm-2", "tag_number": "B" }),
        );

        let rows = registry(&remote)
            .get(EntityType::Cattle)
            .fetch_all("farm-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "ok");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wrong_kind_is_rejected() {
        let remote = Arc::new(InMemoryRemote::new());
        let record = LocalRecord::from_model(&Cattle::new("farm-1", "A-1")).unwrap();
        let error = registry(&remote)
            .get(EntityType::Breed)
            .create(&record)
            .await
            .unwrap_err();
        assert_eq!(error.kind, RemoteErrorKind::Rejected);
    }
}
