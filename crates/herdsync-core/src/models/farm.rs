//! Farm-level records: photos, tasks, and pasture logs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityType;
use super::new_record_id;
use super::record::{Reference, SyncRecord};

/// Photo metadata. The image bytes live in object storage under `storage_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub farm_id: String,
    #[serde(default)]
    pub cattle_id: Option<String>,
    #[serde(default)]
    pub health_record_id: Option<String>,
    pub storage_path: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRecord for Photo {
    const ENTITY: EntityType = EntityType::Photo;

    fn id(&self) -> &str {
        &self.id
    }

    fn farm_id(&self) -> &str {
        &self.farm_id
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn references(&self) -> Vec<Reference> {
        [
            Reference::optional("cattle_id", EntityType::Cattle, self.cattle_id.as_ref()),
            Reference::optional(
                "health_record_id",
                EntityType::HealthRecord,
                self.health_record_id.as_ref(),
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A to-do item, optionally tied to an animal or pasture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmTask {
    pub id: String,
    pub farm_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub cattle_id: Option<String>,
    #[serde(default)]
    pub pasture_id: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FarmTask {
    #[must_use]
    pub fn new(farm_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            farm_id: farm_id.into(),
            title: title.into(),
            description: None,
            due_date: None,
            completed: false,
            priority: None,
            cattle_id: None,
            pasture_id: None,
            assigned_to: None,
            deleted_at: None,
        }
    }
}

impl SyncRecord for FarmTask {
    const ENTITY: EntityType = EntityType::Task;

    fn id(&self) -> &str {
        &self.id
    }

    fn farm_id(&self) -> &str {
        &self.farm_id
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn references(&self) -> Vec<Reference> {
        [
            Reference::optional("cattle_id", EntityType::Cattle, self.cattle_id.as_ref()),
            Reference::optional("pasture_id", EntityType::Pasture, self.pasture_id.as_ref()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Grazing, rest, or maintenance entry for a pasture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastureLog {
    pub id: String,
    pub farm_id: String,
    pub pasture_id: String,
    pub log_date: NaiveDate,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub head_count: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRecord for PastureLog {
    const ENTITY: EntityType = EntityType::PastureLog;

    fn id(&self) -> &str {
        &self.id
    }

    fn farm_id(&self) -> &str {
        &self.farm_id
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn references(&self) -> Vec<Reference> {
        Reference::required("pasture_id", EntityType::Pasture, &self.pasture_id)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_defaults_to_incomplete() {
        let payload = json!({ "id": "t-1", "farm_id": "farm-1", "title": "Fix fence" });
        let task: FarmTask = serde_json::from_value(payload).unwrap();
        assert!(!task.completed);
        assert!(task.references().is_empty());
    }

    #[test]
    fn pasture_log_references_its_pasture() {
        let payload = json!({
            "id": "pl-1",
            "farm_id": "farm-1",
            "pasture_id": "north",
            "log_date": "2024-05-10"
        });
        let log: PastureLog = serde_json::from_value(payload).unwrap();
        let references = log.references();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].target, EntityType::Pasture);
    }
}
