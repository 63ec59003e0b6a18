//! Lookup tables and farm contacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityType;
use super::new_record_id;
use super::record::{Reference, SyncRecord};

/// Implements [`SyncRecord`] for a model with `id`, `farm_id` and,
/// optionally, a `deleted_at` column and no outgoing references.
macro_rules! leaf_record {
    ($model:ty, $entity:expr) => {
        impl SyncRecord for $model {
            const ENTITY: EntityType = $entity;

            fn id(&self) -> &str {
                &self.id
            }

            fn farm_id(&self) -> &str {
                &self.farm_id
            }
        }
    };
    ($model:ty, $entity:expr, soft_delete) => {
        impl SyncRecord for $model {
            const ENTITY: EntityType = $entity;

            fn id(&self) -> &str {
                &self.id
            }

            fn farm_id(&self) -> &str {
                &self.farm_id
            }

            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breed {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Breed {
    #[must_use]
    pub fn new(farm_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            farm_id: farm_id.into(),
            name: name.into(),
            description: None,
            deleted_at: None,
        }
    }
}

leaf_record!(Breed, EntityType::Breed, soft_delete);

/// Reusable protocol of treatments (e.g. a vaccination schedule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub interval_days: Option<i64>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

leaf_record!(TreatmentPlan, EntityType::TreatmentPlan, soft_delete);

/// A person or business the farm deals with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub contact_type: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

leaf_record!(Contact, EntityType::Contact, soft_delete);

/// Life stage (calf, weaner, heifer, cow, ...). Hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CattleStage {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

leaf_record!(CattleStage, EntityType::CattleStage);

/// Production path (breeding, beef, dairy). Hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionPath {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

leaf_record!(ProductionPath, EntityType::ProductionPath);

/// Category of health record (vaccination, treatment, exam). Hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecordType {
    pub id: String,
    pub farm_id: String,
    pub name: String,
}

leaf_record!(HealthRecordType, EntityType::HealthRecordType);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub withdrawal_days: Option<i64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

leaf_record!(Medication, EntityType::Medication, soft_delete);

/// Veterinarian, optionally backed by a contact entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Veterinarian {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub clinic: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Slaughterhouse or meat processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buyer {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Implements [`SyncRecord`] for the contact-backed business partners.
macro_rules! contact_backed_record {
    ($model:ty, $entity:expr) => {
        impl SyncRecord for $model {
            const ENTITY: EntityType = $entity;

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
                Reference::optional("contact_id", EntityType::Contact, self.contact_id.as_ref())
                    .into_iter()
                    .collect()
            }
        }
    };
}

contact_backed_record!(Veterinarian, EntityType::Veterinarian);
contact_backed_record!(Processor, EntityType::Processor);
contact_backed_record!(Buyer, EntityType::Buyer);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pasture {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    #[serde(default)]
    pub acreage: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

leaf_record!(Pasture, EntityType::Pasture, soft_delete);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hard_delete_lookups_report_no_deletion() {
        let stage: CattleStage =
            serde_json::from_value(json!({ "id": "s-1", "farm_id": "f", "name": "calf" }))
                .unwrap();
        assert!(stage.deleted_at().is_none());
        assert_eq!(CattleStage::ENTITY, EntityType::CattleStage);
    }

    #[test]
    fn buyer_references_optional_contact() {
        let mut buyer: Buyer =
            serde_json::from_value(json!({ "id": "b-1", "farm_id": "f", "name": "Sale barn" }))
                .unwrap();
        assert!(buyer.references().is_empty());

        buyer.contact_id = Some("c-1".to_string());
        let references = buyer.references();
        assert_eq!(references[0].target, EntityType::Contact);
        assert_eq!(references[0].target_id, "c-1");
    }
}
