//! Cattle and the per-animal child records

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityType;
use super::new_record_id;
use super::record::{Reference, SyncRecord};

/// An animal in the herd.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cattle {
    pub id: String,
    pub farm_id: String,
    /// Ear tag or other visible identifier
    pub tag_number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub breed_id: Option<String>,
    /// Mother
    #[serde(default)]
    pub dam_id: Option<String>,
    /// Father
    #[serde(default)]
    pub sire_id: Option<String>,
    #[serde(default)]
    pub pasture_id: Option<String>,
    #[serde(default)]
    pub stage_id: Option<String>,
    #[serde(default)]
    pub production_path_id: Option<String>,
    /// Herd status (active, sold, processed, deceased)
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub weight_lbs: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Cattle {
    #[must_use]
    pub fn new(farm_id: impl Into<String>, tag_number: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            farm_id: farm_id.into(),
            tag_number: tag_number.into(),
            name: None,
            sex: None,
            birth_date: None,
            breed_id: None,
            dam_id: None,
            sire_id: None,
            pasture_id: None,
            stage_id: None,
            production_path_id: None,
            status: Some("active".to_string()),
            weight_lbs: None,
            notes: None,
            deleted_at: None,
        }
    }
}

impl SyncRecord for Cattle {
    const ENTITY: EntityType = EntityType::Cattle;

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
            Reference::optional("breed_id", EntityType::Breed, self.breed_id.as_ref()),
            Reference::optional("dam_id", EntityType::Cattle, self.dam_id.as_ref()),
            Reference::optional("sire_id", EntityType::Cattle, self.sire_id.as_ref()),
            Reference::optional("pasture_id", EntityType::Pasture, self.pasture_id.as_ref()),
            Reference::optional("stage_id", EntityType::CattleStage, self.stage_id.as_ref()),
            Reference::optional(
                "production_path_id",
                EntityType::ProductionPath,
                self.production_path_id.as_ref(),
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A treatment, vaccination, or examination of one animal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: String,
    pub farm_id: String,
    pub cattle_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub record_type_id: Option<String>,
    #[serde(default)]
    pub medication_id: Option<String>,
    #[serde(default)]
    pub veterinarian_id: Option<String>,
    #[serde(default)]
    pub treatment_plan_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl HealthRecord {
    #[must_use]
    pub fn new(farm_id: impl Into<String>, cattle_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: new_record_id(),
            farm_id: farm_id.into(),
            cattle_id: cattle_id.into(),
            date,
            record_type_id: None,
            medication_id: None,
            veterinarian_id: None,
            treatment_plan_id: None,
            description: None,
            dosage: None,
            cost: None,
            notes: None,
            deleted_at: None,
        }
    }
}

impl SyncRecord for HealthRecord {
    const ENTITY: EntityType = EntityType::HealthRecord;

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
            Reference::required("cattle_id", EntityType::Cattle, &self.cattle_id),
            Reference::optional(
                "record_type_id",
                EntityType::HealthRecordType,
                self.record_type_id.as_ref(),
            ),
            Reference::optional(
                "medication_id",
                EntityType::Medication,
                self.medication_id.as_ref(),
            ),
            Reference::optional(
                "veterinarian_id",
                EntityType::Veterinarian,
                self.veterinarian_id.as_ref(),
            ),
            Reference::optional(
                "treatment_plan_id",
                EntityType::TreatmentPlan,
                self.treatment_plan_id.as_ref(),
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A breeding event and its expected outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PregnancyRecord {
    pub id: String,
    pub farm_id: String,
    pub cattle_id: String,
    #[serde(default)]
    pub sire_id: Option<String>,
    #[serde(default)]
    pub breeding_date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_calving_date: Option<NaiveDate>,
    /// natural, ai, embryo
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRecord for PregnancyRecord {
    const ENTITY: EntityType = EntityType::PregnancyRecord;

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
            Reference::required("cattle_id", EntityType::Cattle, &self.cattle_id),
            Reference::optional("sire_id", EntityType::Cattle, self.sire_id.as_ref()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A birth, linking dam and calf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalvingRecord {
    pub id: String,
    pub farm_id: String,
    pub dam_id: String,
    #[serde(default)]
    pub calf_id: Option<String>,
    #[serde(default)]
    pub pregnancy_record_id: Option<String>,
    pub calving_date: NaiveDate,
    #[serde(default)]
    pub calving_ease: Option<String>,
    #[serde(default)]
    pub birth_weight_lbs: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRecord for CalvingRecord {
    const ENTITY: EntityType = EntityType::CalvingRecord;

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
            Reference::required("dam_id", EntityType::Cattle, &self.dam_id),
            Reference::optional("calf_id", EntityType::Cattle, self.calf_id.as_ref()),
            Reference::optional(
                "pregnancy_record_id",
                EntityType::PregnancyRecord,
                self.pregnancy_record_id.as_ref(),
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Sale of an animal to a buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: String,
    pub farm_id: String,
    pub cattle_id: String,
    #[serde(default)]
    pub buyer_id: Option<String>,
    pub sale_date: NaiveDate,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub weight_lbs: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRecord for SaleRecord {
    const ENTITY: EntityType = EntityType::SaleRecord;

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
            Reference::required("cattle_id", EntityType::Cattle, &self.cattle_id),
            Reference::optional("buyer_id", EntityType::Buyer, self.buyer_id.as_ref()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Slaughter and processing of an animal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub id: String,
    pub farm_id: String,
    pub cattle_id: String,
    #[serde(default)]
    pub processor_id: Option<String>,
    pub processing_date: NaiveDate,
    #[serde(default)]
    pub hanging_weight_lbs: Option<f64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRecord for ProcessingRecord {
    const ENTITY: EntityType = EntityType::ProcessingRecord;

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
            Reference::required("cattle_id", EntityType::Cattle, &self.cattle_id),
            Reference::optional(
                "processor_id",
                EntityType::Processor,
                self.processor_id.as_ref(),
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Death of an animal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MortalityRecord {
    pub id: String,
    pub farm_id: String,
    pub cattle_id: String,
    pub death_date: NaiveDate,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub disposal_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncRecord for MortalityRecord {
    const ENTITY: EntityType = EntityType::MortalityRecord;

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
        Reference::required("cattle_id", EntityType::Cattle, &self.cattle_id)
            .into_iter()
            .collect()
    }
}

/// Movement of an animal between production stages.
///
/// Legacy table without a `deleted_at` column; deletes are hard deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub id: String,
    pub farm_id: String,
    pub cattle_id: String,
    #[serde(default)]
    pub from_stage_id: Option<String>,
    #[serde(default)]
    pub to_stage_id: Option<String>,
    pub transition_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SyncRecord for StageTransition {
    const ENTITY: EntityType = EntityType::StageTransition;

    fn id(&self) -> &str {
        &self.id
    }

    fn farm_id(&self) -> &str {
        &self.farm_id
    }

    fn references(&self) -> Vec<Reference> {
        [
            Reference::required("cattle_id", EntityType::Cattle, &self.cattle_id),
            Reference::optional(
                "from_stage_id",
                EntityType::CattleStage,
                self.from_stage_id.as_ref(),
            ),
            Reference::optional(
                "to_stage_id",
                EntityType::CattleStage,
                self.to_stage_id.as_ref(),
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cattle_references_skip_empty_ids() {
        let mut cattle = Cattle::new("farm-1", "A-1");
        cattle.dam_id = Some("cow-9".to_string());
        cattle.sire_id = Some("  ".to_string());

        let references = cattle.references();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].field, "dam_id");
        assert_eq!(references[0].target, EntityType::Cattle);
    }

    #[test]
    fn health_record_requires_cattle_id() {
        let payload = json!({
            "id": "hr-1",
            "farm_id": "farm-1",
            "date": "2024-03-01"
        });
        assert!(serde_json::from_value::<HealthRecord>(payload).is_err());
    }

    #[test]
    fn calving_record_links_dam_and_calf() {
        let payload = json!({
            "id": "cr-1",
            "farm_id": "farm-1",
            "dam_id": "cow-1",
            "calf_id": "calf-1",
            "calving_date": "2024-04-02"
        });
        let record: CalvingRecord = serde_json::from_value(payload).unwrap();
        let targets: Vec<String> = record
            .references()
            .into_iter()
            .map(|r| r.target_id)
            .collect();
        assert_eq!(targets, vec!["cow-1".to_string(), "calf-1".to_string()]);
    }
}
