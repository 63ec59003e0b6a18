//! Per-entity capability table
//!
//! Routing a changed row to its remote table, push priority, and decoder is a
//! lookup here keyed by [`EntityType`].

use serde_json::Value;

use super::entity::EntityType;
use super::farm::{FarmTask, PastureLog, Photo};
use super::livestock::{
    CalvingRecord, Cattle, HealthRecord, MortalityRecord, PregnancyRecord, ProcessingRecord,
    SaleRecord, StageTransition,
};
use super::record::{decode_wire, RemoteRecord};
use super::reference::{
    Breed, Buyer, CattleStage, Contact, HealthRecordType, Medication, Pasture, Processor,
    ProductionPath, TreatmentPlan, Veterinarian,
};

/// Priority given to kinds with no dependency information.
pub const UNRANKED_PRIORITY: u8 = 5;

type Decoder = fn(Value) -> Result<RemoteRecord, String>;

/// Static capabilities of one entity kind.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub entity_type: EntityType,
    /// Remote table name
    pub table: &'static str,
    /// Insert push order, lowest first
    pub push_priority: u8,
    /// Whether the remote table carries a `deleted_at` column
    pub soft_delete: bool,
    /// Rarely-changing lookup data, skipped by full sync within the TTL
    pub reference_data: bool,
    /// Whether a realtime channel is opened for the table
    pub realtime: bool,
    decode: Decoder,
}

impl EntityDescriptor {
    /// Decode and validate a wire object against the typed model.
    pub fn decode(&self, value: Value) -> Result<RemoteRecord, String> {
        (self.decode)(value)
    }
}

const fn entry(
    entity_type: EntityType,
    table: &'static str,
    push_priority: u8,
    soft_delete: bool,
    reference_data: bool,
    realtime: bool,
    decode: Decoder,
) -> EntityDescriptor {
    EntityDescriptor {
        entity_type,
        table,
        push_priority,
        soft_delete,
        reference_data,
        realtime,
        decode,
    }
}

/// Indexed by [`EntityType::index`].
static DESCRIPTORS: [EntityDescriptor; 22] = [
    entry(EntityType::Breed, "breeds", 0, true, true, false, decode_wire::<Breed>),
    entry(
        EntityType::TreatmentPlan,
        "treatment_plans",
        0,
        true,
        true,
        false,
        decode_wire::<TreatmentPlan>,
    ),
    entry(EntityType::Contact, "contacts", 0, true, false, true, decode_wire::<Contact>),
    entry(
        EntityType::CattleStage,
        "cattle_stages",
        0,
        false,
        true,
        false,
        decode_wire::<CattleStage>,
    ),
    entry(
        EntityType::ProductionPath,
        "production_paths",
        0,
        false,
        true,
        false,
        decode_wire::<ProductionPath>,
    ),
    entry(
        EntityType::HealthRecordType,
        "health_record_types",
        0,
        false,
        true,
        false,
        decode_wire::<HealthRecordType>,
    ),
    entry(
        EntityType::Medication,
        "medications",
        0,
        true,
        true,
        false,
        decode_wire::<Medication>,
    ),
    entry(
        EntityType::Veterinarian,
        "veterinarians",
        0,
        true,
        false,
        false,
        decode_wire::<Veterinarian>,
    ),
    entry(
        EntityType::Processor,
        "processors",
        0,
        true,
        false,
        false,
        decode_wire::<Processor>,
    ),
    entry(EntityType::Buyer, "buyers", 0, true, false, false, decode_wire::<Buyer>),
    entry(EntityType::Pasture, "pastures", 0, true, false, false, decode_wire::<Pasture>),
    entry(EntityType::Cattle, "cattle", 1, true, false, true, decode_wire::<Cattle>),
    entry(
        EntityType::HealthRecord,
        "health_records",
        2,
        true,
        false,
        true,
        decode_wire::<HealthRecord>,
    ),
    entry(
        EntityType::PregnancyRecord,
        "pregnancy_records",
        2,
        true,
        false,
        true,
        decode_wire::<PregnancyRecord>,
    ),
    entry(
        EntityType::CalvingRecord,
        "calving_records",
        2,
        true,
        false,
        true,
        decode_wire::<CalvingRecord>,
    ),
    entry(
        EntityType::SaleRecord,
        "sale_records",
        2,
        true,
        false,
        true,
        decode_wire::<SaleRecord>,
    ),
    entry(
        EntityType::ProcessingRecord,
        "processing_records",
        2,
        true,
        false,
        true,
        decode_wire::<ProcessingRecord>,
    ),
    entry(
        EntityType::MortalityRecord,
        "mortality_records",
        2,
        true,
        false,
        true,
        decode_wire::<MortalityRecord>,
    ),
    entry(
        EntityType::StageTransition,
        "stage_transitions",
        2,
        false,
        false,
        true,
        decode_wire::<StageTransition>,
    ),
    entry(EntityType::Photo, "photos", 3, true, false, true, decode_wire::<Photo>),
    entry(EntityType::Task, "tasks", 4, true, false, true, decode_wire::<FarmTask>),
    entry(
        EntityType::PastureLog,
        "pasture_logs",
        UNRANKED_PRIORITY,
        true,
        false,
        false,
        decode_wire::<PastureLog>,
    ),
];

/// Capabilities of `entity`.
pub fn descriptor(entity: EntityType) -> &'static EntityDescriptor {
    &DESCRIPTORS[entity.index()]
}

/// Resolve a remote table name back to its entity kind.
pub fn entity_for_table(table: &str) -> Option<EntityType> {
    DESCRIPTORS
        .iter()
        .find(|descriptor| descriptor.table == table)
        .map(|descriptor| descriptor.entity_type)
}

/// Entity kinds that get a realtime channel.
pub fn realtime_entities() -> impl Iterator<Item = EntityType> {
    DESCRIPTORS
        .iter()
        .filter(|descriptor| descriptor.realtime)
        .map(|descriptor| descriptor.entity_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptors_are_indexed_by_entity() {
        for entity in EntityType::ALL {
            assert_eq!(descriptor(entity).entity_type, entity);
        }
    }

    #[test]
    fn table_names_are_unique_and_resolvable() {
        for entity in EntityType::ALL {
            assert_eq!(entity_for_table(descriptor(entity).table), Some(entity));
        }
        assert_eq!(entity_for_table("horses"), None);
    }

    #[test]
    fn parents_push_before_children() {
        let cattle = descriptor(EntityType::Cattle).push_priority;
        assert!(descriptor(EntityType::Breed).push_priority < cattle);
        assert!(descriptor(EntityType::Contact).push_priority < cattle);
        for child in [
            EntityType::HealthRecord,
            EntityType::PregnancyRecord,
            EntityType::CalvingRecord,
            EntityType::SaleRecord,
            EntityType::ProcessingRecord,
            EntityType::MortalityRecord,
            EntityType::StageTransition,
        ] {
            assert_eq!(descriptor(child).push_priority, cattle + 1);
        }
        assert!(
            descriptor(EntityType::Photo).push_priority
                < descriptor(EntityType::Task).push_priority
        );
    }

    #[test]
    fn eleven_kinds_have_realtime_channels() {
        let entities: Vec<EntityType> = realtime_entities().collect();
        assert_eq!(entities.len(), 11);
        assert!(entities.contains(&EntityType::Contact));
        assert!(!entities.contains(&EntityType::Breed));
    }

    #[test]
    fn decoder_uses_typed_model() {
        let decoded = descriptor(EntityType::HealthRecord)
            .decode(json!({
                "id": "hr-1",
                "farm_id": "farm-1",
                "cattle_id": "cow-1",
                "date": "2024-03-01"
            }))
            .unwrap();
        assert_eq!(decoded.entity_type, EntityType::HealthRecord);
        assert_eq!(decoded.references[0].target_id, "cow-1");

        assert!(descriptor(EntityType::HealthRecord)
            .decode(json!({ "id": "hr-1", "farm_id": "farm-1" }))
            .is_err());
    }
}
