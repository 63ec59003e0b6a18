//! Data models for herdsync

mod descriptor;
mod entity;
mod farm;
mod livestock;
mod record;
mod reference;
mod sync_operation;

pub use descriptor::{
    descriptor, entity_for_table, realtime_entities, EntityDescriptor, UNRANKED_PRIORITY,
};
pub use entity::{EntityType, OperationKind, SyncStatus, WriteOrigin};
pub use farm::{FarmTask, PastureLog, Photo};
pub use livestock::{
    CalvingRecord, Cattle, HealthRecord, MortalityRecord, PregnancyRecord, ProcessingRecord,
    SaleRecord, StageTransition,
};
pub use record::{decode_wire, LocalRecord, Reference, RemoteRecord, SyncRecord};
pub use reference::{
    Breed, Buyer, CattleStage, Contact, HealthRecordType, Medication, Pasture, Processor,
    ProductionPath, TreatmentPlan, Veterinarian,
};
pub use sync_operation::{BackoffPolicy, SyncOperation};

/// New time-ordered row identifier.
pub(crate) fn new_record_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
