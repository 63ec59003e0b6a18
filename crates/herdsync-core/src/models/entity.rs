//! Entity kinds and sync bookkeeping tags

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every table mirrored between the local replica and the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Breed,
    TreatmentPlan,
    Contact,
    CattleStage,
    ProductionPath,
    HealthRecordType,
    Medication,
    Veterinarian,
    Processor,
    Buyer,
    Pasture,
    Cattle,
    HealthRecord,
    PregnancyRecord,
    CalvingRecord,
    SaleRecord,
    ProcessingRecord,
    MortalityRecord,
    StageTransition,
    Photo,
    Task,
    PastureLog,
}

impl EntityType {
    /// All entity kinds, in declaration order.
    pub const ALL: [Self; 22] = [
        Self::Breed,
        Self::TreatmentPlan,
        Self::Contact,
        Self::CattleStage,
        Self::ProductionPath,
        Self::HealthRecordType,
        Self::Medication,
        Self::Veterinarian,
        Self::Processor,
        Self::Buyer,
        Self::Pasture,
        Self::Cattle,
        Self::HealthRecord,
        Self::PregnancyRecord,
        Self::CalvingRecord,
        Self::SaleRecord,
        Self::ProcessingRecord,
        Self::MortalityRecord,
        Self::StageTransition,
        Self::Photo,
        Self::Task,
        Self::PastureLog,
    ];

    /// Stable snake_case name used in the local replica and the retry queue.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Breed => "breed",
            Self::TreatmentPlan => "treatment_plan",
            Self::Contact => "contact",
            Self::CattleStage => "cattle_stage",
            Self::ProductionPath => "production_path",
            Self::HealthRecordType => "health_record_type",
            Self::Medication => "medication",
            Self::Veterinarian => "veterinarian",
            Self::Processor => "processor",
            Self::Buyer => "buyer",
            Self::Pasture => "pasture",
            Self::Cattle => "cattle",
            Self::HealthRecord => "health_record",
            Self::PregnancyRecord => "pregnancy_record",
            Self::CalvingRecord => "calving_record",
            Self::SaleRecord => "sale_record",
            Self::ProcessingRecord => "processing_record",
            Self::MortalityRecord => "mortality_record",
            Self::StageTransition => "stage_transition",
            Self::Photo => "photo",
            Self::Task => "task",
            Self::PastureLog => "pasture_log",
        }
    }

    /// Position of this kind inside [`EntityType::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Accepts either the entity name (`health_record`) or its remote table
    /// name (`health_records`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|entity| {
                entity.as_str() == needle || super::descriptor(*entity).table == needle
            })
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Kind of work a [`super::SyncOperation`] replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// Informational per-row sync tag kept in the local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    #[default]
    Pending,
    Failed,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored tag, treating unknown values as pending.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Provenance of a local write.
///
/// Only `Local` writes are pushed to the remote store; `Remote` writes were
/// materialized from the remote and `Internal` writes are the sync engine's
/// own housekeeping (e.g. purging a row the remote refused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOrigin {
    Local,
    Remote,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_position_in_all() {
        for (position, entity) in EntityType::ALL.into_iter().enumerate() {
            assert_eq!(entity.index(), position);
        }
    }

    #[test]
    fn parses_entity_and_table_names() {
        assert_eq!(
            "health_record".parse::<EntityType>().unwrap(),
            EntityType::HealthRecord
        );
        assert_eq!(
            "health_records".parse::<EntityType>().unwrap(),
            EntityType::HealthRecord
        );
        assert_eq!("Cattle".parse::<EntityType>().unwrap(), EntityType::Cattle);
        assert!("horses".parse::<EntityType>().is_err());
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&EntityType::StageTransition).unwrap();
        assert_eq!(json, "\"stage_transition\"");
        let op = serde_json::to_string(&OperationKind::Delete).unwrap();
        assert_eq!(op, "\"delete\"");
    }

    #[test]
    fn unknown_stored_status_is_pending() {
        assert_eq!(SyncStatus::from_stored("synced"), SyncStatus::Synced);
        assert_eq!(SyncStatus::from_stored("weird"), SyncStatus::Pending);
    }
}
