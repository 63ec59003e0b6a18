//! Generic row representation shared by the local replica and the wire

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::entity::{EntityType, SyncStatus};
use crate::error::{Error, Result};
use crate::util::now_millis;

/// Columns kept as local bookkeeping rather than inside the payload.
const BOOKKEEPING_COLUMNS: [&str; 3] = ["id", "farm_id", "deleted_at"];

/// A typed entity that can be mirrored between replica and remote.
pub trait SyncRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity kind tag of this model.
    const ENTITY: EntityType;

    fn id(&self) -> &str;

    fn farm_id(&self) -> &str;

    /// Soft-delete timestamp, for entities that carry one.
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Foreign-key style references to other rows.
    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }
}

/// A reference from one row to another, by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Wire column holding the identifier (e.g. `dam_id`)
    pub field: &'static str,
    pub target: EntityType,
    pub target_id: String,
}

impl Reference {
    /// Build a reference when the optional identifier is set and non-empty.
    pub fn optional(field: &'static str, target: EntityType, id: Option<&String>) -> Option<Self> {
        id.filter(|id| !id.trim().is_empty()).map(|id| Self {
            field,
            target,
            target_id: id.clone(),
        })
    }

    pub fn required(field: &'static str, target: EntityType, id: &str) -> Option<Self> {
        if id.trim().is_empty() {
            return None;
        }
        Some(Self {
            field,
            target,
            target_id: id.to_string(),
        })
    }
}

/// A row of the local replica.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    pub entity_type: EntityType,
    pub id: String,
    /// Tenant the row belongs to
    pub farm_id: String,
    /// Domain columns, keyed by wire column name
    pub payload: Map<String, Value>,
    pub sync_status: SyncStatus,
    /// Soft-delete timestamp (Unix ms)
    pub deleted_at: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl LocalRecord {
    /// Create a pending row from a typed model.
    pub fn from_model<T: SyncRecord>(model: &T) -> Result<Self> {
        let value = serde_json::to_value(model)?;
        let Value::Object(mut payload) = value else {
            return Err(Error::InvalidInput(format!(
                "{} did not serialize to an object",
                T::ENTITY
            )));
        };
        for column in BOOKKEEPING_COLUMNS {
            payload.remove(column);
        }

        let now = now_millis();
        Ok(Self {
            entity_type: T::ENTITY,
            id: model.id().to_string(),
            farm_id: model.farm_id().to_string(),
            payload,
            sync_status: SyncStatus::Pending,
            deleted_at: model.deleted_at().map(|at| at.timestamp_millis()),
            created_at: now,
            updated_at: now,
        })
    }

    /// Decode this row back into its typed model.
    pub fn to_model<T: SyncRecord>(&self) -> Result<T> {
        if self.entity_type != T::ENTITY {
            return Err(Error::InvalidInput(format!(
                "row {} is a {}, not a {}",
                self.id,
                self.entity_type,
                T::ENTITY
            )));
        }
        Ok(serde_json::from_value(self.wire_value(true))?)
    }

    /// Full wire-shaped object: payload plus bookkeeping columns.
    pub fn wire_value(&self, include_deleted_at: bool) -> Value {
        let mut object = self.payload.clone();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert("farm_id".to_string(), Value::String(self.farm_id.clone()));
        if include_deleted_at {
            let deleted_at = self
                .deleted_at
                .and_then(crate::util::millis_to_datetime)
                .map_or(Value::Null, |at| Value::String(at.to_rfc3339()));
            object.insert("deleted_at".to_string(), deleted_at);
        }
        Value::Object(object)
    }

    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A remote row decoded and validated against its typed model.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub entity_type: EntityType,
    pub id: String,
    pub farm_id: String,
    pub payload: Map<String, Value>,
    pub deleted_at: Option<i64>,
    pub references: Vec<Reference>,
}

impl RemoteRecord {
    /// Materialize as a synced local row.
    pub fn into_local(self) -> LocalRecord {
        let now = now_millis();
        LocalRecord {
            entity_type: self.entity_type,
            id: self.id,
            farm_id: self.farm_id,
            payload: self.payload,
            sync_status: SyncStatus::Synced,
            deleted_at: self.deleted_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Decode a wire object as the typed model `T`.
pub fn decode_wire<T: SyncRecord>(value: Value) -> std::result::Result<RemoteRecord, String> {
    let model: T = serde_json::from_value(value.clone())
        .map_err(|error| format!("invalid {} payload: {error}", T::ENTITY))?;
    let Value::Object(mut payload) = value else {
        return Err(format!("{} payload is not an object", T::ENTITY));
    };
    for column in BOOKKEEPING_COLUMNS {
        payload.remove(column);
    }

    Ok(RemoteRecord {
        entity_type: T::ENTITY,
        id: model.id().to_string(),
        farm_id: model.farm_id().to_string(),
        payload,
        deleted_at: model.deleted_at().map(|at| at.timestamp_millis()),
        references: model.references(),
    })
}
