//! Remote store port and the Supabase adapter

mod postgrest;
mod realtime;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

pub use postgrest::{classify_response, SupabaseRemote};
pub use realtime::{parse_postgres_change, RealtimeClient};

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Infinite sequence of change notifications for one table.
///
/// Ends only when the underlying channel is torn down.
pub type ChangeStream = BoxStream<'static, RemoteChange>;

/// Row filter and ordering for [`RemoteStore::select`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Equality filters, `(column, value)`
    pub filters: Vec<(String, String)>,
    /// `(column, ascending)`
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Value of the equality filter on `column`, if any.
    pub fn filter_value(&self, column: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change notification from a table subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub table: String,
    pub kind: ChangeKind,
    /// New row image (insert/update)
    pub record: Option<Value>,
    /// Old row image; for deletes usually only the primary key
    pub old_record: Option<Value>,
}

impl RemoteChange {
    /// Identifier of the affected row, from whichever image carries it.
    pub fn row_id(&self) -> Option<&str> {
        self.record
            .as_ref()
            .and_then(|record| record.get("id"))
            .or_else(|| self.old_record.as_ref().and_then(|old| old.get("id")))
            .and_then(Value::as_str)
    }
}

/// Authenticated table access on the authoritative store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> RemoteResult<Vec<Value>>;

    /// Insert one row; fails with a duplicate error if the id exists.
    async fn insert(&self, table: &str, row: Value) -> RemoteResult<Value>;

    /// Insert or overwrite one row by id.
    async fn upsert(&self, table: &str, row: Value) -> RemoteResult<Value>;

    /// Patch columns of the row `id`; fails with not-found if absent.
    async fn update(&self, table: &str, id: &str, patch: Value) -> RemoteResult<Value>;

    /// Remove the row `id`. Deleting an absent row succeeds.
    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()>;

    /// Open a change subscription on `table` filtered to `farm_id`.
    async fn subscribe(&self, table: &str, farm_id: &str) -> RemoteResult<ChangeStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_builder_collects_filters() {
        let query = Query::new()
            .eq("farm_id", "farm-1")
            .eq("id", "cow-1")
            .order_by("created_at", true)
            .limit(1);
        assert_eq!(query.filter_value("farm_id"), Some("farm-1"));
        assert_eq!(query.filter_value("name"), None);
        assert_eq!(query.limit, Some(1));
    }

    #[test]
    fn delete_change_takes_id_from_old_record() {
        let change = RemoteChange {
            table: "cattle".to_string(),
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(json!({ "id": "cow-1" })),
        };
        assert_eq!(change.row_id(), Some("cow-1"));
    }
}
