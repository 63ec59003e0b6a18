//! In-memory remote store for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify};

use crate::error::{RemoteError, RemoteErrorKind};
use crate::models::entity_for_table;
use crate::remote::{ChangeStream, Query, RemoteChange, RemoteResult, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
    Subscribe,
}

impl RemoteOp {
    const fn is_push(self) -> bool {
        matches!(self, Self::Insert | Self::Upsert | Self::Update | Self::Delete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub table: String,
    pub id: Option<String>,
}

/// Remote store double enforcing foreign keys between tables.
pub struct InMemoryRemote {
    tables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    failures: Mutex<HashMap<(String, RemoteOp), RemoteError>>,
    calls: Mutex<Vec<RemoteCall>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<RemoteChange>>>>,
    gate: watch::Sender<bool>,
    push_entered: Notify,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            tables: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            subscribers: Mutex::new(HashMap::new()),
            gate,
            push_entered: Notify::new(),
        }
    }

    /// Place a row without going through FK checks.
    pub fn seed(&self, table: &str, row: Value) {
        let id = row_id(&row).unwrap_or_default();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    /// Make every `op` on `table` fail with `error` until cleared.
    pub fn fail(&self, table: &str, op: RemoteOp, error: RemoteError) {
        self.failures
            .lock()
            .unwrap()
            .insert((table.to_string(), op), error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(table, id)` of every push in call order.
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.op.is_push())
            .map(|call| (call.table.clone(), call.id.clone().unwrap_or_default()))
            .collect()
    }

    /// Block pushes until [`InMemoryRemote::open_gate`].
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Wait until some push has reached the remote.
    pub async fn wait_for_push(&self) {
        self.push_entered.notified().await;
    }

    pub fn subscriber_count(&self, table: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Deliver `change` to every live subscription on its table.
    pub fn emit(&self, change: RemoteChange) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(&change.table) {
            senders.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }

    /// End every subscription stream on `table`.
    pub fn drop_subscriptions(&self, table: &str) {
        self.subscribers.lock().unwrap().remove(table);
    }

    async fn enter(&self, op: RemoteOp, table: &str, id: Option<String>) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(RemoteCall {
            op,
            table: table.to_string(),
            id,
        });
        if op.is_push() {
            self.push_entered.notify_one();
            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get(&(table.to_string(), op))
            .cloned();
        failure.map_or(Ok(()), Err)
    }

    fn check_foreign_keys(&self, table: &str, row: &Value) -> RemoteResult<()> {
        let entity = entity_for_table(table).ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::Rejected, format!("unknown table {table}"))
        })?;
        let decoded = crate::models::descriptor(entity)
            .decode(row.clone())
            .map_err(|error| RemoteError::new(RemoteErrorKind::Rejected, error))?;

        let tables = self.tables.lock().unwrap();
        for reference in decoded.references {
            let target_table = crate::models::descriptor(reference.target).table;
            let exists = tables
                .get(target_table)
                .is_some_and(|rows| rows.contains_key(&reference.target_id));
            if !exists {
                return Err(RemoteError::foreign_key(format!(
                    "Key ({})=({}) is not present in table \"{target_table}\"",
                    reference.field, reference.target_id
                ))
                .with_code("23503"));
            }
        }
        Ok(())
    }

    fn store(&self, table: &str, id: String, row: Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }
}

fn row_id(row: &Value) -> Option<String> {
    row.get("id").and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn select(&self, table: &str, query: &Query) -> RemoteResult<Vec<Value>> {
        self.enter(RemoteOp::Select, table, query.filter_value("id").map(str::to_string))
            .await?;
        let tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        let matched = rows
            .values()
            .filter(|row| {
                query.filters.iter().all(|(column, value)| {
                    row.get(column).and_then(Value::as_str) == Some(value.as_str())
                })
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matched)
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult<Value> {
        let id = row_id(&row)
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::Rejected, "row without id"))?;
        self.enter(RemoteOp::Insert, table, Some(id.clone())).await?;
        if self.row(table, &id).is_some() {
            return Err(RemoteError::new(
                RemoteErrorKind::Duplicate,
                format!("duplicate key value violates unique constraint \"{table}_pkey\""),
            )
            .with_code("23505"));
        }
        self.check_foreign_keys(table, &row)?;
        self.store(table, id, row.clone());
        Ok(row)
    }

    async fn upsert(&self, table: &str, row: Value) -> RemoteResult<Value> {
        let id = row_id(&row)
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::Rejected, "row without id"))?;
        self.enter(RemoteOp::Upsert, table, Some(id.clone())).await?;
        self.check_foreign_keys(table, &row)?;
        self.store(table, id, row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> RemoteResult<Value> {
        self.enter(RemoteOp::Update, table, Some(id.to_string()))
            .await?;
        let Some(mut current) = self.row(table, id) else {
            return Err(RemoteError::new(
                RemoteErrorKind::NotFound,
                format!("no {table} row matched"),
            ));
        };
        if let (Some(target), Value::Object(fields)) = (current.as_object_mut(), patch) {
            for (key, value) in fields {
                target.insert(key, value);
            }
        }
        self.check_foreign_keys(table, &current)?;
        self.store(table, id.to_string(), current.clone());
        Ok(current)
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::Delete, table, Some(id.to_string()))
            .await?;
        if let Some(rows) = self.tables.lock().unwrap().get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn subscribe(&self, table: &str, _farm_id: &str) -> RemoteResult<ChangeStream> {
        self.enter(RemoteOp::Subscribe, table, None).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|change| (change, rx))
        })
        .boxed())
    }
}
