//! Materializing remote rows in the local replica

use crate::error::Result;
use crate::models::{descriptor, EntityType, RemoteRecord, WriteOrigin};
use crate::remote::{ChangeKind, RemoteChange};
use crate::store::{Change, LocalStore};

/// What applying one remote change did to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Deleted,
    /// The replica already matched
    Unchanged,
    /// The change could not be decoded and was skipped
    Dropped,
}

/// Apply one change notification for `entity`.
///
/// Inserts of rows already present are no-ops, updates of missing rows create
/// them, and deletes of missing rows do nothing.
pub async fn apply_remote_change(
    store: &LocalStore,
    entity: EntityType,
    change: &RemoteChange,
) -> Result<ApplyOutcome> {
    if change.kind == ChangeKind::Delete {
        let Some(id) = change.row_id() else {
            tracing::warn!(entity = %entity, "Dropping delete notification without an id");
            return Ok(ApplyOutcome::Dropped);
        };
        let event = store
            .commit(
                WriteOrigin::Remote,
                vec![Change::Delete {
                    entity,
                    id: id.to_string(),
                }],
            )
            .await?;
        return Ok(if event.deleted.is_empty() {
            ApplyOutcome::Unchanged
        } else {
            ApplyOutcome::Deleted
        });
    }

    let Some(row) = change.record.clone() else {
        tracing::warn!(
            entity = %entity,
            kind = ?change.kind,
            "Dropping notification without a row image"
        );
        return Ok(ApplyOutcome::Dropped);
    };
    let record = match descriptor(entity).decode(row) {
        Ok(record) => record,
        Err(error) => {
            tracing::warn!(entity = %entity, "Dropping malformed remote change: {error}");
            return Ok(ApplyOutcome::Dropped);
        }
    };

    match change.kind {
        ChangeKind::Insert => insert_if_absent(store, record).await,
        _ => merge(store, record).await,
    }
}

/// Overwrite-or-create every record in one commit. Returns how many rows changed.
pub async fn merge_records(store: &LocalStore, records: Vec<RemoteRecord>) -> Result<usize> {
    let mut changes = Vec::with_capacity(records.len());
    for record in records {
        if !differs_from_replica(store, &record).await? {
            continue;
        }
        changes.push(Change::Upsert(record.into_local()));
    }
    if changes.is_empty() {
        return Ok(0);
    }

    let event = store.commit(WriteOrigin::Remote, changes).await?;
    Ok(event.inserted.len() + event.updated.len())
}

async fn insert_if_absent(store: &LocalStore, record: RemoteRecord) -> Result<ApplyOutcome> {
    let event = store
        .commit(
            WriteOrigin::Remote,
            vec![Change::InsertIfAbsent(record.into_local())],
        )
        .await?;
    Ok(if event.inserted.is_empty() {
        ApplyOutcome::Unchanged
    } else {
        ApplyOutcome::Inserted
    })
}

async fn merge(store: &LocalStore, record: RemoteRecord) -> Result<ApplyOutcome> {
    if !differs_from_replica(store, &record).await? {
        return Ok(ApplyOutcome::Unchanged);
    }
    let event = store
        .commit(WriteOrigin::Remote, vec![Change::Upsert(record.into_local())])
        .await?;
    Ok(if event.inserted.is_empty() {
        ApplyOutcome::Updated
    } else {
        ApplyOutcome::Inserted
    })
}

async fn differs_from_replica(store: &LocalStore, record: &RemoteRecord) -> Result<bool> {
    Ok(match store.get(record.entity_type, &record.id).await? {
        Some(local) => {
            local.payload != record.payload
                || local.farm_id != record.farm_id
                || local.deleted_at != record.deleted_at
        }
        None => true,
    })
}
