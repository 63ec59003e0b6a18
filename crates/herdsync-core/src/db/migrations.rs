//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run `statements` inside one transaction, rolling back on the first failure.
async fn apply_statements(conn: &Connection, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }
    Ok(())
}

/// Migration to version 1: replica rows and their references
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply_statements(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS records (
                entity_type TEXT NOT NULL,
                id TEXT NOT NULL,
                farm_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                sync_status TEXT NOT NULL DEFAULT 'pending',
                deleted_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (entity_type, id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_records_farm ON records(entity_type, farm_id, deleted_at)",
            "CREATE INDEX IF NOT EXISTS idx_records_status ON records(sync_status)",
            // Outgoing references; `resolved` flips once the target row exists locally
            "CREATE TABLE IF NOT EXISTS record_links (
                entity_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                field TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (entity_type, record_id, field),
                FOREIGN KEY (entity_type, record_id)
                    REFERENCES records(entity_type, id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_record_links_target ON record_links(target_type, target_id)",
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: durable key/value blobs (retry queue, sync timestamps)
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply_statements(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
