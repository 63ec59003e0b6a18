use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use herdsync_core::auth::{IdentityProvider, SupabaseIdentity};
use herdsync_core::config::SyncSettings;
use herdsync_core::connectivity::{ConnectivityMonitor, NetworkStatus, ReachabilityProbe};
use herdsync_core::db::Database;
use herdsync_core::remote::{RemoteStore, SupabaseRemote};
use herdsync_core::sync::{RetryQueue, SyncSnapshot, SyncState};
use herdsync_core::{LocalStore, SyncEngine, SyncOperation};
use serde::Serialize;

use crate::auth::auth_client;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Profile selected for this invocation.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub profile: CliProfile,
}

impl ResolvedProfile {
    pub fn load(explicit: Option<&str>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        let name = config.resolve_profile_name(explicit);
        let profile = config.profile(&name).cloned().unwrap_or_default();
        Ok(Self { name, profile })
    }
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub retry_count: u32,
    pub exhausted: bool,
    pub enqueued_at: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub profile: String,
    pub db_path: String,
    pub last_full_sync: Option<String>,
    pub pending_ops: usize,
    pub failed_ops: usize,
    pub pending_rows: u64,
}

pub struct EngineHandle {
    pub engine: SyncEngine,
    pub health_url: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, profile_name: &str) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("HERDSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| default_db_path(profile_name))
}

fn default_db_path(profile_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("herdsync")
        .join(format!("{profile_name}.db"))
}

pub fn load_settings(profile: &CliProfile) -> Result<SyncSettings, CliError> {
    let mut settings = SyncSettings::from_env()?;
    if settings.farm_id.is_none() {
        settings.farm_id.clone_from(&profile.farm_id);
    }
    Ok(settings)
}

pub async fn open_store(db_path: &Path, settings: &SyncSettings) -> Result<LocalStore, CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(db_path).await?;
    Ok(LocalStore::from_database(db, settings.commit_capacity))
}

/// Build the engine for `resolved`, probing the backend once so one-shot
/// commands start with a known connectivity state.
pub async fn open_engine(
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<EngineHandle, CliError> {
    let backend = resolved.profile.backend_config()?;
    let settings = load_settings(&resolved.profile)?;
    let store = open_store(db_path, &settings).await?;

    let auth = auth_client(&resolved.name, &backend)?;
    let identity: Arc<dyn IdentityProvider> = Arc::new(SupabaseIdentity::new(
        auth,
        &backend,
        settings.farm_id.clone(),
    )?);
    let remote: Arc<dyn RemoteStore> = Arc::new(
        SupabaseRemote::new(&backend, Arc::clone(&identity)).map_err(herdsync_core::Error::from)?,
    );

    let connectivity = ConnectivityMonitor::new(NetworkStatus::offline());
    let health_url = backend.health_url();
    let probe = ReachabilityProbe::new(
        health_url.clone(),
        settings.probe_interval,
        settings.probe_timeout,
        connectivity.clone(),
    )
    .map_err(|error| CliError::Config(format!("reachability probe: {error}")))?;
    if !probe.check_once().await {
        tracing::warn!(url = %health_url, "Backend unreachable; changes stay queued");
    }

    let engine = SyncEngine::new(store, remote, identity, connectivity, settings).await?;
    Ok(EngineHandle { engine, health_url })
}

/// Retry queue of the local replica, without touching the backend.
pub async fn open_queue(
    db_path: &Path,
    resolved: &ResolvedProfile,
) -> Result<(LocalStore, RetryQueue), CliError> {
    let settings = load_settings(&resolved.profile)?;
    let store = open_store(db_path, &settings).await?;
    let queue = RetryQueue::load(store.clone(), settings.backoff_policy()).await?;
    Ok((store, queue))
}

pub fn queue_item(operation: &SyncOperation, exhausted: bool) -> QueueItem {
    QueueItem {
        id: operation.id.to_string(),
        entity_type: operation.entity_type.to_string(),
        entity_id: operation.entity_id.clone(),
        operation: operation.operation.to_string(),
        retry_count: operation.retry_count,
        exhausted,
        enqueued_at: format_sync_timestamp(operation.enqueued_at),
        last_error: operation.last_error.clone(),
    }
}

pub fn format_queue_line(item: &QueueItem) -> String {
    let short_id = item.id.chars().take(8).collect::<String>();
    let state = if item.exhausted { "failed" } else { "pending" };
    let mut line = format!(
        "{short_id}  {:<7} {:<6} {}/{}  retries={}  enqueued={}",
        state, item.operation, item.entity_type, item.entity_id, item.retry_count, item.enqueued_at
    );
    if let Some(error) = &item.last_error {
        line.push_str("  last_error=");
        line.push_str(error);
    }
    line
}

pub fn format_sync_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_status_lines(item: &StatusItem) -> Vec<String> {
    vec![
        format!("Profile:        {}", item.profile),
        format!("Replica:        {}", item.db_path),
        format!(
            "Last full sync: {}",
            item.last_full_sync.as_deref().unwrap_or("never")
        ),
        format!("Pending rows:   {}", item.pending_rows),
        format!("Queued ops:     {} pending, {} failed", item.pending_ops, item.failed_ops),
    ]
}

pub fn format_snapshot_line(snapshot: &SyncSnapshot) -> String {
    let mut line = format!(
        "state={} progress={:.0}% pending_ops={} failed_ops={}",
        state_label(snapshot.state),
        snapshot.progress * 100.0,
        snapshot.pending_ops,
        snapshot.failed_ops
    );
    if let Some(error) = &snapshot.last_error {
        line.push_str(" last_error=");
        line.push_str(error);
    }
    line
}

const fn state_label(state: SyncState) -> &'static str {
    match state {
        SyncState::Idle => "idle",
        SyncState::Syncing => "syncing",
        SyncState::Success => "success",
        SyncState::Failed => "failed",
    }
}
