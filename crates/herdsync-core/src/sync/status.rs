//! Aggregate sync status published to observers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Success,
    Failed,
}

/// Point-in-time view of the sync engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SyncSnapshot {
    pub state: SyncState,
    /// Full-sync progress, 0.0 to 1.0
    pub progress: f64,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_ops: usize,
    pub failed_ops: usize,
}

/// Shared publisher for [`SyncSnapshot`].
#[derive(Clone)]
pub struct StatusBoard {
    snapshot: Arc<watch::Sender<SyncSnapshot>>,
}

impl StatusBoard {
    pub fn new(initial: SyncSnapshot) -> Self {
        let (snapshot, _) = watch::channel(initial);
        Self {
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn update(&self, modify: impl FnOnce(&mut SyncSnapshot)) {
        self.snapshot.send_modify(modify);
    }

    /// Raise progress, never lowering it.
    pub fn advance(&self, progress: f64) {
        self.snapshot.send_if_modified(|snapshot| {
            let next = progress.clamp(0.0, 1.0);
            if next > snapshot.progress {
                snapshot.progress = next;
                true
            } else {
                false
            }
        });
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(SyncSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_moves_backwards() {
        let board = StatusBoard::default();
        board.advance(0.4);
        board.advance(0.2);
        assert!((board.snapshot().progress - 0.4).abs() < f64::EPSILON);
        board.advance(3.0);
        assert!((board.snapshot().progress - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_serializes_state_lowercase() {
        let board = StatusBoard::default();
        board.update(|snapshot| snapshot.state = SyncState::Syncing);
        let json = serde_json::to_value(board.snapshot()).unwrap();
        assert_eq!(json["state"], "syncing");
    }
}
