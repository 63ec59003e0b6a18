//! Network reachability and connection class

mod probe;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use probe::ReachabilityProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Wifi,
    Cellular,
    Wired,
    #[default]
    Unknown,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Wired => "wired",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub reachable: bool,
    pub kind: ConnectionKind,
}

impl NetworkStatus {
    pub const fn offline() -> Self {
        Self {
            reachable: false,
            kind: ConnectionKind::Unknown,
        }
    }

    pub const fn online(kind: ConnectionKind) -> Self {
        Self {
            reachable: true,
            kind,
        }
    }

    /// Every reachable connection class is used for sync, cellular included.
    pub const fn is_suitable_for_sync(&self) -> bool {
        self.reachable
    }
}

/// Shared view of the device's connectivity.
///
/// The host platform (or [`ReachabilityProbe`]) feeds it; sync components read
/// the current value or await transitions.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    status: Arc<watch::Sender<NetworkStatus>>,
}

impl ConnectivityMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_suitable_for_sync(&self) -> bool {
        self.status().is_suitable_for_sync()
    }

    /// Publish a new status. Subscribers are only woken on actual change.
    pub fn set_status(&self, status: NetworkStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!(
                reachable = status.reachable,
                kind = %status.kind,
                "Connectivity changed"
            );
        }
    }

    /// Update reachability, keeping the last known connection class.
    pub fn set_reachable(&self, reachable: bool) {
        let kind = self.status().kind;
        self.set_status(NetworkStatus { reachable, kind });
    }

    pub fn set_kind(&self, kind: ConnectionKind) {
        let reachable = self.status().reachable;
        self.set_status(NetworkStatus { reachable, kind });
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Resolve once the connection is suitable for sync (immediately if it already is).
    pub async fn wait_until_available(&self) {
        let mut receiver = self.subscribe();
        let _ = receiver
            .wait_for(NetworkStatus::is_suitable_for_sync)
            .await;
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::offline())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cellular_is_suitable_for_sync() {
        assert!(NetworkStatus::online(ConnectionKind::Cellular).is_suitable_for_sync());
        assert!(!NetworkStatus::offline().is_suitable_for_sync());
    }

    #[test]
    fn set_reachable_keeps_kind() {
        let monitor = ConnectivityMonitor::new(NetworkStatus::online(ConnectionKind::Wifi));
        monitor.set_reachable(false);
        assert_eq!(
            monitor.status(),
            NetworkStatus {
                reachable: false,
                kind: ConnectionKind::Wifi
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unchanged_status_does_not_wake_subscribers() {
        let monitor = ConnectivityMonitor::new(NetworkStatus::online(ConnectionKind::Wired));
        let mut receiver = monitor.subscribe();
        receiver.mark_unchanged();

        monitor.set_status(NetworkStatus::online(ConnectionKind::Wired));
        assert!(!receiver.has_changed().unwrap());

        monitor.set_reachable(false);
        assert!(receiver.has_changed().unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_until_available_resolves_on_transition() {
        let monitor = ConnectivityMonitor::default();
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_until_available().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        monitor.set_status(NetworkStatus::online(ConnectionKind::Cellular));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
