//! Periodic backend reachability probe

use std::time::Duration;

use reqwest::Client;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::ConnectivityMonitor;

/// Polls a health endpoint and feeds the result into a [`ConnectivityMonitor`].
pub struct ReachabilityProbe {
    http: Client,
    url: String,
    check_interval: Duration,
    monitor: ConnectivityMonitor,
}

impl ReachabilityProbe {
    pub fn new(
        url: impl Into<String>,
        check_interval: Duration,
        timeout: Duration,
        monitor: ConnectivityMonitor,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            url: url.into(),
            check_interval,
            monitor,
        })
    }

    /// Probe once and publish the result. Any HTTP response counts as reachable.
    pub async fn check_once(&self) -> bool {
        let reachable = match self.http.get(&self.url).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(url = %self.url, "Reachability probe failed: {error}");
                false
            }
        };
        self.monitor.set_reachable(reachable);
        reachable
    }

    /// Probe on every tick until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.check_interval);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
        tracing::debug!("Reachability probe stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{ConnectionKind, NetworkStatus};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_endpoint_marks_offline() {
        let monitor = ConnectivityMonitor::new(NetworkStatus::online(ConnectionKind::Wifi));
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let probe = ReachabilityProbe::new(
            format!("http://127.0.0.1:{port}/health"),
            Duration::from_secs(60),
            Duration::from_millis(500),
            monitor.clone(),
        )
        .unwrap();

        assert!(!probe.check_once().await);
        assert!(!monitor.is_suitable_for_sync());
        assert_eq!(monitor.status().kind, ConnectionKind::Wifi);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn responding_endpoint_marks_online() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        let monitor = ConnectivityMonitor::default();
        let probe = ReachabilityProbe::new(
            format!("http://{address}/health"),
            Duration::from_secs(60),
            Duration::from_secs(2),
            monitor.clone(),
        )
        .unwrap();

        assert!(probe.check_once().await);
        assert!(monitor.is_suitable_for_sync());
    }
}
