use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ConnectivityMonitor;

/// Target and timing for [`TcpProbe`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub host: String,
    pub port: u16,
    /// Pause between two probes.
    pub interval: Duration,
    /// Bound on a single connect.
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Periodically checks that a TCP connection to the remote can be opened
/// and feeds the result into a [`ConnectivityMonitor`].
pub struct TcpProbe {
    config: ProbeConfig,
    monitor: Arc<ConnectivityMonitor>,
}

impl TcpProbe {
    pub fn new(config: ProbeConfig, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self { config, monitor }
    }

    /// Performs one probe without touching the monitor.
    pub async fn check(&self) -> bool {
        let addr = (self.config.host.as_str(), self.config.port);
        match tokio::time::timeout(self.config.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host = %self.config.host, port = self.config.port, error = %e, "probe failed");
                false
            }
            Err(_) => {
                debug!(host = %self.config.host, port = self.config.port, "probe timed out");
                false
            }
        }
    }

    /// Probes once and records the result. Returns the observed value.
    pub async fn observe(&self) -> bool {
        let reachable = self.check().await;
        debug!(reachable, "probe result");
        self.monitor.set_reachable(reachable);
        reachable
    }

    /// Probes every `interval` until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.observe() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        debug!("probe loop stopped");
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
