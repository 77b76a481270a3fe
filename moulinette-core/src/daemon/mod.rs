//! Secondary Docker daemons for blueprints that need Docker inside their
//! inspection container.
//!
//! A daemon is started per execution, bound to a private bridge and a
//! private Unix socket, and torn down before the execution returns:
//! - [`SecondaryDaemon`] is the handle the engine talks to
//! - [`DaemonGuard`] stops the daemon exactly once when dropped
//! - [`wait_until_started`] / [`wait_until_started_async`] poll readiness

mod ephemeral;

pub use ephemeral::{ping_socket, ping_socket_async, EphemeralDockerDaemon};

use crate::error::DaemonError;
use std::path::Path;
use std::time::{Duration, Instant};

/// Interval between two readiness checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Where the daemon socket is mounted inside the inspection container.
pub const CONTAINER_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Parameters for launching a secondary daemon.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// CIDR address assigned to the private bridge
    pub bridge_ip: String,
    /// DNS servers passed to the daemon
    pub dns: Vec<String>,
    /// Daemon binary
    pub dockerd_binary: String,
}

impl DaemonSettings {
    pub fn from_config(config: &moulinette_common::Config) -> Self {
        Self {
            bridge_ip: config.additional_docker_daemon.network_bridge_mask.clone(),
            dns: config.additional_docker_daemon.dns.clone(),
            dockerd_binary: config.dockerd_binary.clone(),
        }
    }
}

/// A launched daemon owned by a single execution.
pub trait SecondaryDaemon: Send {
    /// Lightweight, idempotent health check.
    fn is_ready(&self) -> bool;

    /// Host path of the daemon's Unix socket.
    fn socket_path(&self) -> &Path;

    /// Terminate the daemon and release its resources. Never fails.
    fn stop(&mut self);
}

/// Block until `daemon` answers its health check, polling every `interval`.
pub fn wait_until_started<D: SecondaryDaemon + ?Sized>(
    daemon: &D,
    timeout: Duration,
    interval: Duration,
) -> Result<(), DaemonError> {
    let start = Instant::now();
    loop {
        if daemon.is_ready() {
            tracing::debug!(elapsed = ?start.elapsed(), "Secondary docker daemon ready");
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(DaemonError::NotReady(timeout));
        }
        std::thread::sleep(interval.min(timeout - elapsed));
    }
}

/// Cooperative variant of [`wait_until_started`]: suspends between checks.
pub async fn wait_until_started_async<D: SecondaryDaemon + ?Sized>(
    daemon: &D,
    timeout: Duration,
    interval: Duration,
) -> Result<(), DaemonError> {
    let start = Instant::now();
    loop {
        if daemon.is_ready() {
            tracing::debug!(elapsed = ?start.elapsed(), "Secondary docker daemon ready");
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(DaemonError::NotReady(timeout));
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Owns a launched daemon and stops it when dropped.
pub struct DaemonGuard {
    daemon: Box<dyn SecondaryDaemon>,
}

impl DaemonGuard {
    pub fn new(daemon: Box<dyn SecondaryDaemon>) -> Self {
        Self { daemon }
    }

    pub fn daemon(&self) -> &dyn SecondaryDaemon {
        self.daemon.as_ref()
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        tracing::debug!(socket = %self.daemon.socket_path().display(), "Stopping secondary docker daemon");
        self.daemon.stop();
    }
}
