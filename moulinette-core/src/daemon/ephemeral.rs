//! `dockerd` on a private bridge, rooted in a throwaway directory.
//!
//! Linux only: the bridge is managed with `ip(8)` and the daemon must be
//! allowed to create it (root or CAP_NET_ADMIN).

use super::{DaemonSettings, SecondaryDaemon};
use crate::error::DaemonError;
use bollard::Docker;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Prefix of the private root directory; its random suffix names the bridge.
const ROOT_PREFIX: &str = "moudock-";

/// Bridge names are limited to 15 bytes by the kernel.
const BRIDGE_PREFIX: &str = "moubr";

/// Request timeout of a health check, in seconds.
const PING_TIMEOUT_SECS: u64 = 1;
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Ping the Docker API listening on the Unix socket at `path`.
pub async fn ping_socket_async(path: &Path) -> bool {
    let Some(socket) = path.to_str() else {
        return false;
    };
    match Docker::connect_with_unix(socket, PING_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION) {
        Ok(client) => client.ping().await.is_ok(),
        Err(e) => {
            tracing::debug!(socket = %socket, error = %e, "Docker client setup failed");
            false
        }
    }
}

/// Blocking [`ping_socket_async`]. The ping runs on its own thread and
/// runtime, so it may be called from inside an async context.
pub fn ping_socket(path: &Path) -> bool {
    thread::scope(|scope| {
        scope
            .spawn(|| {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(ping_socket_async(path)),
                    Err(e) => {
                        tracing::debug!(error = %e, "Failed to start health check runtime");
                        false
                    }
                }
            })
            .join()
            .unwrap_or(false)
    })
}

fn run_ip(args: &[&str]) -> Result<(), DaemonError> {
    let command = format!("ip {}", args.join(" "));
    let output = Command::new("ip")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| DaemonError::Network {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(DaemonError::Network {
            command,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// A Docker daemon exclusively owned by one job execution.
pub struct EphemeralDockerDaemon {
    root: Option<TempDir>,
    root_path: PathBuf,
    bridge_name: String,
    socket_path: PathBuf,
    dockerd_binary: String,
    process: Option<Child>,
    bridge_created: bool,
}

impl EphemeralDockerDaemon {
    /// Allocate the private root directory. Nothing is started yet.
    pub fn new(dockerd_binary: impl Into<String>) -> Result<Self, DaemonError> {
        let root = tempfile::Builder::new()
            .prefix(ROOT_PREFIX)
            .rand_bytes(8)
            .tempdir()
            .map_err(DaemonError::Spawn)?;
        let root_path = root.path().to_path_buf();

        let suffix = root_path
            .file_name()
            .map(|name| name.to_string_lossy().trim_start_matches(ROOT_PREFIX).to_string())
            .unwrap_or_default();
        let bridge_name: String = format!("{BRIDGE_PREFIX}{suffix}").chars().take(15).collect();

        Ok(Self {
            socket_path: root_path.join("docker.sock"),
            root: Some(root),
            root_path,
            bridge_name,
            dockerd_binary: dockerd_binary.into(),
            process: None,
            bridge_created: false,
        })
    }

    /// Create the bridge and start the daemon from `settings`.
    pub fn start(settings: &DaemonSettings) -> Result<Self, DaemonError> {
        let mut daemon = Self::new(settings.dockerd_binary.clone())?;
        if let Err(e) = daemon.launch(&settings.bridge_ip, &settings.dns) {
            daemon.stop();
            return Err(e);
        }
        Ok(daemon)
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_path
    }

    /// Configure the private bridge, then spawn the daemon bound to it.
    pub fn launch(&mut self, bridge_ip: &str, dns: &[String]) -> Result<(), DaemonError> {
        let bridge = self.bridge_name.clone();

        run_ip(&["link", "add", "name", &bridge, "type", "bridge"])?;
        self.bridge_created = true;
        run_ip(&["addr", "add", bridge_ip, "dev", &bridge])?;
        run_ip(&["link", "set", "dev", &bridge, "up"])?;

        let log_path = self.root_path.join("dockerd.log");
        let log = File::create(&log_path).map_err(DaemonError::Spawn)?;
        let log_err = log.try_clone().map_err(DaemonError::Spawn)?;

        let mut cmd = Command::new(&self.dockerd_binary);
        cmd.arg(format!("--bridge={bridge}"))
            .arg(format!("--data-root={}", self.root_path.join("data").display()))
            .arg(format!("--exec-root={}", self.root_path.join("exec").display()))
            .arg(format!("--pidfile={}", self.root_path.join("docker.pid").display()))
            .arg(format!("--host=unix://{}", self.socket_path.display()));
        for server in dns {
            cmd.arg(format!("--dns={server}"));
        }

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(DaemonError::Spawn)?;

        tracing::info!(
            pid = child.id(),
            bridge = %bridge,
            socket = %self.socket_path.display(),
            "Started secondary docker daemon"
        );
        self.process = Some(child);
        Ok(())
    }

    fn terminate(&mut self) {
        let Some(mut child) = self.process.take() else {
            return;
        };
        let pid = child.id();

        // SIGTERM first so the daemon can unmount its roots
        let _ = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .stdin(Stdio::null())
            .output();

        let steps = STOP_GRACE.as_millis() / 100;
        for _ in 0..steps {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(pid, %status, "Secondary docker daemon exited");
                    return;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(100)),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Error checking docker daemon status");
                    break;
                }
            }
        }

        tracing::warn!(pid, "Docker daemon did not exit gracefully, sending SIGKILL");
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl SecondaryDaemon for EphemeralDockerDaemon {
    fn is_ready(&self) -> bool {
        ping_socket(&self.socket_path)
    }

    fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn stop(&mut self) {
        self.terminate();

        if let Some(root) = self.root.take() {
            if let Err(e) = root.close() {
                tracing::warn!(root = %self.root_path.display(), error = %e, "Failed to remove daemon root");
            }
        }

        if self.bridge_created {
            self.bridge_created = false;
            let bridge = self.bridge_name.clone();
            if let Err(e) = run_ip(&["link", "set", "dev", &bridge, "down"])
                .and_then(|()| run_ip(&["link", "delete", &bridge, "type", "bridge"]))
            {
                tracing::warn!(bridge = %bridge, error = %e, "Failed to tear down bridge");
            }
        }
    }
}

impl Drop for EphemeralDockerDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}
