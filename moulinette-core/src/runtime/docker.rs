//! Docker CLI implementation of the container runtime.

use super::{BuildRequest, ContainerRuntime, ProcessHandle, RunRequest};
use crate::daemon::{DaemonSettings, EphemeralDockerDaemon, SecondaryDaemon};
use crate::error::DaemonError;
use std::io::{PipeReader, Read};
use std::process::{Child, Command, Stdio};

/// A child process with stdout and stderr merged into one pipe.
pub struct ChildProcess {
    child: Child,
    output: Option<PipeReader>,
}

impl ChildProcess {
    /// Spawn `cmd` with both output streams writing into a single pipe.
    pub fn spawn_merged(mut cmd: Command) -> std::io::Result<Self> {
        let (reader, writer) = std::io::pipe()?;
        cmd.stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        let child = cmd.spawn()?;
        // The command still holds the parent's write ends; the reader only
        // sees end-of-stream once they are closed.
        drop(cmd);

        Ok(Self {
            child,
            output: Some(reader),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl ProcessHandle for ChildProcess {
    fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
        self.output
            .take()
            .map(|reader| Box::new(reader) as Box<dyn Read + Send>)
    }

    fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.wait()?.code())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()
    }
}

/// Drives the `docker` client binary.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker_binary: String,
}

impl DockerRuntime {
    pub fn new(docker_binary: impl Into<String>) -> Self {
        Self {
            docker_binary: docker_binary.into(),
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.docker_binary);
        cmd.args(args);
        cmd
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ContainerRuntime for DockerRuntime {
    fn build_image(&self, request: &BuildRequest) -> std::io::Result<Box<dyn ProcessHandle>> {
        tracing::debug!(tag = %request.tag, pull = request.pull, "docker build");
        let process = ChildProcess::spawn_merged(self.command(&request.args()))?;
        Ok(Box::new(process))
    }

    fn run_container(&self, request: &RunRequest) -> std::io::Result<Box<dyn ProcessHandle>> {
        tracing::debug!(container = %request.name, image = %request.image, "docker run");
        let process = ChildProcess::spawn_merged(self.command(&request.args()))?;
        Ok(Box::new(process))
    }

    fn kill_container(&self, name: &str) -> std::io::Result<()> {
        let output = self
            .command(&["kill".to_string(), name.to_string()])
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "docker kill {name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn launch_daemon(
        &self,
        settings: &DaemonSettings,
    ) -> Result<Box<dyn SecondaryDaemon>, DaemonError> {
        let daemon = EphemeralDockerDaemon::start(settings)?;
        Ok(Box::new(daemon))
    }
}
