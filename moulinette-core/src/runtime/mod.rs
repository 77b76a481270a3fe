//! Container runtime seam.
//!
//! The engine never talks to Docker directly: builds, container runs,
//! out-of-band kills and secondary daemons all go through
//! [`ContainerRuntime`], implemented for the docker CLI by [`DockerRuntime`].

mod docker;

pub use docker::{ChildProcess, DockerRuntime};

use crate::daemon::{DaemonSettings, SecondaryDaemon};
use crate::error::DaemonError;
use std::io::Read;
use std::path::{Path, PathBuf};

/// A spawned client process whose stdout and stderr share one stream.
pub trait ProcessHandle: Send {
    /// The merged output stream; `None` once taken.
    fn take_output(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Wait for exit. `None` means the process was terminated by a signal.
    fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Kill the local process.
    fn kill(&mut self) -> std::io::Result<()>;
}

/// Image build parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    pub build_script: PathBuf,
    pub tag: String,
    /// Always attempt to pull a newer base image
    pub pull: bool,
}

impl BuildRequest {
    /// Arguments for `docker`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            self.build_script.display().to_string(),
            "--tag".to_string(),
            self.tag.clone(),
        ];
        if self.pull {
            args.push("--pull".to_string());
        }
        args.push(self.context_dir.display().to_string());
        args
    }
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

impl Mount {
    pub fn new(host: impl AsRef<Path>, container: impl Into<String>) -> Self {
        Self {
            host: host.as_ref().to_path_buf(),
            container: container.into(),
        }
    }

    fn to_volume_arg(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

/// Inspection container parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Container name, targetable by an out-of-band kill
    pub name: String,
    pub image: String,
    pub mounts: Vec<Mount>,
    pub command: Vec<String>,
}

impl RunRequest {
    /// Arguments for `docker`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--rm".to_string(),
        ];
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.to_volume_arg());
        }
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Everything the engine needs from a container platform.
pub trait ContainerRuntime: Send + Sync {
    /// Start an image build; output streams until the build ends.
    fn build_image(&self, request: &BuildRequest) -> std::io::Result<Box<dyn ProcessHandle>>;

    /// Start the inspection container in the foreground.
    fn run_container(&self, request: &RunRequest) -> std::io::Result<Box<dyn ProcessHandle>>;

    /// Kill a container by name, independently of any local client process.
    fn kill_container(&self, name: &str) -> std::io::Result<()>;

    /// Bring up a secondary daemon on a private bridge.
    fn launch_daemon(
        &self,
        settings: &DaemonSettings,
    ) -> Result<Box<dyn SecondaryDaemon>, DaemonError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_follow_mount_order() {
        let request = RunRequest {
            name: "c0ffee".into(),
            image: "job-env".into(),
            mounts: vec![
                Mount::new("/jobs/a", "/moulinette/"),
                Mount::new("/cache/a", "/moulinette/rendu/"),
            ],
            command: vec!["python3".into(), "inspect.py".into()],
        };

        assert_eq!(
            request.args(),
            vec![
                "run",
                "--name",
                "c0ffee",
                "--rm",
                "-v",
                "/jobs/a:/moulinette/",
                "-v",
                "/cache/a:/moulinette/rendu/",
                "job-env",
                "python3",
                "inspect.py",
            ]
        );
    }

    #[test]
    fn build_args_add_pull_only_when_asked() {
        let mut request = BuildRequest {
            context_dir: PathBuf::from("/jobs/a"),
            build_script: PathBuf::from("/jobs/a/Dockerfile"),
            tag: "env-a".into(),
            pull: false,
        };
        assert_eq!(
            request.args(),
            vec!["build", "--file", "/jobs/a/Dockerfile", "--tag", "env-a", "/jobs/a"]
        );

        request.pull = true;
        assert!(request.args().contains(&"--pull".to_string()));
        assert_eq!(request.args().last().map(String::as_str), Some("/jobs/a"));
    }
}
