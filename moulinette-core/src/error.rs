//! Failure vocabulary shared by every stage of a job.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed underlying cause carried by job errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for job stages.
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors raised while reading a process output stream line by line.
#[derive(Error, Debug)]
pub enum LineReadError {
    /// The deadline passed before the source was exhausted
    #[error("Line reader deadline reached")]
    Timeout,

    #[error("IO error while reading output: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a secondary Docker daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Creating or configuring the private bridge failed
    #[error("Network setup failed ({command}): {reason}")]
    Network { command: String, reason: String },

    #[error("Failed to start docker daemon: {0}")]
    Spawn(#[source] std::io::Error),

    /// The daemon socket never answered
    #[error("Docker daemon not ready after {0:?}")]
    NotReady(Duration),
}

/// Errors raised while decoding an inspection result.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed result: {0}")]
    Malformed(String),
}

/// Failures of the execution stage.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Nonzero inspector exit or an explicit `error` payload
    #[error("Inspection failed: {0}")]
    Inspection(String),

    #[error("Failed to load result from {path}: {reason}")]
    ResultLoading {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Job execution exceeded {0:?}")]
    Timeout(Duration),

    #[error("Secondary docker daemon setup failed: {0}")]
    DockerDaemonSetup(#[from] DaemonError),

    /// Local failure while preparing or launching the container
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this is a timeout.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Unified error type for a job's lifetime.
#[derive(Error, Debug)]
pub enum JobError {
    /// Copying the sources or loading the blueprint failed
    #[error("Failed to create workspace for {job}: {reason}")]
    WorkspaceCreation {
        job: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Failed to build environment {env_name}: {reason}")]
    EnvironmentBuild {
        env_name: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Fetcher {fetcher} failed for job {job}: {source}")]
    DataFetching {
        job: String,
        fetcher: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl JobError {
    /// Exit-code style classification used by the CLI.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WorkspaceCreation { .. } => "workspace_creation",
            Self::EnvironmentBuild { .. } => "environment_build",
            Self::DataFetching { .. } => "data_fetching",
            Self::Execution(ExecutionError::Inspection(_)) => "inspection",
            Self::Execution(ExecutionError::ResultLoading { .. }) => "result_loading",
            Self::Execution(ExecutionError::Timeout(_)) => "timeout",
            Self::Execution(ExecutionError::DockerDaemonSetup(_)) => "docker_daemon_setup",
            Self::Execution(ExecutionError::Io { .. }) => "execution_io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_errors_surface_as_execution_errors() {
        let err: ExecutionError = DaemonError::NotReady(Duration::from_secs(3)).into();
        assert!(matches!(err, ExecutionError::DockerDaemonSetup(_)));

        let job: JobError = err.into();
        assert_eq!(job.kind(), "docker_daemon_setup");
        assert!(job.to_string().contains("not ready"));
    }

    #[test]
    fn fetch_error_keeps_cause() {
        let cause: BoxError = anyhow::anyhow!("mirror unreachable").into();
        let err = JobError::DataFetching {
            job: "tp1".into(),
            fetcher: "git".into(),
            source: cause,
        };
        assert!(err.to_string().contains("tp1"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn timeout_is_classified() {
        let err = ExecutionError::Timeout(Duration::from_secs(1));
        assert!(err.is_timeout());
        assert_eq!(JobError::from(err).kind(), "timeout");
    }
}
