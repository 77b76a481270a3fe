use super::{
    JobWorkspace, CONTAINER_DATA_DIR, CONTAINER_JOB_DIR, CONTEXT_FILE, INSPECTOR_COMMAND,
    RESULT_FILE, WORKDIR_NAME,
};
use crate::context::ExecutionContext;
use crate::daemon::{
    wait_until_started, DaemonGuard, DaemonSettings, CONTAINER_SOCKET_PATH, POLL_INTERVAL,
};
use crate::error::{ExecutionError, LineReadError, Result};
use crate::reader::TimedLines;
use crate::result::{InspectionReport, Payload};
use crate::runtime::{Mount, ProcessHandle, RunRequest};
use moulinette_common::logging::INSPECTOR_TARGET;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

type ExecResult<T> = std::result::Result<T, ExecutionError>;

/// A job with a built image and resolved data, ready to be inspected.
#[derive(Debug)]
pub struct ExecutableJob<'w> {
    workspace: &'w JobWorkspace,
    env_name: String,
    data_path: PathBuf,
}

impl<'w> ExecutableJob<'w> {
    pub(super) fn new(workspace: &'w JobWorkspace, env_name: String, data_path: PathBuf) -> Self {
        Self {
            workspace,
            env_name,
            data_path,
        }
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Run the inspector in the job image and decode its result.
    ///
    /// When the blueprint allows Docker, a secondary daemon is started first
    /// and stopped before this returns, whatever the outcome.
    pub fn execute_job(self, context: &ExecutionContext) -> Result<Payload> {
        let workspace = self.workspace;
        let job = workspace.job_name();

        let daemon = if workspace.blueprint().allow_docker() {
            let settings = DaemonSettings::from_config(workspace.config());
            match workspace.runtime().launch_daemon(&settings) {
                Ok(daemon) => Some(DaemonGuard::new(daemon)),
                Err(e) => {
                    tracing::error!(job = %job, error = %e, "Secondary docker daemon setup failed");
                    return Err(ExecutionError::from(e).into());
                }
            }
        } else {
            None
        };

        let outcome = self.run_inspection(context, daemon.as_ref());
        drop(daemon);

        match &outcome {
            Ok(_) => tracing::info!(job = %job, "Inspection completed"),
            Err(e) => tracing::warn!(job = %job, error = %e, "Inspection failed"),
        }
        outcome.map_err(Into::into)
    }

    fn run_inspection(
        &self,
        context: &ExecutionContext,
        daemon: Option<&DaemonGuard>,
    ) -> ExecResult<Payload> {
        let workspace = self.workspace;
        let config = workspace.config();
        let job_dir = workspace.job_dir();

        let context_bytes = serde_json::to_vec_pretty(context)
            .map_err(|e| ExecutionError::io("Failed to encode execution context", e.into()))?;
        fs::write(job_dir.join(CONTEXT_FILE), context_bytes)
            .map_err(|e| ExecutionError::io(format!("Failed to write {CONTEXT_FILE}"), e))?;
        fs::create_dir_all(job_dir.join(WORKDIR_NAME))
            .map_err(|e| ExecutionError::io(format!("Failed to create {WORKDIR_NAME}/"), e))?;
        match fs::remove_file(job_dir.join(RESULT_FILE)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(ExecutionError::io(format!("Failed to clear stale {RESULT_FILE}"), e));
            }
            _ => {}
        }

        if let Some(guard) = daemon {
            wait_until_started(
                guard.daemon(),
                config.additional_docker_daemon.max_wait_time,
                POLL_INTERVAL,
            )?;
        }

        let name = Uuid::new_v4().to_string();
        let mut mounts = vec![
            Mount::new(job_dir, CONTAINER_JOB_DIR),
            Mount::new(&self.data_path, CONTAINER_DATA_DIR),
        ];
        if let Some(guard) = daemon {
            mounts.push(Mount::new(guard.daemon().socket_path(), CONTAINER_SOCKET_PATH));
        }
        let request = RunRequest {
            name: name.clone(),
            image: self.env_name.clone(),
            mounts,
            command: INSPECTOR_COMMAND.iter().map(|arg| arg.to_string()).collect(),
        };

        let runtime = workspace.runtime();
        let mut process = runtime
            .run_container(&request)
            .map_err(|e| ExecutionError::io("Failed to launch inspection container", e))?;
        tracing::info!(
            job = %workspace.job_name(),
            container = %name,
            image = %self.env_name,
            timeout = ?config.job_timeout,
            "Inspection container started"
        );

        if let Some(output) = process.take_output() {
            for line in TimedLines::new(output, Some(config.job_timeout)) {
                match line {
                    Ok(line) => tracing::info!(target: INSPECTOR_TARGET, container = %name, "{line}"),
                    Err(LineReadError::Timeout) => {
                        tracing::warn!(container = %name, timeout = ?config.job_timeout, "Inspection timed out");
                        self.abort(process.as_mut(), &name);
                        return Err(ExecutionError::Timeout(config.job_timeout));
                    }
                    Err(LineReadError::Io(e)) => {
                        self.abort(process.as_mut(), &name);
                        return Err(ExecutionError::io("Failed to read inspector output", e));
                    }
                }
            }
        }

        let status = process
            .wait()
            .map_err(|e| ExecutionError::io("Failed to wait for inspection container", e))?;
        match status {
            Some(0) => {}
            Some(code) => {
                return Err(ExecutionError::Inspection(format!(
                    "inspector exited with status {code}"
                )))
            }
            None => {
                return Err(ExecutionError::Inspection(
                    "inspector was terminated by a signal".into(),
                ))
            }
        }

        self.load_result()
    }

    /// Kill the local client and the named container. Killing the client
    /// alone leaves the container running.
    fn abort(&self, process: &mut dyn ProcessHandle, name: &str) {
        if let Err(e) = process.kill() {
            tracing::warn!(container = %name, error = %e, "Failed to kill container client");
        }
        if let Err(e) = self.workspace.runtime().kill_container(name) {
            tracing::warn!(container = %name, error = %e, "Failed to kill container");
        }
        if let Err(e) = process.wait() {
            tracing::debug!(container = %name, error = %e, "Failed to reap container client");
        }
    }

    fn load_result(&self) -> ExecResult<Payload> {
        let path = self.workspace.job_dir().join(RESULT_FILE);
        let bytes = fs::read(&path).map_err(|e| ExecutionError::ResultLoading {
            path: path.clone(),
            reason: "cannot read result file".into(),
            source: Some(e.into()),
        })?;

        match InspectionReport::decode(&bytes) {
            Ok(InspectionReport::Success(payload)) => Ok(payload),
            Ok(InspectionReport::Error { message }) => Err(ExecutionError::Inspection(message)),
            Err(e) => Err(ExecutionError::ResultLoading {
                path,
                reason: e.to_string(),
                source: Some(e.into()),
            }),
        }
    }
}
