use super::{DataAwaitingJob, Engine, RESOURCES_DIR};
use crate::blueprint::Blueprint;
use crate::build_script::{BuildScriptGenerator, BuildScriptRequest, BUILD_SCRIPT_NAME};
use crate::cache::sanitize;
use crate::error::{BoxError, JobError, Result};
use crate::reader::TimedLines;
use crate::runtime::{BuildRequest, ContainerRuntime};
use moulinette_common::Config;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use walkdir::WalkDir;

/// A job's private copy of its sources together with the loaded blueprint.
pub struct JobWorkspace {
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    generator: Arc<dyn BuildScriptGenerator>,
    job_name: String,
    job_dir: PathBuf,
    blueprint: Box<dyn Blueprint>,
    released: bool,
}

impl JobWorkspace {
    pub(super) fn create(engine: &Engine, source_dir: &Path, job_name: &str) -> Result<Self> {
        let creation_error = |reason: String, source: Option<BoxError>| JobError::WorkspaceCreation {
            job: job_name.to_string(),
            reason,
            source,
        };

        if !source_dir.is_dir() {
            return Err(creation_error(
                format!("{} is not a directory", source_dir.display()),
                None,
            ));
        }

        let root = &engine.config.root_directory;
        fs::create_dir_all(root).map_err(|e| {
            creation_error(format!("cannot create {}", root.display()), Some(e.into()))
        })?;

        let job_dir = root.join(format!("{}-{}", sanitize(job_name), Uuid::new_v4().simple()));
        fs::create_dir(&job_dir).map_err(|e| {
            creation_error(format!("cannot create {}", job_dir.display()), Some(e.into()))
        })?;

        if let Err(e) = copy_tree(source_dir, &job_dir) {
            discard(&job_dir);
            return Err(creation_error(
                format!("copying {} failed", source_dir.display()),
                Some(e.into()),
            ));
        }

        let blueprint = match engine.loader.load(&job_dir) {
            Ok(blueprint) => blueprint,
            Err(e) => {
                discard(&job_dir);
                return Err(creation_error(
                    "blueprint could not be loaded".to_string(),
                    Some(e.into()),
                ));
            }
        };

        tracing::info!(job = %job_name, dir = %job_dir.display(), "Created job workspace");
        Ok(Self {
            config: Arc::clone(&engine.config),
            runtime: Arc::clone(&engine.runtime),
            generator: Arc::clone(&engine.generator),
            job_name: job_name.to_string(),
            job_dir,
            blueprint,
            released: false,
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn resources_path(&self) -> PathBuf {
        self.job_dir.join(RESOURCES_DIR)
    }

    pub fn blueprint(&self) -> &dyn Blueprint {
        self.blueprint.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Remove the job directory.
    pub fn cleanup(mut self) -> io::Result<()> {
        self.released = true;
        tracing::debug!(job = %self.job_name, dir = %self.job_dir.display(), "Removing job workspace");
        fs::remove_dir_all(&self.job_dir)
    }

    /// Give up ownership of the job directory without removing it.
    pub fn keep(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.job_dir)
    }

    /// Render the build script and build the job image tagged `env_name`.
    ///
    /// Build output is streamed to the log without a deadline. The build
    /// script stays in the job directory when the build fails.
    pub fn build_job_environment(&self, env_name: &str) -> Result<DataAwaitingJob<'_>> {
        let build_error = |reason: String, source: Option<BoxError>| JobError::EnvironmentBuild {
            env_name: env_name.to_string(),
            reason,
            source,
        };

        let resources_path = self.resources_path();
        let script = self
            .generator
            .generate(&BuildScriptRequest {
                blueprint: self.blueprint(),
                base_image: &self.config.base_image,
                context_dir: &self.job_dir,
                resources_path: &resources_path,
            })
            .map_err(|e| build_error("build script generation failed".into(), Some(e.into())))?;

        let script_path = self.job_dir.join(BUILD_SCRIPT_NAME);
        fs::write(&script_path, script).map_err(|e| {
            build_error(format!("cannot write {}", script_path.display()), Some(e.into()))
        })?;

        tracing::info!(job = %self.job_name, env = %env_name, "Building job environment");
        let request = BuildRequest {
            context_dir: self.job_dir.clone(),
            build_script: script_path.clone(),
            tag: env_name.to_string(),
            pull: self.config.always_pull,
        };
        let mut process = self
            .runtime
            .build_image(&request)
            .map_err(|e| build_error("build could not be started".into(), Some(e.into())))?;

        if let Some(output) = process.take_output() {
            for line in TimedLines::new(output, None) {
                match line {
                    Ok(line) => tracing::debug!(env = %env_name, "{line}"),
                    Err(e) => {
                        tracing::warn!(env = %env_name, error = %e, "Lost build output");
                        break;
                    }
                }
            }
        }

        let status = process
            .wait()
            .map_err(|e| build_error("waiting for the build failed".into(), Some(e.into())))?;
        match status {
            Some(0) => {}
            Some(code) => return Err(build_error(format!("build exited with status {code}"), None)),
            None => return Err(build_error("build was terminated by a signal".into(), None)),
        }

        if let Err(e) = fs::remove_file(&script_path) {
            tracing::warn!(path = %script_path.display(), error = %e, "Failed to remove build script");
        }
        tracing::info!(job = %self.job_name, env = %env_name, "Job environment ready");
        Ok(DataAwaitingJob::new(self, env_name.to_string()))
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if !self.released {
            discard(&self.job_dir);
        }
    }
}

impl std::fmt::Debug for JobWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWorkspace")
            .field("job_name", &self.job_name)
            .field("job_dir", &self.job_dir)
            .finish_non_exhaustive()
    }
}

/// Best-effort removal of a job directory.
fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove job directory");
        }
    }
}

/// Recursively copy `source` into the existing directory `dest`.
/// Symbolic links are recreated, not followed.
fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
