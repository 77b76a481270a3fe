//! The job lifecycle: workspace, environment build, data fetch, execution.
//!
//! Each stage consumes its handle and returns the next one, so the only
//! possible order is
//! `JobWorkspace -> DataAwaitingJob -> ExecutableJob -> Payload`.
//! Stage handles borrow the workspace, which therefore outlives them and
//! owns the job directory until [`JobWorkspace::cleanup`] or drop.

mod data;
mod execute;
mod workspace;

pub use data::DataAwaitingJob;
pub use execute::ExecutableJob;
pub use workspace::JobWorkspace;

use crate::blueprint::{BlueprintLoader, ManifestLoader};
use crate::build_script::{BuildScriptGenerator, DockerfileGenerator};
use crate::error::Result;
use crate::runtime::{ContainerRuntime, DockerRuntime};
use moulinette_common::Config;
use std::path::Path;
use std::sync::Arc;

/// Where the job directory is mounted in the inspection container.
pub const CONTAINER_JOB_DIR: &str = "/moulinette/";

/// Where the fetched data is mounted in the inspection container.
pub const CONTAINER_DATA_DIR: &str = "/moulinette/rendu/";

/// Fixed inspector entrypoint run inside the job image.
pub const INSPECTOR_COMMAND: &[&str] = &["python3", "-u", "/moulinette/inspector.py"];

/// Execution context written for the inspector.
pub const CONTEXT_FILE: &str = "context.json";

/// Result produced by the inspector.
pub const RESULT_FILE: &str = "result.json";

/// Scratch directory for the inspector.
pub const WORKDIR_NAME: &str = "workdir";

/// Blueprint resources inside the job directory.
pub const RESOURCES_DIR: &str = "resources";

/// Entry point of the engine: shared configuration plus collaborators.
#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    generator: Arc<dyn BuildScriptGenerator>,
    loader: Arc<dyn BlueprintLoader>,
}

impl Engine {
    /// Engine backed by the docker CLI, Dockerfile rendering and
    /// `blueprint.json` manifests.
    pub fn new(config: Config) -> Self {
        let runtime = DockerRuntime::new(config.docker_binary.clone());
        Self {
            config: Arc::new(config),
            runtime: Arc::new(runtime),
            generator: Arc::new(DockerfileGenerator),
            loader: Arc::new(ManifestLoader::new()),
        }
    }

    pub fn with_runtime(mut self, runtime: impl ContainerRuntime + 'static) -> Self {
        self.runtime = Arc::new(runtime);
        self
    }

    pub fn with_generator(mut self, generator: impl BuildScriptGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_loader(mut self, loader: impl BlueprintLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Copy `source_dir` into a fresh job directory and load its blueprint.
    pub fn create_workspace(&self, source_dir: &Path, job_name: &str) -> Result<JobWorkspace> {
        JobWorkspace::create(self, source_dir, job_name)
    }
}
