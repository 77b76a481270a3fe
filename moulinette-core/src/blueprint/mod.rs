//! Blueprints: the externally authored description of what a job fetches,
//! how its environment is built and whether it needs Docker.
//!
//! The engine only sees the capability traits below. How a blueprint is
//! authored and loaded is up to a [`BlueprintLoader`]; [`ManifestLoader`]
//! reads a declarative `blueprint.json`.

mod manifest;

pub use manifest::{CommandFetcher, InstructionBuilder, ManifestLoader, MANIFEST_FILE};

use std::path::Path;

/// Everything a fetcher may touch while producing input data.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub job_name: &'a str,
    pub request_date: &'a str,
    /// Directory the fetched data must be written to
    pub delivery_path: &'a Path,
    /// The blueprint's resources directory inside the job workspace
    pub resources_path: &'a Path,
    pub job_dir: &'a Path,
}

/// Produces input data for a job.
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    /// Whether output may be reused across fetches with the same key.
    fn cacheable(&self) -> bool {
        true
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> anyhow::Result<()>;
}

/// Contributes build instructions to the job environment.
pub trait Builder: Send + Sync {
    fn name(&self) -> &str;

    /// Build-script instructions; `resources_path` is relative to the build context.
    fn instructions(&self, resources_path: &Path) -> Vec<String>;
}

/// A loaded blueprint.
pub trait Blueprint: Send + Sync {
    /// Fetchers, invoked in order.
    fn fetchers(&self) -> &[Box<dyn Fetcher>];

    /// Builders, rendered in order.
    fn builders(&self) -> &[Box<dyn Builder>];

    /// Whether the inspection container gets its own Docker daemon.
    fn allow_docker(&self) -> bool;

    /// Cached data may only be reused when every fetcher allows it.
    fn is_cacheable(&self) -> bool {
        self.fetchers().iter().all(|fetcher| fetcher.cacheable())
    }
}

/// Loads a blueprint from a job directory.
pub trait BlueprintLoader: Send + Sync {
    fn load(&self, job_dir: &Path) -> anyhow::Result<Box<dyn Blueprint>>;
}

impl<F> BlueprintLoader for F
where
    F: Fn(&Path) -> anyhow::Result<Box<dyn Blueprint>> + Send + Sync,
{
    fn load(&self, job_dir: &Path) -> anyhow::Result<Box<dyn Blueprint>> {
        self(job_dir)
    }
}

/// A blueprint assembled in memory.
#[derive(Default)]
pub struct StaticBlueprint {
    pub fetchers: Vec<Box<dyn Fetcher>>,
    pub builders: Vec<Box<dyn Builder>>,
    pub allow_docker: bool,
}

impl StaticBlueprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetchers.push(Box::new(fetcher));
        self
    }

    pub fn with_builder(mut self, builder: impl Builder + 'static) -> Self {
        self.builders.push(Box::new(builder));
        self
    }

    pub fn with_docker(mut self, allow: bool) -> Self {
        self.allow_docker = allow;
        self
    }
}

impl Blueprint for StaticBlueprint {
    fn fetchers(&self) -> &[Box<dyn Fetcher>] {
        &self.fetchers
    }

    fn builders(&self) -> &[Box<dyn Builder>] {
        &self.builders
    }

    fn allow_docker(&self) -> bool {
        self.allow_docker
    }
}
