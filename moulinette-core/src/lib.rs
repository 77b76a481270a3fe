//! Moulinette Core - containerized job execution engine.
//!
//! This crate provides:
//! - The job lifecycle: workspace, environment build, data fetch, execution
//! - Deadline-bounded line readers over process output
//! - Secondary Docker daemons for blueprints that need Docker
//! - The data cache and the inspection result codec
//! - Default collaborators (docker CLI runtime, Dockerfile rendering, JSON manifests)

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod blueprint;
pub mod build_script;
pub mod cache;
pub mod context;
pub mod daemon;
pub mod error;
pub mod job;
pub mod reader;
pub mod result;
pub mod runtime;

pub use blueprint::{Blueprint, BlueprintLoader, Builder, FetchContext, Fetcher, StaticBlueprint};
pub use cache::{DataCache, DirectoryCache};
pub use context::ExecutionContext;
pub use error::{CodecError, DaemonError, ExecutionError, JobError, LineReadError, Result};
pub use job::{DataAwaitingJob, Engine, ExecutableJob, JobWorkspace};
pub use result::{InspectionReport, Payload, Scope};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::blueprint::{Blueprint, Fetcher, StaticBlueprint};
    pub use crate::cache::{DataCache, DirectoryCache};
    pub use crate::context::ExecutionContext;
    pub use crate::error::{JobError, Result};
    pub use crate::job::Engine;
    pub use crate::result::Payload;
}
