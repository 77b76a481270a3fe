//! Declarative blueprints read from `blueprint.json`.
//!
//! ```json
//! {
//!   "allow_docker": false,
//!   "fetchers": [
//!     { "name": "submissions", "command": ["./fetch.sh"], "cacheable": true }
//!   ],
//!   "builders": [
//!     { "name": "deps", "instructions": ["RUN pip install -r {resources}/requirements.txt"] }
//!   ]
//! }
//! ```
//!
//! Fetch commands run from the job directory with `DELIVERY_PATH`,
//! `RESOURCES_PATH`, `REQUEST_DATE` and `JOB_NAME` set. `{resources}` in a
//! builder instruction is replaced by the resources path relative to the
//! build context.

use super::{Blueprint, BlueprintLoader, Builder, FetchContext, Fetcher, StaticBlueprint};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

/// Manifest file name inside the job directory.
pub const MANIFEST_FILE: &str = "blueprint.json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    allow_docker: bool,
    #[serde(default)]
    fetchers: Vec<FetcherSpec>,
    #[serde(default)]
    builders: Vec<BuilderSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FetcherSpec {
    name: String,
    command: Vec<String>,
    #[serde(default = "default_cacheable")]
    cacheable: bool,
}

fn default_cacheable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuilderSpec {
    name: String,
    #[serde(default)]
    instructions: Vec<String>,
}

/// Reject paths that would leave the job directory.
fn job_local(job_dir: &Path, raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
        bail!("'{raw}' must stay inside the job directory");
    }
    Ok(job_dir.join(path))
}

/// Runs an external command as a fetcher.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    cacheable: bool,
}

impl CommandFetcher {
    /// `command[0]` is looked up on `PATH` unless it contains a `/`, in
    /// which case it is resolved inside `job_dir`.
    pub fn new(
        name: impl Into<String>,
        job_dir: &Path,
        command: &[String],
        cacheable: bool,
    ) -> Result<Self> {
        let name = name.into();
        let Some((program, args)) = command.split_first() else {
            bail!("fetcher '{name}' has an empty command");
        };
        let program = if program.contains('/') {
            job_local(job_dir, program)?
        } else {
            PathBuf::from(program)
        };

        Ok(Self {
            name,
            program,
            args: args.to_vec(),
            cacheable,
        })
    }
}

impl Fetcher for CommandFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(ctx.job_dir)
            .env("DELIVERY_PATH", ctx.delivery_path)
            .env("RESOURCES_PATH", ctx.resources_path)
            .env("REQUEST_DATE", ctx.request_date)
            .env("JOB_NAME", ctx.job_name)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!(fetcher = %self.name, "{line}");
        }

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Emits fixed build-script instructions.
#[derive(Debug, Clone)]
pub struct InstructionBuilder {
    name: String,
    instructions: Vec<String>,
}

impl InstructionBuilder {
    pub fn new(name: impl Into<String>, instructions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            instructions,
        }
    }
}

impl Builder for InstructionBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn instructions(&self, resources_path: &Path) -> Vec<String> {
        let resources = resources_path.display().to_string();
        self.instructions
            .iter()
            .map(|line| line.replace("{resources}", &resources))
            .collect()
    }
}

/// Loads `blueprint.json` from the job directory.
#[derive(Debug, Clone, Default)]
pub struct ManifestLoader;

impl ManifestLoader {
    pub fn new() -> Self {
        Self
    }
}

impl BlueprintLoader for ManifestLoader {
    fn load(&self, job_dir: &Path) -> Result<Box<dyn Blueprint>> {
        let path = job_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let mut blueprint = StaticBlueprint::new().with_docker(manifest.allow_docker);
        for entry in manifest.fetchers {
            let fetcher = CommandFetcher::new(entry.name, job_dir, &entry.command, entry.cacheable)?;
            blueprint = blueprint.with_fetcher(fetcher);
        }
        for entry in manifest.builders {
            blueprint = blueprint.with_builder(InstructionBuilder::new(entry.name, entry.instructions));
        }

        tracing::debug!(
            fetchers = blueprint.fetchers.len(),
            builders = blueprint.builders.len(),
            allow_docker = blueprint.allow_docker,
            "Loaded blueprint manifest"
        );
        Ok(Box::new(blueprint))
    }
}
