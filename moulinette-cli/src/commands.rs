use anyhow::{Context, Result};
use moulinette_common::Config;
use moulinette_core::cache::{cache_key, sanitize, DataCache, DirectoryCache};
use moulinette_core::{Engine, ExecutionContext, Payload};
use std::path::PathBuf;
use tracing::{info, warn};

pub struct RunArgs {
    pub source_dir: PathBuf,
    pub job_name: String,
    pub request_date: String,
    pub env_name: Option<String>,
    pub keep_workspace: bool,
}

/// Image tags must be lowercase.
pub fn default_env_name(job_name: &str) -> String {
    format!("moulinette-{}", sanitize(job_name).to_ascii_lowercase())
}

/// Run one job end to end. Blocks the calling thread.
pub fn run_job(config: Config, args: RunArgs) -> Result<Payload> {
    let cache = DirectoryCache::new(&config.cache_directory);
    let engine = Engine::new(config);
    let context = ExecutionContext::new(args.request_date.as_str());
    let env_name = args
        .env_name
        .unwrap_or_else(|| default_env_name(&args.job_name));

    let workspace = engine.create_workspace(&args.source_dir, &args.job_name)?;
    let outcome = workspace
        .build_job_environment(&env_name)
        .and_then(|job| job.fetch_data(&context, &cache))
        .and_then(|job| job.execute_job(&context));

    if args.keep_workspace {
        let dir = workspace.keep();
        info!(dir = %dir.display(), "Kept job workspace");
    } else if let Err(e) = workspace.cleanup() {
        warn!(error = %e, "Failed to remove job workspace");
    }

    outcome.map_err(|e| {
        let kind = e.kind();
        anyhow::Error::new(e).context(format!("Job {} failed ({kind})", args.job_name))
    })
}

pub fn invalidate_cache(config: &Config, job_name: &str, request_date: &str) -> Result<()> {
    let cache = DirectoryCache::new(&config.cache_directory);
    let key = cache_key(job_name, request_date);
    cache
        .invalidate(&key)
        .with_context(|| format!("Failed to invalidate cache entry {key}"))?;
    info!(key = %key, "Cache entry invalidated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names_are_valid_image_tags() {
        assert_eq!(default_env_name("TP C/1"), "moulinette-tp_c_1");
    }

    #[test]
    fn invalidate_removes_only_the_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache_directory = dir.path().to_path_buf();
        let cache = DirectoryCache::new(dir.path());
        let kept = cache.add_entry(&cache_key("tp", "b")).unwrap();
        let dropped = cache.add_entry(&cache_key("tp", "a")).unwrap();

        invalidate_cache(&config, "tp", "a").unwrap();
        assert!(!dropped.exists());
        assert!(kept.exists());

        invalidate_cache(&config, "tp", "a").unwrap();
    }
}
