use super::{ExecutableJob, JobWorkspace};
use crate::blueprint::FetchContext;
use crate::cache::{cache_key, DataCache};
use crate::context::ExecutionContext;
use crate::error::{JobError, Result};

/// Fetcher name reported when the cache itself fails.
const CACHE_FETCHER: &str = "cache";

/// A job whose environment image is built and whose data is still missing.
#[derive(Debug)]
pub struct DataAwaitingJob<'w> {
    workspace: &'w JobWorkspace,
    env_name: String,
}

impl<'w> DataAwaitingJob<'w> {
    pub(super) fn new(workspace: &'w JobWorkspace, env_name: String) -> Self {
        Self {
            workspace,
            env_name,
        }
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    /// Resolve the job's input data through `cache`.
    ///
    /// Fetchers run in order on a cache miss. When any fetcher is not
    /// cacheable, the entry is invalidated first so every call re-fetches.
    /// A fetcher failure leaves the entry as the fetchers left it.
    pub fn fetch_data(
        self,
        context: &ExecutionContext,
        cache: &dyn DataCache,
    ) -> Result<ExecutableJob<'w>> {
        let workspace = self.workspace;
        let job = workspace.job_name();
        let key = cache_key(job, &context.request_date);
        let cache_error = |source: std::io::Error| JobError::DataFetching {
            job: job.to_string(),
            fetcher: CACHE_FETCHER.to_string(),
            source: source.into(),
        };

        if !workspace.blueprint().is_cacheable() {
            tracing::debug!(job = %job, key = %key, "Blueprint not cacheable, invalidating entry");
            cache.invalidate(&key).map_err(cache_error)?;
        }

        if let Some(data_path) = cache.get_entry(&key) {
            tracing::info!(job = %job, key = %key, "Reusing cached data");
            return Ok(ExecutableJob::new(workspace, self.env_name, data_path));
        }

        let data_path = cache.add_entry(&key).map_err(cache_error)?;
        let resources_path = workspace.resources_path();
        let fetch_context = FetchContext {
            job_name: job,
            request_date: &context.request_date,
            delivery_path: &data_path,
            resources_path: &resources_path,
            job_dir: workspace.job_dir(),
        };

        for fetcher in workspace.blueprint().fetchers() {
            tracing::info!(job = %job, fetcher = fetcher.name(), "Fetching data");
            fetcher
                .fetch(&fetch_context)
                .map_err(|e| JobError::DataFetching {
                    job: job.to_string(),
                    fetcher: fetcher.name().to_string(),
                    source: e.into(),
                })?;
        }

        Ok(ExecutableJob::new(workspace, self.env_name, data_path))
    }
}
