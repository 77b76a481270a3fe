#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moulinette_common::logging::init_logging;
use moulinette_common::Config;
use std::path::PathBuf;

mod commands;

/// Moulinette - build, fetch and inspect jobs in Docker.
#[derive(Parser, Debug)]
#[command(name = "moulinette")]
#[command(version)]
#[command(about = "Run containerized inspection jobs.", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.moulinette/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the configuration
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, fetch and execute a job, then print its result
    Run {
        /// Directory holding the job sources and its blueprint
        source_dir: PathBuf,

        /// Job name, also used for the data cache key
        #[arg(long)]
        job_name: String,

        /// Request date passed to fetchers and the inspector
        #[arg(long)]
        request_date: String,

        /// Image tag for the job environment (default: derived from the job name)
        #[arg(long)]
        env_name: Option<String>,

        /// Keep the job directory after the run
        #[arg(long)]
        keep_workspace: bool,
    },

    /// Print the effective configuration
    Config,

    /// Manage the fetched data cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Drop the cached data of one job and request date
    Invalidate { job_name: String, request_date: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_and_validate(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_logging(level, &config.logging.format);

    match cli.command {
        Commands::Run {
            source_dir,
            job_name,
            request_date,
            env_name,
            keep_workspace,
        } => {
            let args = commands::RunArgs {
                source_dir,
                job_name,
                request_date,
                env_name,
                keep_workspace,
            };
            let payload = tokio::task::spawn_blocking(move || commands::run_job(config, args))
                .await
                .context("Job task panicked")??;
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }

        Commands::Cache {
            action:
                CacheCommands::Invalidate {
                    job_name,
                    request_date,
                },
        } => commands::invalidate_cache(&config, &job_name, &request_date),
    }
}
