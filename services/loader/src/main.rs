//! Ward data loader
//!
//! Reads the ward CSV exports, normalizes them and loads the relational
//! schema.
//!
//! Commands:
//! - migrate            create the schema
//! - load               run the pipeline (append mode)
//! - check [--strict]   run the consistency checker
//! - import <dir>       load every CSV in a directory as its own table

mod check;
mod config;
mod election;
mod error;
mod import;
mod mapper;
mod model;
mod normalize;
mod pipeline;
mod reader;
mod schema;
mod store;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::store::Store;

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads Calgary ward datasets into Postgres")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the normalized schema (idempotent)
    Migrate,

    /// Read, normalize and load every dataset
    Load {
        /// Empty every pipeline table first
        #[arg(long, default_value = "false")]
        truncate: bool,

        /// Apply the schema before loading
        #[arg(long, default_value = "false")]
        migrate: bool,

        /// Map everything but write nothing
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Check a loaded database for consistency (advisory)
    Check {
        /// Exit non-zero when the check finds issues
        #[arg(long, default_value = "false")]
        strict: bool,
    },

    /// Replace-mode import of every CSV in a directory
    Import {
        /// Directory holding the CSV files
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    match args.command {
        Command::Migrate => {
            let store = Store::connect(&config).await?;
            store.migrate().await.context("Failed to apply schema")?;
            store.close().await;
            println!("Schema ready");
        }

        Command::Load {
            truncate,
            migrate,
            dry_run,
        } => {
            let datasets = config.datasets()?;
            info!(
                version = %datasets.version,
                data_dir = %config.data_dir.display(),
                dry_run,
                "starting load"
            );

            let report = if dry_run {
                Pipeline::new(&config, &datasets, None).run().await
            } else {
                let store = Store::connect(&config).await?;
                if migrate {
                    store.migrate().await.context("Failed to apply schema")?;
                }
                if truncate {
                    store.truncate().await.context("Failed to truncate tables")?;
                }
                let report = Pipeline::new(&config, &datasets, Some(&store)).run().await;
                store.close().await;
                report
            };

            println!("{}", report);
            if report.has_critical_failure() {
                bail!("Load failed: a ward or election table did not load");
            }
        }

        Command::Check { strict } => {
            let datasets = config.datasets()?;
            let store = Store::connect(&config).await?;
            let report = check::run_checks(store.pool(), datasets.ward_count).await;
            store.close().await;
            println!("{}", report);
            if report.blocks(strict) {
                bail!("Consistency check failed");
            }
        }

        Command::Import { dir } => {
            let store = Store::connect(&config).await?;
            let outcomes = import::import_dir(store.pool(), &dir)
                .await
                .with_context(|| format!("Failed to import {}", dir.display()))?;
            store.close().await;

            println!("=== Import ===");
            for outcome in &outcomes {
                println!("  {}", outcome);
            }
            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            println!("{} files, {} failed", outcomes.len(), failed);
            if failed > 0 {
                bail!("{} of {} files failed to import", failed, outcomes.len());
            }
        }
    }

    Ok(())
}
