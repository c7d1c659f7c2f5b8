mod analysis;
mod config;
mod export;
mod models;
mod normalizer;
mod pipeline;
mod planner;
mod sources;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::analysis::Report;
use crate::config::AppConfig;
use crate::models::{Field, SourceId};
use crate::pipeline::Pipeline;
use crate::planner::FetchPlan;
use crate::storage::{Repository, UpsertStore};

#[derive(Parser)]
#[command(name = "store-of-value", about = "Monthly BTC / S&P 500 / gold / oil / CPI price series", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the next chunk for every enabled source (or only the given ones)
    Update {
        #[arg(short, long = "source", value_enum)]
        sources: Vec<SourceId>,
    },

    /// Show the next window each source would fetch, without fetching
    Plan,

    /// Show database statistics
    Stats,

    /// Price-to-CPI ratios, returns, correlations and volatility
    Report {
        /// Number of ratio rows to print
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Write the combined monthly table as CSV
    Export {
        #[arg(short, long, default_value = "data/combined_prices.csv")]
        out: PathBuf,
    },

    /// Apply schema migrations without fetching data
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "store_of_value=info,warn",
        1 => "store_of_value=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;
    let pipeline = Pipeline::new(config.clone());

    match cli.command {
        Command::Update { sources } => {
            let _t = utils::Timer::start("Monthly update");
            let stats = pipeline.run(&sources).await?;
            info!(
                "Done: {} sources, {} months merged, {} complete, {} errors",
                stats.sources_processed, stats.months_merged, stats.complete, stats.errors
            );
        }

        Command::Plan => {
            let repo = pipeline.open_repository()?;
            for (id, stored, plan) in pipeline.preview(&repo)? {
                match plan {
                    FetchPlan::Complete => println!("  {:<8} {:>4} stored  complete", id, stored),
                    FetchPlan::Fetch(w) => println!("  {:<8} {:>4} stored  next {}", id, stored, w),
                }
            }
        }

        Command::Stats => {
            let repo = pipeline.open_repository()?;
            let months = repo.record_count()?;
            let (min, max) = repo.month_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Store of Value — Database Stats");
            println!("─────────────────────────────────");
            println!("  Months   : {}", utils::fmt_count(months as usize));
            println!("  From     : {}", utils::fmt_month(min));
            println!("  To       : {}", utils::fmt_month(max));
            for field in Field::ALL {
                println!("  {:<15}: {}", field.column(), utils::fmt_count(repo.count_non_null(field)?));
            }
            if let Some((started, status)) = repo.last_ingest_run()? {
                println!("  Last run : {} ({})", started.format("%Y-%m-%d %H:%M"), status);
            }
            println!("─────────────────────────────────");
        }

        Command::Report { limit } => {
            let repo = pipeline.open_repository()?;
            print!("{}", Report::build(&repo.records()?, limit));
        }

        Command::Export { out } => {
            let repo = pipeline.open_repository()?;
            let n = export::export_csv(&repo.records()?, &out)?;
            println!("{} months exported to {:?}", n, out);
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
