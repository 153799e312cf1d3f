//! Datalift CLI entry point

use chrono::{Datelike, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tracing::error;

use datalift::config::{
    ExtractOptions, LoadOptions, S3Config, SourceConfig, DEFAULT_EXTRACT_WORKERS,
    DEFAULT_LOAD_WORKERS, DEFAULT_PARTS_PER_BATCH,
};
use datalift::db;
use datalift::extract::{ExtractRequest, Extractor};
use datalift::lake::{memory::MemoryStore, ObjectStore, S3Store};
use datalift::load::{Loader, RunSelection};
use datalift::registry;
use datalift::{DataliftError, Result, RunId};
use datalift_common::logging::{init_logging, LogConfig, LogLevel};

#[derive(Parser)]
#[command(
    name = "datalift",
    version,
    about = "Batch ELT: extract REST sources into bronze objects, load bronze into Postgres staging"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level to the console
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract entities from the configured source into bronze
    Extract {
        /// Entity to extract (repeatable); defaults to every registered
        /// entity of the source
        #[arg(long = "entity")]
        entities: Vec<String>,

        /// Sub-account or tenant discriminator within the source
        #[arg(long)]
        scope: Option<String>,

        /// Extraction range start (inclusive, YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["year", "this_year"])]
        start_date: Option<NaiveDate>,

        /// Extraction range end (exclusive, YYYY-MM-DD); defaults to tomorrow
        #[arg(long, conflicts_with_all = ["year", "this_year"])]
        end_date: Option<NaiveDate>,

        /// Extract one full calendar year
        #[arg(long, conflicts_with = "this_year")]
        year: Option<i32>,

        /// Extract the current calendar year (the default range)
        #[arg(long)]
        this_year: bool,

        #[arg(long, default_value_t = DEFAULT_EXTRACT_WORKERS)]
        workers: usize,

        /// Run against an in-memory store and discard the output
        #[arg(long)]
        dry_run: bool,
    },
    /// Load bronze parts into Postgres staging tables
    Load {
        /// Entity to load (repeatable); defaults to every registered entity
        #[arg(long = "entity")]
        entities: Vec<String>,

        #[arg(long)]
        scope: Option<String>,

        #[arg(long, default_value_t = DEFAULT_LOAD_WORKERS)]
        workers: usize,

        /// Bronze parts merged per transaction
        #[arg(long, default_value_t = DEFAULT_PARTS_PER_BATCH)]
        batch_size: usize,

        /// Load one specific extraction run
        #[arg(long, conflicts_with = "all_runs")]
        run_id: Option<RunId>,

        /// Load every run present in bronze instead of only the latest
        #[arg(long)]
        all_runs: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("datalift");
    let log_config = if cli.verbose {
        log_config.with_level(LogLevel::Debug)
    } else {
        log_config
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    match run(cli.command).await {
        Ok(errors) if errors == 0 => {},
        Ok(errors) => {
            eprintln!("Completed with {} failed chunk(s)/batch(es)", errors);
            process::exit(1);
        },
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            process::exit(1);
        },
    }
}

/// Execute a subcommand and return the number of permanently failed units.
async fn run(command: Commands) -> Result<u64> {
    match command {
        Commands::Extract {
            entities,
            scope,
            start_date,
            end_date,
            year,
            this_year,
            workers,
            dry_run,
        } => {
            let source = SourceConfig::from_env()?;
            source.validate()?;
            let selected = registry::select(&source.name, &entities)?;
            let (start, end) = resolve_range(start_date, end_date, year, this_year)?;

            let store: Arc<dyn ObjectStore> = if dry_run {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(S3Store::new(&S3Config::from_env()?))
            };

            let options = ExtractOptions {
                workers,
                ..ExtractOptions::default()
            };
            let extractor = Extractor::new(source, scope, store, options);
            let manifest = extractor
                .run(ExtractRequest {
                    entities: selected,
                    start,
                    end,
                })
                .await?;

            println!(
                "run {}: {} records, {} parts, {} bytes, {} request(s), {} error(s)",
                manifest.run_id,
                manifest.totals.records,
                manifest.totals.parts,
                manifest.totals.bytes,
                manifest.totals.requests,
                manifest.totals.errors
            );
            Ok(manifest.error_count())
        },
        Commands::Load {
            entities,
            scope,
            workers,
            batch_size,
            run_id,
            all_runs,
        } => {
            let source_name = SourceConfig::name_from_env()?;
            let selected = registry::select(&source_name, &entities)?;

            let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&S3Config::from_env()?));
            let pool = db::create_pool(&db::DbConfig::from_env()?.for_workers(workers)).await?;
            db::health_check(&pool).await?;

            let selection = match (run_id, all_runs) {
                (Some(run_id), _) => RunSelection::Specific(run_id),
                (None, true) => RunSelection::All,
                (None, false) => RunSelection::Latest,
            };

            let options = LoadOptions {
                workers,
                parts_per_batch: batch_size,
                ..LoadOptions::default()
            };
            let loader = Loader::new(source_name, scope, store, pool, options);
            let report = loader.run(&selected, selection).await?;

            for entity in &report.entities {
                println!(
                    "{}: {} parts, {} records, {} upserted, {} malformed, {} keyless, {} error(s)",
                    entity.entity,
                    entity.parts,
                    entity.records,
                    entity.rows_upserted,
                    entity.malformed,
                    entity.missing_key,
                    entity.errors
                );
            }
            Ok(report.error_count())
        },
    }
}

/// Turn the date flags into a half-open `[start, end)` range. The default
/// is the current calendar year up to tomorrow, so today's records are
/// always covered.
fn resolve_range(
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    year: Option<i32>,
    this_year: bool,
) -> Result<(NaiveDate, NaiveDate)> {
    let today = Utc::now().date_naive();
    let tomorrow = today + Duration::days(1);

    let from_year = |y: i32| -> Result<(NaiveDate, NaiveDate)> {
        let start = NaiveDate::from_ymd_opt(y, 1, 1)
            .ok_or_else(|| DataliftError::config(format!("invalid year: {}", y)))?;
        let year_end = NaiveDate::from_ymd_opt(y + 1, 1, 1)
            .ok_or_else(|| DataliftError::config(format!("invalid year: {}", y)))?;
        Ok((start, year_end.min(tomorrow)))
    };

    match (start_date, end_date, year, this_year) {
        (Some(start), end, None, false) => Ok((start, end.unwrap_or(tomorrow))),
        (None, Some(_), None, false) => Err(DataliftError::config(
            "--end-date requires --start-date",
        )),
        (None, None, Some(y), false) => from_year(y),
        (None, None, None, _) => from_year(today.year()),
        _ => Err(DataliftError::config(
            "date flags are mutually exclusive",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_range_passes_through() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(
            resolve_range(Some(start), Some(end), None, false).unwrap(),
            (start, end)
        );
    }

    #[test]
    fn past_year_covers_the_full_year() {
        let (start, end) = resolve_range(None, None, Some(2024), false).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn default_range_is_clipped_to_tomorrow() {
        let (start, end) = resolve_range(None, None, None, true).unwrap();
        let today = Utc::now().date_naive();
        assert_eq!(start, NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap());
        assert_eq!(end, today + Duration::days(1));
    }

    #[test]
    fn end_without_start_is_rejected() {
        let end = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(resolve_range(None, Some(end), None, false).is_err());
    }
}
