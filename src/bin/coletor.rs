//! coletor command line
//!
//! Runs the pipeline over a JSON-lines export against the durable store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use coletor::classifier::HeuristicRecognizer;
use coletor::export::export_store;
use coletor::pipeline::{Pipeline, META_LAST_RUN_FINISHED, META_LAST_RUN_STARTED};
use coletor::source::{JsonLinesSource, RecordFilter};
use coletor::storage::{open_database, CanonicalStore, Compactable, PersistentStores, ProgressLedger};
use coletor::{EntityType, ExportFormat, PipelineConfig};

#[derive(Parser)]
#[command(author, version, about = "Canonicalize specimen collector names", long_about = None)]
struct Cli {
    /// Store directory (overrides COLETOR_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Ner {
    /// Built-in rule-based recognizer
    Heuristic,
    /// No recognizer fallback
    Off,
}

#[derive(Subcommand)]
enum Command {
    /// Process a JSON-lines file of occurrence records, then export
    Run {
        /// Newline-delimited JSON records
        #[arg(long)]
        input: PathBuf,

        /// Only process records where field=value, e.g. kingdom=Plantae
        #[arg(long)]
        filter: Option<String>,

        /// Stop after this many records
        #[arg(long)]
        max_records: Option<u64>,

        /// Records per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stage worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Report path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Report format
        #[arg(long)]
        format: Option<ExportFormat>,

        /// Recognizer consulted for low-confidence classifications
        #[arg(long, value_enum, default_value_t = Ner::Heuristic)]
        ner: Ner,

        /// Clear the store and ledger instead of resuming
        #[arg(long)]
        fresh: bool,
    },
    /// Write the canonical report from the store
    Export {
        /// Report path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Report format
        #[arg(long)]
        format: Option<ExportFormat>,
    },
    /// Merge duplicate entities left by interrupted runs
    Consolidate,
    /// Show store and ledger counts
    Stats,
    /// Clear the store and the progress ledger
    Reset,
}

fn open(config: &PipelineConfig) -> Result<Arc<PersistentStores>> {
    let stores = open_database(&config.data_dir, None)
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    Ok(Arc::new(stores))
}

fn pipeline(config: PipelineConfig, stores: &Arc<PersistentStores>) -> Result<Pipeline> {
    let pipeline = Pipeline::new(config, stores.entities.clone(), stores.ledger.clone())?
        .with_compactor(Arc::clone(stores) as Arc<dyn Compactable>);
    Ok(pipeline)
}

fn stats(stores: &PersistentStores) -> Result<()> {
    println!("Store: {}", stores.dir().display());
    println!("Entities: {}", stores.entities.count()?);
    for entity_type in EntityType::ALL {
        println!("  {entity_type}: {}", stores.entities.get_all_by_type(entity_type)?.len());
    }
    println!("Processed records: {}", stores.ledger.total_processed()?);
    match stores.ledger.latest_batch_number()? {
        Some(batch) => println!(
            "Latest batch: {batch} ({} records)",
            stores.ledger.processed_in_batch(batch)?
        ),
        None => println!("Latest batch: none"),
    }
    for key in [META_LAST_RUN_STARTED, META_LAST_RUN_FINISHED] {
        if let Some(value) = stores.ledger.get_metadata(key)? {
            println!("{key}: {value}");
        }
    }
    println!(
        "Log: {} bytes, {} snapshots",
        stores.wal_size()?,
        stores.segment_count()?
    );
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env().context("reading COLETOR_* configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Command::Run {
            input,
            filter,
            max_records,
            batch_size,
            workers,
            output,
            format,
            ner,
            fresh,
        } => {
            if let Some(n) = max_records {
                config.max_records = Some(n);
            }
            if let Some(n) = batch_size {
                config.batch_size = n;
            }
            if let Some(n) = workers {
                config.workers = n;
            }
            if let Some(path) = output {
                config.output_path = path;
            }
            if let Some(format) = format {
                config.export_format = format;
            }
            if !input.exists() {
                bail!("input file {} does not exist", input.display());
            }

            let mut source = JsonLinesSource::new(&input);
            if let Some(filter) = filter {
                source = source.with_filter(RecordFilter::parse(&filter)?);
            }

            let stores = open(&config)?;
            let mut pipeline = pipeline(config, &stores)?;
            if let Ner::Heuristic = ner {
                pipeline = pipeline.with_recognizer(Arc::new(HeuristicRecognizer::new()));
            }
            if fresh {
                pipeline.reset()?;
            } else {
                info!(
                    "resuming: {} records already processed",
                    pipeline.ledger().total_processed()?
                );
            }

            let report = pipeline.run(&source)?;
            print!("{report}");
            if report.source_error.is_some() {
                warn!("source stopped early; rerun to resume from the ledger");
            }
        }
        Command::Export { output, format } => {
            let stores = open(&config)?;
            let path = output.unwrap_or(config.output_path);
            let summary = export_store(
                stores.entities.as_ref(),
                &path,
                format.unwrap_or(config.export_format),
            )?;
            println!(
                "Exported {} entities ({} variations) to {}",
                summary.rows,
                summary.variations,
                path.display()
            );
        }
        Command::Consolidate => {
            let stores = open(&config)?;
            let merged = pipeline(config, &stores)?.consolidate()?;
            stores.compact()?;
            println!("Merged {merged} duplicate groups");
        }
        Command::Stats => {
            let stores = open(&config)?;
            stats(&stores)?;
        }
        Command::Reset => {
            let stores = open(&config)?;
            pipeline(config, &stores)?.reset()?;
            stores.compact()?;
            println!("Store and ledger cleared");
        }
    }
    Ok(())
}
