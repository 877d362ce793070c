use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use momo_etl::{
    logging, read_entries, recategorize, write_messages, Categorizer, Category, ExportFormat,
    MessageQuery, Pipeline, PipelineConfig, RunSummary, SqliteStore,
};

#[derive(Parser)]
#[command(name = "momo-etl")]
#[command(about = "Mobile-money SMS export ETL: parse, normalize, categorize, load")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true, env = "MOMO_ETL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run XML files (or directories of *.xml files) through the pipeline
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Re-classify every stored message with the current rules
    Recategorize {
        /// JSON rules file to use instead of the configured rules
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Show dead-lettered records
    DeadLetters {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Re-drive dead-lettered records through the pipeline
    Replay,
    /// Dump stored messages
    Export {
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        #[arg(long)]
        category: Option<Category>,
        /// Inclusive, YYYY-MM-DD
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Inclusive, YYYY-MM-DD
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Totals and per-category distribution of stored messages
    Stats {
        /// Inclusive, YYYY-MM-DD
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Inclusive, YYYY-MM-DD
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Show recent run summaries
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let _guard = logging::init_logging(&config.log_dir, cli.verbose)?;

    match cli.command {
        Commands::Ingest { paths } => run_ingest(config, &paths),
        Commands::Recategorize { rules } => run_recategorize(&config, rules.as_deref()),
        Commands::DeadLetters { limit } => run_dead_letters(&config, limit),
        Commands::Replay => run_replay(config),
        Commands::Export {
            format,
            category,
            start_date,
            end_date,
            skip,
            limit,
            output,
        } => {
            let query = MessageQuery {
                skip,
                limit,
                category,
                start_date,
                end_date,
                ..MessageQuery::default()
            };
            run_export(&config, &query, format, output.as_deref())
        }
        Commands::Stats {
            start_date,
            end_date,
        } => run_stats(&config, start_date, end_date),
        Commands::Runs { limit } => run_runs(&config, limit),
    }
}

/// Directories expand to their *.xml files in name order
fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut xml_files: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("Failed to read directory: {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .map_or(false, |ext| ext.eq_ignore_ascii_case("xml"))
                })
                .collect();
            xml_files.sort();
            files.extend(xml_files);
        } else {
            files.push(path.clone());
        }
    }

    Ok(files)
}

fn print_summaries(summaries: &[RunSummary]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for summary in summaries {
        serde_json::to_writer(&mut out, summary)?;
        writeln!(out)?;
    }
    Ok(())
}

fn exit_on_failure(summaries: &[RunSummary]) {
    let failed = summaries.iter().filter(|s| s.is_failed()).count();
    if failed > 0 {
        eprintln!("❌ {} of {} run(s) failed", failed, summaries.len());
        std::process::exit(1);
    }
}

fn run_ingest(config: PipelineConfig, paths: &[PathBuf]) -> Result<()> {
    let files = expand_inputs(paths)?;
    if files.is_empty() {
        eprintln!("⚠️  No XML files found");
        return Ok(());
    }

    let mut pipeline = Pipeline::open(config)?;
    info!(files = files.len(), "starting ingest");

    let summaries: Vec<RunSummary> = files.iter().map(|file| pipeline.run_file(file)).collect();
    print_summaries(&summaries)?;

    let sink = pipeline.sink();
    if sink.write_failures() > 0 {
        eprintln!(
            "⚠️  {} dead-letter entr(ies) could not be written to {}",
            sink.write_failures(),
            sink.path().display()
        );
    }

    exit_on_failure(&summaries);
    Ok(())
}

fn run_recategorize(config: &PipelineConfig, rules: Option<&Path>) -> Result<()> {
    let categorizer = match rules {
        Some(path) => Categorizer::from_file(path)?,
        None => Categorizer::from_rules(config.rules.clone())?,
    };

    let mut store = SqliteStore::open(&config.database_path)?;
    let summary = recategorize(&mut store, &categorizer)?;

    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn run_dead_letters(config: &PipelineConfig, limit: usize) -> Result<()> {
    let entries = read_entries(&config.dead_letter_path())?;
    let start = entries.len().saturating_sub(limit);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in &entries[start..] {
        serde_json::to_writer(&mut out, entry)?;
        writeln!(out)?;
    }

    eprintln!("📮 {} dead-lettered record(s) in total", entries.len());
    Ok(())
}

fn run_replay(config: PipelineConfig) -> Result<()> {
    let entries = read_entries(&config.dead_letter_path())?;
    if entries.is_empty() {
        eprintln!("✓ Nothing to replay");
        return Ok(());
    }

    let mut pipeline = Pipeline::open(config)?;
    let summaries = pipeline.replay(entries);
    print_summaries(&summaries)?;

    exit_on_failure(&summaries);
    Ok(())
}

fn run_export(
    config: &PipelineConfig,
    query: &MessageQuery,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let messages = store.query_messages(query)?;

    match output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("Failed to create export file: {}", path.display()))?;
            write_messages(io::BufWriter::new(file), &messages, format)?;
            eprintln!("✓ Exported {} message(s) to {}", messages.len(), path.display());
        }
        None => write_messages(io::stdout().lock(), &messages, format)?,
    }

    Ok(())
}

fn run_stats(
    config: &PipelineConfig,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let stats = store.database_stats(start_date, end_date)?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_runs(config: &PipelineConfig, limit: usize) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    print_summaries(&store.recent_runs(limit)?)
}
