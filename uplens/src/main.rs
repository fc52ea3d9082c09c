//! uplens - CLI for the usage analytics engine
//!
//! Ingests raw usage exports into the database, rebuilds rollups, and
//! prints dashboard summaries.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/uplens/usage.db (~/.local/share/uplens/usage.db)
//! - Raw exports: $XDG_DATA_HOME/uplens/raw/
//! - Logs: $XDG_STATE_HOME/uplens/uplens.log (~/.local/state/uplens/uplens.log)
//! - Config: $XDG_CONFIG_HOME/uplens/config.toml (~/.config/uplens/config.toml)

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use uplens_core::ingest::{discover_files, move_to_processed};
use uplens_core::query::{DateRange, UsageQueries};
use uplens_core::{Config, Database, DirectScanner, IngestService, RollupBuilder};

#[derive(Parser)]
#[command(name = "uplens")]
#[command(about = "Usage analytics: ingest exports, rebuild rollups, query summaries")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest export files into the database
    Ingest {
        /// Files to ingest (defaults to every file in the raw directory)
        paths: Vec<PathBuf>,

        /// Leave files in place instead of moving them to processed/
        #[arg(long)]
        keep: bool,

        /// Skip the rollup rebuild after ingesting
        #[arg(long)]
        no_rebuild: bool,
    },

    /// Rebuild all rollup tables from the detail set
    Rebuild,

    /// Print a usage summary for the recent window
    Summary {
        /// Number of days to cover
        #[arg(long, default_value = "30")]
        days: i64,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show database location and row counts
    Status,

    /// Delete all ingested data and rollups
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        uplens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("uplens starting");

    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match args.command {
        Command::Ingest {
            paths,
            keep,
            no_rebuild,
        } => cmd_ingest(&config, &db, paths, keep, no_rebuild),
        Command::Rebuild => cmd_rebuild(&config, &db),
        Command::Summary { days, json } => cmd_summary(&config, &db, days, json),
        Command::Status => cmd_status(&config, &db, &db_path),
        Command::Clear { yes } => cmd_clear(&db, yes),
    }
}

fn cmd_ingest(
    config: &Config,
    db: &Database,
    paths: Vec<PathBuf>,
    keep: bool,
    no_rebuild: bool,
) -> Result<()> {
    let files = if paths.is_empty() {
        let raw_dir = config.raw_data_dir();
        let found = discover_files(&raw_dir)?;
        if found.is_empty() {
            println!("No export files found in {}", raw_dir.display());
            return Ok(());
        }
        found
    } else {
        paths
    };

    println!("Ingesting {} file(s)", files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let svc = IngestService::new(db);
    let mut total = uplens_core::IngestReport::default();
    let mut ingested_paths = Vec::new();

    for path in &files {
        pb.set_message(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("...")
                .to_string(),
        );

        let report = svc
            .ingest_path(path)
            .with_context(|| format!("failed to ingest {}", path.display()))?;
        total.accepted += report.accepted;
        total.rejected += report.rejected;
        total.inserted += report.inserted;
        total.updated += report.updated;
        total.errors.extend(report.errors);
        ingested_paths.push(path.clone());

        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("\nIngest complete:");
    println!("  Accepted: {}", total.accepted);
    println!("  Rejected: {}", total.rejected);
    println!("  Inserted: {}", total.inserted);
    println!("  Updated:  {}", total.updated);

    if !total.errors.is_empty() {
        println!("\nErrors (first {}):", total.error_sample().len());
        for err in total.error_sample() {
            println!("  {}", err);
        }
    }

    if !no_rebuild {
        let policy = config.rollup.fallback_policy()?;
        let summary = RollupBuilder::with_policy(db, policy).rebuild_all()?;
        println!(
            "\nRollups rebuilt: {} daily, {} weekly, {} mode, {} model, {} adoption rows",
            summary.daily_usage,
            summary.weekly_usage,
            summary.chat_mode_requests,
            summary.model_usage,
            summary.agent_adoption
        );
    }

    if !keep && config.ingest.move_processed {
        let processed = config.processed_dir();
        for path in &ingested_paths {
            if let Err(e) = move_to_processed(path, &processed) {
                eprintln!("warning: could not move {}: {}", path.display(), e);
            }
        }
        println!("Moved {} file(s) to {}", ingested_paths.len(), processed.display());
    }

    tracing::info!(
        accepted = total.accepted,
        rejected = total.rejected,
        "uplens ingest complete"
    );
    Ok(())
}

fn cmd_rebuild(config: &Config, db: &Database) -> Result<()> {
    let policy = config.rollup.fallback_policy()?;
    let summary = RollupBuilder::with_policy(db, policy).rebuild_all()?;

    println!("Rollups rebuilt:");
    println!("  Daily usage:        {}", summary.daily_usage);
    println!("  Weekly usage:       {}", summary.weekly_usage);
    println!("  Chat mode requests: {}", summary.chat_mode_requests);
    println!("  Model usage:        {}", summary.model_usage);
    println!("  Agent adoption:     {}", summary.agent_adoption);
    Ok(())
}

fn cmd_summary(config: &Config, db: &Database, days: i64, json: bool) -> Result<()> {
    let policy = config.rollup.fallback_policy()?;
    let scanner = DirectScanner::with_policy(config.raw_data_dir(), policy);
    let queries = UsageQueries::new(db, &scanner);
    let range = DateRange::last_days(days);

    let stats = queries.summary(&range)?;
    let daily = queries.daily_active_users(&range)?;
    let suggestions = queries.daily_suggestions(&range)?;
    let accepted = queries.daily_accepted_suggestions(&range)?;
    let models = queries.model_distribution(&range)?;

    if json {
        let out = serde_json::json!({
            "range": { "start": range.start, "end": range.end },
            "source": if queries.uses_store()? { "store" } else { "direct-scan" },
            "summary": stats,
            "daily_active_users": daily,
            "daily_suggestions": suggestions,
            "daily_accepted_suggestions": accepted,
            "model_distribution": models,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = if queries.uses_store()? {
        "store"
    } else {
        "direct-scan"
    };
    println!("Summary {} .. {} (source: {})", range.start, range.end, source);

    if daily.is_empty() {
        println!("\nNo activity in this window.");
        return Ok(());
    }

    let peak = daily.iter().map(|p| p.value).max().unwrap_or(0);

    println!("\nActivity:");
    println!("  Active days:          {}", daily.len());
    println!("  Active users:         {}", stats.active_users);
    println!("  Peak daily users:     {}", peak);
    println!("  Total suggestions:    {}", stats.total_suggestions);
    println!("  Accepted suggestions: {}", stats.accepted_suggestions);
    if stats.total_suggestions > 0 {
        println!("  Acceptance rate:      {:.1}%", stats.acceptance_rate);
    }
    println!("  Chat requests:        {}", stats.chat_requests);
    println!("  Agent requests:       {}", stats.agent_requests);

    if !models.is_empty() {
        println!("\nModel distribution:");
        for slice in &models {
            println!("  {:<24} {:>8}  {:>5.1}%", slice.name, slice.value, slice.percentage);
        }
    }

    Ok(())
}

fn cmd_status(config: &Config, db: &Database, db_path: &PathBuf) -> Result<()> {
    let counts = db.counts()?;

    println!("Database: {}", db_path.display());
    println!("Raw dir:  {}", config.raw_data_dir().display());
    println!("\nRow counts:");
    println!("  Detail records:     {}", counts.details);
    println!("  Daily usage:        {}", counts.daily_usage);
    println!("  Weekly usage:       {}", counts.weekly_usage);
    println!("  Chat mode requests: {}", counts.chat_mode_requests);
    println!("  Model usage:        {}", counts.model_usage);
    println!("  Agent adoption:     {}", counts.agent_adoption);

    if counts.details == 0 {
        let raw_files = discover_files(&config.raw_data_dir())?;
        println!(
            "\nStore is empty; {} raw file(s) available for direct-scan queries",
            raw_files.len()
        );
    }

    Ok(())
}

fn cmd_clear(db: &Database, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to delete all data without --yes");
    }

    db.clear_all()?;
    println!("All detail records, children, and rollups deleted.");
    tracing::info!("uplens clear complete");
    Ok(())
}
