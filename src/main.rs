use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use grade_watch::config::DEFAULT_CONFIG_PATH;
use grade_watch::{logging, notifier, open_fetcher, Config, IdentityKey, SnapshotStore, Watcher};

#[derive(Parser)]
#[command(name = "grade-watch", version, about = "Watch a grade portal snapshot for new or changed grades")]
struct Cli {
    /// TOML config file (missing file = defaults)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the history store path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, reconcile, persist and notify (default)
    Run {
        /// Override the snapshot file
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Derive missing grade points for stored numeric grades
    FillGpa {
        #[arg(long)]
        precision: Option<u32>,
    },

    /// Show every attempt of a course and its change log
    History { course_id: String },

    /// Check the store's mapping against its change log
    Verify,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    match cli.command.unwrap_or(Command::Run { snapshot: None }) {
        Command::Run { snapshot } => {
            if let Some(snapshot) = snapshot {
                config.snapshot_path = snapshot;
            }
            run_watch(&config)
        }
        Command::FillGpa { precision } => {
            fill_gpa(&config, precision.unwrap_or(config.policy.grade_point_precision))
        }
        Command::History { course_id } => show_history(&config, &course_id),
        Command::Verify => verify(&config),
    }
}

fn run_watch(config: &Config) -> Result<ExitCode> {
    println!("🎓 Grade Watch - {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let fetcher = open_fetcher(&config.snapshot_path, config.snapshot_format);
    let channels = notifier::from_config(&config.notify);
    let store = SnapshotStore::new(&config.store_path);

    let report = Watcher::new(store, fetcher.as_ref(), &channels)
        .with_policy(config.policy.clone())
        .run()
        .context("Run aborted before the store was changed")?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for change in &report.changes {
        println!("  {}", change);
    }
    if report.anomaly_count() > 0 {
        println!("⚠️  {} stored course(s) missing from this snapshot", report.anomaly_count());
    }
    if report.first_run && report.notify.suppressed > 0 {
        println!("✓ First run: recorded {} existing grades without notifying", report.notify.suppressed);
    }
    if report.notify.skipped > 0 {
        println!("ℹ️  No notifier configured: {} change(s) recorded but not sent", report.notify.skipped);
    }
    println!("✓ {}", report.summary());

    if !report.notify.is_success() {
        for failure in &report.notify.failures {
            eprintln!("❌ {}", failure);
        }
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn fill_gpa(config: &Config, precision: u32) -> Result<ExitCode> {
    let store = SnapshotStore::new(&config.store_path);
    let mut history = store.load().context("Failed to load history store")?;

    let filled = history.backfill_grade_points(precision, Utc::now());
    if history.has_pending_changes() {
        store.save(&mut history).context("Failed to save history store")?;
    }

    println!("✓ Grade points filled: {}", filled);
    Ok(ExitCode::SUCCESS)
}

fn show_history(config: &Config, course_id: &str) -> Result<ExitCode> {
    let history = SnapshotStore::new(&config.store_path)
        .load()
        .context("Failed to load history store")?;

    let attempts = history.records_for_course(course_id);
    if attempts.is_empty() {
        println!("No records for {}", course_id);
        return Ok(ExitCode::SUCCESS);
    }

    println!("📚 {} - {} attempt(s)", attempts[0].display_name(), attempts.len());
    for record in attempts {
        println!("\n  {}", record);
        let key: IdentityKey = record.identity();
        for entry in history.log_for(&key) {
            let before = entry
                .previous
                .as_ref()
                .and_then(|p| p.grade())
                .unwrap_or("(new)");
            println!(
                "    {}  {} → {}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                before,
                entry.current.grade().unwrap_or("-")
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn verify(config: &Config) -> Result<ExitCode> {
    // load() already refuses a store whose mapping and log disagree
    let history = SnapshotStore::new(&config.store_path)
        .load()
        .context("History store failed verification")?;

    println!(
        "✓ {} records, {} log entries, mapping matches the log",
        history.len(),
        history.log().len()
    );
    Ok(ExitCode::SUCCESS)
}
