use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dedupe::cull::{self, CullMode};
use dedupe::history::{CullAction, History, RestoreSelection};
use dedupe::{
    Config, Deduper, HashKind, HashProgress, LoadErrors, ScanOptions, discover_images, without_file,
};

#[derive(Parser, Debug)]
#[command(name = "dedupe", version, about = "Find and cull near-duplicate images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Perceptual hash to compare with (dct or dhash)
    #[arg(long, global = true, value_name = "KIND")]
    hash: Option<HashKind>,

    /// Hashing worker threads (0 = one per spare core)
    #[arg(long, global = true, value_name = "N")]
    workers: Option<usize>,

    /// Config file (default: ./dedupe.toml, then the user config dir)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "dedupe=debug"
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print scan and compare results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Duplicate workflows
    Duplicates {
        #[command(subcommand)]
        command: Dups,
    },

    /// Find images that look like one target image
    Compare {
        /// Image to look for
        #[arg(short, long, value_name = "FILE")]
        target: PathBuf,
        /// Directory to search
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Work with cull history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum Dups {
    /// Find and list duplicate groups
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Move duplicates into `<dir>/duplicates`
    Cull {
        /// Directory to cull
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,
        /// Directory to move duplicates into (default: `<dir>/duplicates`)
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
    },

    /// Permanently delete duplicate images
    Delete {
        /// Directory to cull
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all cull history records
    List {
        /// Directory containing the photos
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Move culled files back (latest record by default)
    Restore {
        /// Directory containing the photos
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Restore a specific record index
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

/// Effective settings: config file values with command-line overrides applied.
struct Settings {
    kind: HashKind,
    workers: usize,
    scan: ScanOptions,
    json: bool,
    cancel: Arc<AtomicBool>,
}

/// Scan or compare output with the unreadable files listed next to it.
#[derive(Serialize)]
struct JsonOutput<'a, T: Serialize> {
    #[serde(flatten)]
    report: &'a T,
    failed: Vec<&'a Path>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_default().context("Failed to load config")?,
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging.level);

    let mut settings = Settings {
        kind: cli.hash.unwrap_or(config.hashing.kind),
        workers: cli.workers.unwrap_or(config.hashing.workers),
        scan: config.scan,
        json: cli.json,
        cancel: install_interrupt_handler()?,
    };

    match cli.command {
        Commands::Duplicates { command } => {
            // Culled copies must never be grouped with their keepers again.
            let path = match &command {
                Dups::Scan { path } | Dups::Cull { path, .. } | Dups::Delete { path } => path,
            };
            settings.scan.exclude.push(History::new(path).duplicates_dir());
            if let Dups::Cull {
                target_dir: Some(dir),
                ..
            } = &command
            {
                settings.scan.exclude.push(dir.clone());
            }
            duplicates_command(&settings, command)
        }

        Commands::Compare { target, path } => compare(&settings, &target, &path),

        Commands::History { command } => match command {
            HistoryCmd::List { path } => list_history(&path),
            HistoryCmd::Restore { path, record, all } => {
                let selection = match (record, all) {
                    (_, true) => RestoreSelection::All,
                    (Some(index), false) => RestoreSelection::Record(index),
                    (None, false) => RestoreSelection::Latest,
                };
                restore_history(&path, selection)
            }
        },
    }
}

fn duplicates_command(settings: &Settings, command: Dups) -> Result<()> {
    match command {
        Dups::Scan { path } => scan(settings, &path),
        Dups::Cull {
            path,
            dry_run,
            target_dir,
        } => {
            let target_dir = target_dir.unwrap_or_else(|| History::new(&path).duplicates_dir());
            cull_duplicates(settings, &path, CullMode::Move { target_dir, dry_run })
        }
        Dups::Delete { path } => cull_duplicates(settings, &path, CullMode::Delete),
    }
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// First Ctrl+C asks the running job to stop; a second one exits at once.
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let token = Arc::new(AtomicBool::new(false));
    let handler_token = Arc::clone(&token);
    ctrlc::set_handler(move || {
        if handler_token.swap(true, Ordering::SeqCst) {
            eprintln!("\n⚠️  Interrupted again, exiting");
            std::process::exit(130);
        }
        eprintln!("\n⚠️  Interrupt received, stopping… (press Ctrl+C again to force)");
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(token)
}

fn scan(settings: &Settings, path: &Path) -> Result<()> {
    if !settings.json {
        println!("▶ Scanning for duplicates in: {}", path.display());
    }
    let report = find_duplicates(settings, path)?;

    if settings.json {
        return print_json(&report, report.errors.as_ref());
    }

    if report.groups.is_empty() {
        println!("No duplicates found.");
    } else {
        println!(
            "Found {} duplicate group(s) covering {} file(s):",
            report.groups.len(),
            report.total
        );
        for (i, group) in report.groups.iter().enumerate() {
            println!(" Group {}:", i + 1);
            for file in group {
                println!("   ▶ {}", file.display());
            }
        }
    }
    Ok(())
}

fn cull_duplicates(settings: &Settings, path: &Path, mode: CullMode) -> Result<()> {
    match &mode {
        CullMode::Move { .. } => println!("▶ Culling duplicates in: {}", path.display()),
        CullMode::Delete => println!("▶ Deleting duplicates in: {}", path.display()),
    }
    let mut groups = find_duplicates(settings, path)?.groups;
    if groups.is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }
    cull::rank_by_age(&mut groups);

    let dry_run = matches!(mode, CullMode::Move { dry_run: true, .. });
    let history = History::new(path);

    for (i, group) in groups.iter().enumerate() {
        let record = match cull::cull_group(group, &mode) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(err) => {
                // Files handled before the failure still need a record to be
                // restorable.
                if let Some(partial) = err.partial.as_ref().filter(|_| !dry_run) {
                    history.append(partial).with_context(|| {
                        format!("Failed to write history {}", history.file().display())
                    })?;
                }
                return Err(err).with_context(|| format!("Failed to cull group {}", i + 1));
            }
        };

        println!("\n✨ Group {}:", i + 1);
        println!("   🏆 Keeping → {}", record.retained.display());
        for file in &record.culled {
            match (&record.action, &file.moved_to) {
                (CullAction::Moved, Some(dest)) if dry_run => println!(
                    "   📦 [dry-run] MOVE {} → {}",
                    file.original.display(),
                    dest.display()
                ),
                (CullAction::Moved, Some(dest)) => {
                    println!("   📦 Moved {} → {}", file.original.display(), dest.display())
                }
                _ => println!("   🗑️  Deleted {}", file.original.display()),
            }
        }

        if !dry_run {
            history
                .append(&record)
                .with_context(|| format!("Failed to write history {}", history.file().display()))?;
        }
    }

    if dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
    } else {
        println!("\n✅ Recorded cull history in {}", history.file().display());
    }
    Ok(())
}

fn compare(settings: &Settings, target: &Path, path: &Path) -> Result<()> {
    if !settings.json {
        println!(
            "▶ Looking for {} in: {}",
            target.display(),
            path.display()
        );
    }
    let candidates = without_file(scan_directory(settings, path)?, target);

    let (deduper, bar) = build_deduper(settings, candidates.len())?;
    let report = benchmark("hashing and matching", || {
        deduper.compare(settings.kind, target, &candidates)
    });
    bar.finish_and_clear();
    let report = report.with_context(|| format!("Failed to compare {}", target.display()))?;

    if settings.json {
        return print_json(&report, report.errors.as_ref());
    }

    warn_load_errors(report.errors.as_ref());
    if report.matches.is_empty() {
        println!("No matches found.");
    } else {
        println!("Found {} match(es):", report.matches.len());
        for file in &report.matches {
            println!("   ▶ {}", file.display());
        }
    }
    Ok(())
}

fn list_history(path: &Path) -> Result<()> {
    let history = History::new(path);
    let records = history
        .list()
        .with_context(|| format!("Could not read history file {}", history.file().display()))?;

    println!("🗂️  Cull History:");
    for (i, record) in records.iter().enumerate() {
        let culled: Vec<String> = record
            .culled
            .iter()
            .map(|f| f.original.display().to_string())
            .collect();
        let action = match record.action {
            CullAction::Moved => "moved",
            CullAction::Deleted => "deleted",
        };
        println!(
            "[{}] {}\n     kept: {}\n     culled: {}\n     action: {}\n",
            i,
            record.timestamp.to_rfc3339(),
            record.retained.display(),
            culled.join(", "),
            action
        );
    }
    Ok(())
}

fn restore_history(path: &Path, selection: RestoreSelection) -> Result<()> {
    let history = History::new(path);
    let summary = history
        .restore(selection)
        .with_context(|| format!("Failed to restore from {}", history.file().display()))?;

    println!(
        "🔄 Restored {} file(s), skipped {}",
        summary.restored, summary.skipped
    );
    println!(
        "🧹 Updated history, removed {} record(s)",
        summary.records - summary.kept
    );
    if summary.kept > 0 {
        println!(
            "⚠️  Kept {} record(s) whose original paths are taken again",
            summary.kept
        );
    }
    Ok(())
}

/// Recursively walk `dir`, returning the image files the config accepts.
fn scan_directory(settings: &Settings, dir: &Path) -> Result<Vec<PathBuf>> {
    let spinner = if settings.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let images = discover_images(&[dir.to_path_buf()], &settings.scan)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;

    spinner.finish_with_message(format!("Scan complete: {} image(s)", images.len()));
    Ok(images)
}

/// Deduper wired to the interrupt token and a progress bar over `total` files.
fn build_deduper(settings: &Settings, total: usize) -> Result<(Deduper, ProgressBar)> {
    let bar = if settings.json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(total as u64)
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let progress_bar = bar.clone();
    let deduper = Deduper::new()
        .with_workers(settings.workers)
        .with_cancellation_token(Arc::clone(&settings.cancel))
        .with_progress(Box::new(move |progress: HashProgress| {
            progress_bar.set_position(progress.completed as u64);
            if let Some(name) = progress.current_file.file_name() {
                progress_bar.set_message(name.to_string_lossy().into_owned());
            }
        }));
    Ok((deduper, bar))
}

fn find_duplicates(settings: &Settings, dir: &Path) -> Result<dedupe::DuplicateReport> {
    let images = scan_directory(settings, dir)?;
    if !settings.json {
        println!("▶ Parallel hashing {} images ({})…", images.len(), settings.kind);
    }

    let (deduper, bar) = build_deduper(settings, images.len())?;
    let report = benchmark("hashing and grouping", || {
        deduper.duplicates(settings.kind, &images)
    });
    bar.finish_and_clear();
    let report = report.context("Duplicate search failed")?;

    if !settings.json {
        warn_load_errors(report.errors.as_ref());
    }
    Ok(report)
}

fn warn_load_errors(errors: Option<&LoadErrors>) {
    if let Some(errors) = errors {
        eprintln!("⚠️  Skipped {} unreadable file(s):", errors.len());
        for error in errors {
            eprintln!("   ✗ {}", error);
        }
    }
}

fn print_json<T: Serialize>(report: &T, errors: Option<&LoadErrors>) -> Result<()> {
    let output = JsonOutput {
        report,
        failed: errors.map(|e| e.paths().collect()).unwrap_or_default(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
