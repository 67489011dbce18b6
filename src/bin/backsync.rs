//! # Backsync CLI - Incremental backups to WebDAV
//!
//! Command-line front-end for the Backsync library.
//!
//! ## Usage
//! ```bash
//! # Write a default settings.json in the current directory
//! backsync init
//!
//! # Show what is configured and tracked
//! backsync status
//!
//! # Upload changed files once and exit
//! backsync once
//!
//! # Back up on a timer, with an interactive console on stdin
//! backsync run
//! ```

use anyhow::Context;
use backsync::{
    Coordinator, MemoryStore, PassKind, PassReport, RemoteStore, SettingsStore, SyncEngine,
    SyncSettings, WebDavStore,
};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Backsync CLI - mirror local directories to a remote store
#[derive(Parser)]
#[command(name = "backsync")]
#[command(version)]
#[command(about = "Incremental backup of local directories to a WebDAV server")]
#[command(long_about = None)]
struct Cli {
    /// Settings document (defaults to settings.json)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default settings document
    Init {
        /// Overwrite an existing document
        #[arg(short, long)]
        force: bool,
    },

    /// Show settings and tracking state
    Status,

    /// Run a single upload pass and exit
    Once {
        /// Upload into an in-memory store instead of the server
        #[arg(long)]
        dry_run: bool,
    },

    /// Back up periodically until told to quit
    Run {
        /// Upload into an in-memory store instead of the server
        #[arg(long)]
        dry_run: bool,

        /// No console; run until interrupted with Ctrl-C
        #[arg(long)]
        headless: bool,
    },
}

/// A line typed at the `run` console
#[derive(Parser)]
#[command(multicall = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand)]
enum ConsoleCommand {
    /// Set seconds between backups
    Interval {
        #[arg(allow_hyphen_values = true)]
        seconds: String,
    },

    /// Set how many passes separate two cleanings (0 disables)
    Cadence {
        #[arg(allow_hyphen_values = true)]
        passes: String,
    },

    /// Set the remote login and password
    Credentials { login: String, password: String },

    /// Start backing up a directory
    Add { dir: PathBuf },

    /// Stop backing up a directory
    Remove { dir: PathBuf },

    /// Show settings and the last pass
    Status,

    /// Stop backing up and exit
    #[command(alias = "exit")]
    Quit,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli
        .settings
        .unwrap_or_else(|| PathBuf::from(backsync::settings::DEFAULT_SETTINGS_FILE));
    let settings_store = SettingsStore::new(settings_path);

    match cli.command {
        Commands::Init { force } => cmd_init(settings_store, force),
        Commands::Status => cmd_status(settings_store),
        Commands::Once { dry_run } => cmd_once(settings_store, dry_run),
        Commands::Run { dry_run, headless } => cmd_run(settings_store, dry_run, headless),
    }
}

/// Write a default settings document
fn cmd_init(settings_store: SettingsStore, force: bool) -> anyhow::Result<()> {
    settings_store.init(force)?;

    println!("{} Initialized settings", "✓".green().bold());
    println!("  Location: {}", settings_store.path().display().to_string().cyan());
    println!("\nNext steps:");
    println!("  - Fill in {} and {} in the document", "host".yellow(), "login/pass".yellow());
    println!("  - Start backing up: {}", "backsync run".yellow());
    println!("  - Then at the prompt: {}", "add <directory>".yellow());

    Ok(())
}

/// Show settings and tracking state
fn cmd_status(settings_store: SettingsStore) -> anyhow::Result<()> {
    let settings = load_settings(&settings_store)?;
    println!("{}", "Backsync Status:".blue().bold());
    println!();
    print_settings(&settings);
    Ok(())
}

/// Run one upload pass, without the startup cleaning
fn cmd_once(settings_store: SettingsStore, dry_run: bool) -> anyhow::Result<()> {
    let settings = load_settings(&settings_store)?;
    let store = open_store(&settings, dry_run)?;
    let mut engine = SyncEngine::new(settings, settings_store, store).skip_startup_cleaning();

    println!("{}", "Backing up...".blue().bold());
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message("Scanning watched directories...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = engine.upload_pass();
    pb.finish_and_clear();

    print_report(&report);
    if engine.has_unsaved_changes() {
        engine.save().context("Backup finished but settings could not be saved")?;
    }
    Ok(())
}

/// Start the scheduler and, unless headless, the console
fn cmd_run(settings_store: SettingsStore, dry_run: bool, headless: bool) -> anyhow::Result<()> {
    let settings = load_settings(&settings_store)?;
    let store = open_store(&settings, dry_run)?;
    let coordinator = Coordinator::new(SyncEngine::new(settings, settings_store, store));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async move {
        let handle = backsync::Scheduler::new(coordinator.clone()).spawn();
        println!(
            "{} Backing up every {}",
            "✓".green().bold(),
            format_duration(coordinator.interval()).to_string().cyan()
        );

        if headless {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
        } else {
            println!("Type {} for commands.", "help".yellow());
            let console = coordinator.clone();
            tokio::task::spawn_blocking(move || console_loop(&console, dry_run))
                .await
                .context("Console stopped unexpectedly")?;
        }

        println!("{}", "Waiting for the current pass to finish...".dimmed());
        handle.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}

/// Read console commands from stdin until `quit` or end of input
fn console_loop(coordinator: &Coordinator, dry_run: bool) {
    let stdin = io::stdin();
    prompt();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            prompt();
            continue;
        }

        match ConsoleLine::try_parse_from(words) {
            Ok(ConsoleLine { command: ConsoleCommand::Quit }) => break,
            Ok(ConsoleLine { command }) => {
                if let Err(e) = apply_command(coordinator, command, dry_run) {
                    println!("{} {}", "✗".red().bold(), e.user_message());
                }
            }
            // Also covers `help`
            Err(e) => {
                let _ = e.print();
            }
        }
        prompt();
    }
}

fn prompt() {
    print!("{} ", ">".bold());
    let _ = io::stdout().flush();
}

/// Apply one console command through a configuration session
fn apply_command(
    coordinator: &Coordinator,
    command: ConsoleCommand,
    dry_run: bool,
) -> backsync::Result<()> {
    if let ConsoleCommand::Status = command {
        match coordinator.try_settings() {
            Some(settings) => print_settings(&settings),
            None => println!(
                "{}",
                "A backup is in progress; settings are shown once it finishes.".yellow()
            ),
        }
        match coordinator.last_report() {
            Some(report) => {
                println!("\n{}", "Last pass:".bold());
                print_report(&report);
            }
            None => println!("\n{}", "No pass has completed yet".dimmed()),
        }
        return Ok(());
    }

    let mut session = coordinator.open_session()?;
    match command {
        ConsoleCommand::Interval { seconds } => {
            let secs = session.set_interval(&seconds)?;
            println!(
                "{} Backing up every {} from the next pass",
                "✓".green().bold(),
                format_duration(Duration::from_secs(secs)).to_string().cyan()
            );
        }
        ConsoleCommand::Cadence { passes } => {
            match session.set_cleaning_cadence(&passes)? {
                0 => println!("{} Periodic cleaning disabled", "✓".green().bold()),
                n => println!(
                    "{} Cleaning every {} passes",
                    "✓".green().bold(),
                    n.to_string().cyan()
                ),
            }
        }
        ConsoleCommand::Credentials { login, password } => {
            session.set_credentials(&login, &password)?;
            if !dry_run {
                let settings = session.settings();
                let store =
                    WebDavStore::new(&settings.host, settings.port, &settings.login, &settings.password)?;
                session.replace_store(Arc::new(store));
            }
            println!("{} Credentials updated", "✓".green().bold());
        }
        ConsoleCommand::Add { dir } => {
            let root = session.add_root(&dir)?;
            println!("{} Watching {}", "✓".green().bold(), root.display().to_string().cyan());
        }
        ConsoleCommand::Remove { dir } => {
            let root = session.remove_root(&dir)?;
            println!("{} No longer watching {}", "✓".green().bold(), root.display().to_string().cyan());
        }
        ConsoleCommand::Status | ConsoleCommand::Quit => {}
    }
    Ok(())
}

// Helper functions

/// Load the settings document, pointing at `init` when it is missing
fn load_settings(settings_store: &SettingsStore) -> anyhow::Result<SyncSettings> {
    if !settings_store.exists() {
        anyhow::bail!(
            "No settings at {}. Run 'backsync init' first.",
            settings_store.path().display()
        );
    }
    settings_store
        .load()
        .with_context(|| format!("Cannot start without settings from {}", settings_store.path().display()))
}

/// Build the remote store described by `settings`
fn open_store(settings: &SyncSettings, dry_run: bool) -> anyhow::Result<Arc<dyn RemoteStore>> {
    if dry_run {
        println!("{}", "Dry run: uploads go to an in-memory store".yellow());
        return Ok(Arc::new(MemoryStore::new()));
    }
    if settings.host.is_empty() {
        anyhow::bail!("No remote host configured; set \"host\" in the settings document");
    }
    let store = WebDavStore::new(&settings.host, settings.port, &settings.login, &settings.password)?;
    Ok(Arc::new(store))
}

fn print_settings(settings: &SyncSettings) {
    println!("{}", "Watched directories:".bold());
    if settings.watched_roots.is_empty() {
        println!("  {}", "None".dimmed());
    }
    for root in &settings.watched_roots {
        println!("  {}", root.display().to_string().cyan());
    }

    println!("\n{}", "Schedule:".bold());
    println!("  Interval: {}", format_duration(settings.interval()));
    match settings.cleaning_cadence {
        0 => println!("  Cleaning: {}", "disabled".dimmed()),
        n => println!("  Cleaning: every {} passes", n),
    }

    println!("\n{}", "Remote:".bold());
    if settings.host.is_empty() {
        println!("  Host: {}", "not set".yellow());
    } else {
        println!("  Host: {}:{}", settings.host, settings.port);
    }
    println!("  Login: {}", settings.login);
    println!("  Tracked files: {}", settings.hash_index.len());
    println!("  Known folders: {}", settings.directory_cache.len());

    let format_time = |t: Option<chrono::DateTime<chrono::Utc>>| match t {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    };
    println!("  Last backup: {}", format_time(settings.last_backup));
    println!("  Last cleaning: {}", format_time(settings.last_cleaning));
}

fn print_report(report: &PassReport) {
    match report.kind {
        PassKind::Cleaning => {
            println!("{} Cleaned remote backup", "✓".green().bold());
        }
        PassKind::Upload => {
            let mark = if report.is_complete() {
                "✓".green().bold()
            } else {
                "!".yellow().bold()
            };
            println!("{} Backup finished", mark);
            println!("  Scanned: {}", report.files_scanned.to_string().cyan());
            println!("  Uploaded: {}", report.files_uploaded.to_string().cyan());
            println!("  Unchanged: {}", report.files_unchanged);
            if report.files_failed > 0 {
                println!("  Failed: {}", report.files_failed.to_string().red());
            }
            println!("  Size: {}", format_bytes(report.bytes_uploaded).cyan());
            if report.collections_created > 0 {
                println!("  Folders created: {}", report.collections_created);
            }
            for root in &report.pruned_roots {
                println!("  {} {} (no longer exists)", "Removed".yellow(), root.display());
            }
            for root in &report.skipped_roots {
                println!("  {} {} (name already in use)", "Skipped".yellow(), root.display());
            }
        }
    }
    println!("  Time: {}", format_duration(report.duration).to_string().cyan());
}

/// Format bytes in human-readable form
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
