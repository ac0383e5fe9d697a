#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI that scans one IMAP mailbox and stores its distinct senders

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use sender_scanner::paths::{DEFAULT_USERS_DIR, UserPaths};
use sender_scanner::status::{StatusKind, write_status};
use sender_scanner::{
    DEFAULT_BATCH_SIZE, ImapConfig, ScanEvent, ScanOptions, ScanReport, ScanReporter,
    SqliteStore, StoreStats, TlsMode, TracingReporter, parse_server, scan,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Senders listed in the statistics summary.
const RECENT_SENDERS: usize = 5;

#[derive(Parser)]
#[command(name = "sender-scan")]
#[command(about = "Resumable read-only scan of an IMAP mailbox for unique senders")]
struct Args {
    /// Login name (falls back to IMAP_USERNAME)
    #[arg(long)]
    user: Option<String>,

    /// Password or app password (falls back to IMAP_PASSWORD)
    #[arg(long)]
    pass: Option<String>,

    /// IMAP server as host:port
    #[arg(long, default_value = "imap.gmail.com:993")]
    server: String,

    /// Mailbox to scan
    #[arg(long, default_value = "INBOX")]
    mailbox: String,

    /// Database path (default: <users-dir>/<user>/database.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log file path (default: <users-dir>/<user>/log_<date>.txt)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Status file path (default: <users-dir>/<user>/status.txt)
    #[arg(long)]
    status: Option<PathBuf>,

    /// Messages per batch (clamped to 100..=2000)
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch: u32,

    /// Do not print per-batch progress
    #[arg(long)]
    no_progress: bool,

    /// Debug-level logging
    #[arg(long)]
    verbose: bool,

    /// Upgrade a plain connection with STARTTLS
    #[arg(long)]
    starttls: bool,

    /// Accept any server certificate
    #[arg(long)]
    insecure: bool,

    /// Output statistics and the scan report as JSON
    #[arg(long)]
    json: bool,

    /// Root of the per-user data directories
    #[arg(long, default_value = DEFAULT_USERS_DIR)]
    users_dir: PathBuf,
}

/// Logs every scan event and, unless quiet, prints it as a progress
/// line.
struct ConsoleReporter {
    log: TracingReporter,
    progress: bool,
}

impl ScanReporter for ConsoleReporter {
    fn report(&mut self, event: &ScanEvent) {
        self.log.report(event);
        if !self.progress {
            return;
        }
        match event {
            ScanEvent::StateChanged(_) => {}
            ScanEvent::Resuming {
                start_id,
                total_messages,
                previously_processed,
            } => {
                println!("Total messages: {total_messages}");
                if *start_id > 1 {
                    println!(
                        "Resuming from message {start_id} ({previously_processed} already processed)"
                    );
                }
            }
            ScanEvent::UpToDate { total_messages } => {
                println!("All {total_messages} messages already processed.");
            }
            ScanEvent::BatchStarted(batch) => {
                println!("Processing messages {batch}...");
            }
            ScanEvent::BatchCompleted(p) => {
                println!(
                    "  {} senders, {} new. {:.2}% done, elapsed {}s, remaining ~{}s",
                    p.senders_found,
                    p.new_senders,
                    p.percent(),
                    p.elapsed.as_secs(),
                    p.remaining.as_secs(),
                );
            }
            ScanEvent::BatchFailed { batch, error } => {
                println!("  Batch {batch} failed: {error}. It will be retried next run.");
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let defaults = UserPaths::new(&args.users_dir, &config.username, Local::now().date_naive());
    let db_path = args.db.clone().unwrap_or(defaults.database);
    let log_path = args.log.clone().unwrap_or(defaults.log);
    let status_path = args.status.clone().unwrap_or(defaults.status);

    if let Err(e) = init_logging(&log_path, args.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    info!(user = %config.username, server = %config.address(), "Email scanning started");
    if let Some(dir) = status_path.parent().filter(|d| !d.as_os_str().is_empty())
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        warn!(dir = %dir.display(), error = %e, "Failed to create status directory");
    }
    write_status(&status_path, StatusKind::Running, "Email scanning started");

    match run(&args, &config, &db_path).await {
        Ok(total) => {
            let message = format!("Scan complete. Found {total} unique senders.");
            info!(total_senders = total, "Scan complete");
            write_status(&status_path, StatusKind::Success, &message);
            if !args.json {
                println!("{message}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Scan failed");
            write_status(&status_path, StatusKind::Error, &format!("{e:#}"));
            eprintln!("Error: {e:#}");
            eprintln!("Progress has been saved. Run the command again to resume.");
            ExitCode::FAILURE
        }
    }
}

fn build_config(args: &Args) -> anyhow::Result<ImapConfig> {
    let username = args
        .user
        .clone()
        .or_else(|| std::env::var("IMAP_USERNAME").ok())
        .context("No user given (use --user or IMAP_USERNAME)")?;
    let password = args
        .pass
        .clone()
        .or_else(|| std::env::var("IMAP_PASSWORD").ok())
        .context("No password given (use --pass or IMAP_PASSWORD)")?;
    let (host, port) = parse_server(&args.server)?;

    Ok(ImapConfig {
        host,
        port,
        username,
        password,
        mailbox: args.mailbox.clone(),
        tls: if args.starttls {
            TlsMode::StartTls
        } else {
            TlsMode::Implicit
        },
        accept_invalid_certs: args.insecure,
    })
}

fn init_logging(path: &Path, verbose: bool) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot open log file {}", path.display()))?;

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Scan and print statistics. Returns the number of unique senders.
async fn run(args: &Args, config: &ImapConfig, db_path: &Path) -> anyhow::Result<usize> {
    let store = SqliteStore::open(db_path)
        .with_context(|| format!("Cannot open database {}", db_path.display()))?;

    let before = store.stats(RECENT_SENDERS)?;
    if !args.json {
        println!("Database: {}", db_path.display());
        print_stats("Before scan", &before);
    }

    let mut reporter = ConsoleReporter {
        log: TracingReporter,
        progress: !args.no_progress && !args.json,
    };
    let options = ScanOptions::new(args.batch);
    let report = scan(config, &store, &store, &mut reporter, &options).await?;

    let after = store.stats(RECENT_SENDERS)?;
    if args.json {
        let output = serde_json::json!({ "report": report, "stats": after });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&report);
        print_stats("After scan", &after);
    }

    Ok(after.total_senders)
}

fn print_report(report: &ScanReport) {
    println!(
        "Batches: {} completed, {} failed. New senders: {}",
        report.completed_batches,
        report.failed_batches.len(),
        report.new_senders,
    );
    for batch in &report.failed_batches {
        println!("  Failed: {batch}");
    }
}

fn print_stats(title: &str, stats: &StoreStats) {
    println!("\n--- {title} ---");
    println!("Unique senders:    {}", stats.total_senders);
    println!("Last processed id: {}", stats.checkpoint.last_processed_id);
    println!(
        "Processed:         {}/{}",
        stats.checkpoint.processed_count, stats.checkpoint.total_message_count
    );
    if let Some(rate) = stats.completion_rate {
        println!("Completion:        {:.2}%", rate * 100.0);
    }

    if !stats.recent_senders.is_empty() {
        println!("Recent senders:");
        for sender in &stats.recent_senders {
            if sender.display_name.is_empty() {
                println!("  {}", sender.email_address);
            } else {
                println!("  {} <{}>", sender.display_name, sender.email_address);
            }
        }
    }
    println!();
}
