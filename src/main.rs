//! Batch-Harvest main entry point
//!
//! This is the command-line interface for the batch extraction orchestrator.

use anyhow::{bail, Context};
use batch_harvest::config::{load_config_with_hash, Config, FetcherKind};
use batch_harvest::output::{generate_markdown_report, generate_report, print_statistics};
use batch_harvest::storage::ExtractionRecord;
use batch_harvest::{Harvester, SessionStatus, StartBatch};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Batch-Harvest: a durable batch extraction orchestrator
///
/// Batch-Harvest fetches a list of URLs in chunks under a bounded
/// concurrency limit, retries transient failures with exponential backoff,
/// and keeps per-URL bookkeeping in SQLite so sessions can be inspected,
/// cancelled, retried or resumed.
#[derive(Parser, Debug)]
#[command(name = "batch-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A durable batch extraction orchestrator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and check that the page fetcher is reachable
    Check,

    /// Start a batch and run it to completion
    Start {
        /// Owner of the session
        #[arg(long)]
        user: String,

        /// Page the URLs were collected from
        #[arg(long)]
        source: String,

        /// Session name
        #[arg(long)]
        name: Option<String>,

        /// URLs per chunk
        #[arg(long)]
        chunk_size: Option<u32>,

        /// Attempt budget per URL
        #[arg(long)]
        max_retries: Option<u32>,

        /// File with one URL per line
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// URLs to extract
        urls: Vec<String>,
    },

    /// Show a session's progress
    Progress {
        session_id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a session's statistics
    Details {
        session_id: String,

        /// Also list every URL with its status
        #[arg(long)]
        urls: bool,

        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel an in-progress session
    Cancel { session_id: String },

    /// Retry the failed URLs of a finished session
    Retry { session_id: String },

    /// Resume an interrupted session, or every interrupted session
    Resume { session_id: Option<String> },

    /// Delete a session and all of its rows
    Delete { session_id: String },

    /// Write a markdown report for a session
    Report {
        session_id: String,

        /// Output file (defaults to <report-dir>/<session_id>.md)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List sessions, newest first
    List {
        /// Only sessions owned by this user
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let harvester = Harvester::from_config(&config)
        .context("failed to initialize harvester")?
        .with_config_hash(config_hash);

    match cli.command {
        Command::Check => handle_check(&config, &harvester).await,
        Command::Start {
            user,
            source,
            name,
            chunk_size,
            max_retries,
            file,
            urls,
        } => {
            let urls = collect_urls(urls, file.as_deref())?;
            let session_id = harvester.start_batch(StartBatch {
                user_id: user,
                name,
                source_url: source,
                urls,
                chunk_size,
                max_retries,
            })?;
            println!("Started session {}", session_id);
            run_until_done(&harvester, &[session_id]).await
        }
        Command::Progress { session_id, json } => {
            let progress = harvester.get_progress(&session_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                println!(
                    "{}: {} ({}/{} succeeded, {} failed, {:.1}% done)",
                    progress.session_id,
                    progress.status,
                    progress.successful_urls,
                    progress.total_urls,
                    progress.failed_urls,
                    progress.progress_percent
                );
                if progress.duplicates_skipped > 0 {
                    println!(
                        "  {} duplicate URL(s) were dropped at submission",
                        progress.duplicates_skipped
                    );
                }
            }
            Ok(())
        }
        Command::Details {
            session_id,
            urls,
            json,
        } => {
            let details = harvester.get_details(&session_id, urls)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details.statistics)?);
            } else {
                println!("Session: {} ({})", details.session.name, details.session.id);
                println!("Status: {}\n", details.session.status);
                print_statistics(&details.statistics);
            }
            if let Some(rows) = &details.extractions {
                print_extractions(rows);
            }
            Ok(())
        }
        Command::Cancel { session_id } => {
            harvester.cancel(&session_id)?;
            println!("Cancelled session {}", session_id);
            Ok(())
        }
        Command::Retry { session_id } => {
            let retry_id = harvester.retry_failed(&session_id)?;
            println!("Retrying failed URLs in session {}", retry_id);
            run_until_done(&harvester, &[retry_id]).await
        }
        Command::Resume { session_id } => {
            let resumed = match session_id {
                Some(id) => {
                    let report = harvester.resume(&id)?;
                    println!(
                        "Resumed session {} ({} interrupted attempt(s) requeued, {} failed)",
                        id, report.requeued, report.failed
                    );
                    vec![id]
                }
                None => {
                    let resumed = harvester.resume_interrupted()?;
                    println!("Resumed {} session(s)", resumed.len());
                    resumed
                }
            };
            run_until_done(&harvester, &resumed).await
        }
        Command::Delete { session_id } => {
            harvester.delete(&session_id).await?;
            println!("Deleted session {}", session_id);
            Ok(())
        }
        Command::Report { session_id, output } => {
            handle_report(&config, &harvester, &session_id, output)
        }
        Command::List { user } => {
            let sessions = harvester.list_sessions(user.as_deref())?;
            if sessions.is_empty() {
                println!("No sessions found");
            }
            for session in sessions {
                println!(
                    "{}  {:<11}  {:>3}/{:<3} ok  {:>3} failed  {}  {}",
                    session.id,
                    session.status.to_string(),
                    session.successful_urls,
                    session.total_urls,
                    session.failed_urls,
                    session.started_at,
                    session.name
                );
            }
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("batch_harvest=info,warn"),
            1 => EnvFilter::new("batch_harvest=debug,info"),
            2 => EnvFilter::new("batch_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the check command: shows the configuration and checks the fetcher
async fn handle_check(config: &Config, harvester: &Harvester) -> anyhow::Result<()> {
    use batch_harvest::fetch::build_fetcher;

    println!("=== Batch-Harvest Configuration ===\n");

    println!("Batch:");
    println!("  Default chunk size: {}", config.batch.default_chunk_size);
    println!("  Default max retries: {}", config.batch.default_max_retries);
    println!("  Max URLs per batch: {}", config.batch.max_urls_per_batch);
    println!("  Workers per session: {}", config.batch.concurrency);
    println!("  Attempt timeout: {}ms", config.batch.attempt_timeout_ms);
    match config.batch.backoff_max_ms {
        Some(max) => println!(
            "  Backoff: {}ms base, capped at {}ms",
            config.batch.backoff_base_ms, max
        ),
        None => println!("  Backoff: {}ms base", config.batch.backoff_base_ms),
    }
    println!("  Retry mode: {:?}", config.batch.retry_mode);

    println!("\nFetcher: {:?}", config.fetcher.kind);
    println!("  User agent: {}", config.user_agent.header_value());
    if config.fetcher.kind == FetcherKind::Gateway {
        if let Some(gateway) = &config.gateway {
            println!("  Gateway: {}", gateway.base_url);
            println!(
                "  Gateway timeout: {}ms, {} attempt(s)",
                gateway.timeout_ms, gateway.max_retries
            );
        }
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Reports: {}", config.output.report_dir);

    let in_progress = harvester
        .list_sessions(None)?
        .into_iter()
        .filter(|s| s.status == SessionStatus::InProgress)
        .count();
    if in_progress > 0 {
        println!("\n{} session(s) in progress (see `resume`)", in_progress);
    }

    println!("\n✓ Configuration is valid");

    let fetcher = build_fetcher(config)?;
    match fetcher.ready().await {
        Ok(()) => println!("✓ {} fetcher is ready", fetcher.name()),
        Err(e) => bail!("{} fetcher is not ready: {}", fetcher.name(), e),
    }

    Ok(())
}

/// Handles the report command: writes a markdown session report
fn handle_report(
    config: &Config,
    harvester: &Harvester,
    session_id: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(|| {
        Path::new(&config.output.report_dir).join(format!("{}.md", session_id))
    });

    tracing::info!("Loading session {} from database...", session_id);
    let report = harvester
        .storage()
        .with(|s| Ok(generate_report(&*s, session_id)))??;

    tracing::info!("Generating markdown report...");
    generate_markdown_report(&report, &path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("✓ Report written to: {}", path.display());
    Ok(())
}

/// Waits for sessions to finish; Ctrl-C stops workers but keeps them resumable
async fn run_until_done(harvester: &Harvester, session_ids: &[String]) -> anyhow::Result<()> {
    let wait_all = async {
        let mut results = Vec::new();
        for id in session_ids {
            results.push((id.clone(), harvester.wait(id).await));
        }
        results
    };

    tokio::select! {
        results = wait_all => {
            for (id, result) in results {
                let status = result.with_context(|| format!("session {} aborted", id))?;
                let progress = harvester.get_progress(&id)?;
                println!(
                    "Session {} {}: {}/{} succeeded, {} failed",
                    id,
                    status,
                    progress.successful_urls,
                    progress.total_urls,
                    progress.failed_urls
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping workers (sessions stay resumable)");
            harvester.shutdown().await;
        }
    }

    Ok(())
}

/// Reads URLs from arguments and an optional file, skipping blanks and `#` comments
fn collect_urls(mut urls: Vec<String>, file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        urls.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    Ok(urls)
}

fn print_extractions(rows: &[ExtractionRecord]) {
    println!("URLs:");
    for row in rows {
        let detail = match (&row.error_type, row.http_status) {
            (Some(error), Some(status)) => format!(" [{} / HTTP {}]", error, status),
            (Some(error), None) => format!(" [{}]", error),
            (None, Some(status)) => format!(" [HTTP {}]", status),
            (None, None) => String::new(),
        };
        println!(
            "  #{}.{} {} {} ({} attempt(s)){}",
            row.chunk_number, row.position_in_chunk, row.status, row.url, row.attempt_count, detail
        );
    }
}
