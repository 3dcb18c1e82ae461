//! schema-replicator CLI - mirror a MySQL/MariaDB schema onto replicas.

use clap::{Parser, Subcommand};
use schema_replicator::{Config, ReplicateError, ReplicationReport, Replicator, TargetStatus};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "schema-replicator")]
#[command(about = "Replicate database schemas from a source of truth onto target servers")]
#[command(version)]
struct Cli {
    /// Path to the connections file (JSON or YAML)
    #[arg(short, long, default_value = "config/connections.json")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate the source schema onto every target
    Run {
        /// Dry run: compute and show the DDL plan without applying it
        #[arg(long)]
        dry_run: bool,

        /// Process targets one at a time instead of concurrently
        #[arg(long)]
        sequential: bool,
    },

    /// Discover the source catalog and print tables in dependency order
    Discover,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, ReplicateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format, cli.log_file.as_deref())?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            dry_run,
            sequential,
        } => {
            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler()?;

            let mut replicator = Replicator::new(config).with_dry_run(dry_run);
            if sequential {
                replicator = replicator.with_parallel_targets(false);
            }

            let report = replicator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }

            if report.was_cancelled() {
                return Err(ReplicateError::Cancelled);
            }
            if !report.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Discover => {
            let databases = Replicator::new(config).discover().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&databases)?);
            } else {
                println!("Source catalog (dependency order):");
                for database in &databases {
                    println!("  {} ({} tables)", database.name, database.tables.len());
                    for (idx, table) in database.tables.iter().enumerate() {
                        println!("    {:>3}. {}", idx + 1, table);
                    }
                }
            }
        }

        Commands::HealthCheck => {
            let results = Replicator::new(config).health_check().await?;
            let healthy = results.iter().all(|r| r.healthy);

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("Health Check Results:");
                for result in &results {
                    match result.latency_ms {
                        Some(ms) => println!("  {} {}: OK ({}ms)", result.role, result.label, ms),
                        None => println!("  {} {}: FAILED", result.role, result.label),
                    }
                    if let Some(ref err) = result.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(ReplicateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &ReplicationReport) {
    let status_msg = if report.dry_run {
        "Dry run completed!"
    } else {
        "Replication completed!"
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Source: {} databases, {} tables",
        report.databases, report.tables
    );

    for target in &report.targets {
        let status = match target.status {
            TargetStatus::Completed => "completed",
            TargetStatus::Skipped => "SKIPPED",
            TargetStatus::Cancelled => "cancelled",
        };
        if report.dry_run {
            println!(
                "  {}: {} ({} operations planned)",
                target.target,
                status,
                target.planned.len()
            );
            for planned in &target.planned {
                println!("    {}: {}", planned.database, planned.operation);
            }
        } else {
            println!(
                "  {}: {} ({} applied, {} failed)",
                target.target, status, target.operations_applied, target.operations_failed
            );
        }
        if let Some(ref err) = target.error {
            println!("    Error: {}", err);
        }
        for failure in &target.failures {
            println!(
                "    Failed {}.{}: {}: {}",
                failure.database, failure.table, failure.operation, failure.cause
            );
        }
    }
}

fn setup_logging(verbosity: &str, format: &str, log_file: Option<&Path>) -> Result<(), ReplicateError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG, when set, takes precedence over --verbosity
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = subscriber.with_ansi(false).with_writer(Mutex::new(file));
            if format == "json" {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
        }
        None if format == "json" => subscriber.json().init(),
        None => subscriber.init(),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
/// Cancellation takes effect between tables; a DDL statement in flight completes.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, ReplicateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Finishing the current table and stopping...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Finishing the current table and stopping...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, ReplicateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current table and stopping...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
