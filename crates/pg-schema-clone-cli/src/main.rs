//! pg-schema-clone CLI - provision tenant schemas from a template schema.

use clap::{Parser, Subcommand};
use pg_schema_clone::{derive_namespace_name, CloneError, CloneReport, CloneRequest, Config, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-schema-clone")]
#[command(about = "Clone a template PostgreSQL schema into a new tenant schema")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone the template schema into a new schema
    Clone {
        /// Target schema name
        #[arg(
            long,
            required_unless_present = "tenant_name",
            conflicts_with_all = ["tenant_name", "tenant_id"]
        )]
        target: Option<String>,

        /// Tenant display name; the target is derived from it and --tenant-id
        #[arg(long, requires = "tenant_id")]
        tenant_name: Option<String>,

        /// Tenant identifier
        #[arg(long, requires = "tenant_name")]
        tenant_id: Option<String>,

        /// Override template schema
        #[arg(long)]
        source: Option<String>,
    },

    /// Print the schema name derived for a tenant
    DeriveName {
        /// Tenant display name
        #[arg(long)]
        tenant_name: String,

        /// Tenant identifier
        #[arg(long)]
        tenant_id: String,
    },

    /// Summarize the template schema's catalog
    Inspect {
        /// Override template schema
        #[arg(long)]
        source: Option<String>,
    },

    /// Test database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), CloneError> {
    let cli = Cli::parse();

    // Pure computation; no config or logging needed.
    if let Commands::DeriveName { tenant_name, tenant_id } = &cli.command {
        let name = derive_namespace_name(tenant_name, tenant_id)?;
        if cli.output_json {
            println!("{}", serde_json::json!({ "schema": name }));
        } else {
            println!("{}", name);
        }
        return Ok(());
    }

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::DeriveName { .. } => Ok(()),
        Commands::Clone {
            target,
            tenant_name,
            tenant_id,
            source,
        } => {
            let source = source.unwrap_or_else(|| config.clone.source_schema.clone());
            let request = match (target, tenant_name, tenant_id) {
                (Some(target), _, _) => CloneRequest::new(source, target)?,
                (None, Some(name), Some(id)) => CloneRequest::for_tenant(source, &name, &id)?,
                _ => {
                    return Err(CloneError::InvalidRequest(
                        "either --target or --tenant-name with --tenant-id is required".into(),
                    ))
                }
            };

            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.copy_schema(&request, cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Commands::Inspect { source } => {
            let source = source.unwrap_or_else(|| config.clone.source_schema.clone());
            let orchestrator = Orchestrator::new(config).await?;
            let summary = orchestrator.inspect(&source).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Schema: {}", summary.schema);
                println!("  Tables ({}): {}", summary.tables.len(), summary.tables.join(", "));
                println!(
                    "  Sequences ({}): {}",
                    summary.sequences.len(),
                    summary.sequences.join(", ")
                );
                println!("  Views ({}): {}", summary.views.len(), summary.views.join(", "));
                println!("  Foreign keys: {}", summary.foreign_keys);
                println!("  Secondary indexes: {}", summary.indexes);
            }
            Ok(())
        }
        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  PostgreSQL: {} ({}ms)",
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(version) = &result.server_version {
                    println!("  Server version: {}", version);
                }
                if let Some(error) = &result.error {
                    println!("  Error: {}", error);
                }
            }

            if result.connected {
                Ok(())
            } else {
                Err(CloneError::pool(
                    result.error.unwrap_or_default(),
                    "health check",
                ))
            }
        }
    }
}

fn print_report(report: &CloneReport) {
    println!(
        "Clone {} -> {}: {} in {:.1}s (run {})",
        report.source, report.target, report.state, report.duration_seconds, report.run_id
    );
    for phase in &report.phases {
        println!(
            "  {:<13} {} applied, {} skipped, {} failed",
            phase.phase.to_string(),
            phase.applied,
            phase.skipped,
            phase.failed.len()
        );
        if let Some(error) = &phase.error {
            println!("    phase error: {}", error);
        }
        for failure in &phase.failed {
            println!("    {}: {}", failure.object, failure.error);
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the running clone on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Cancelling; open transactions will be rolled back...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Cancel the running clone on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Cancelling; open transactions will be rolled back...");
            token.cancel();
        }
    });

    cancel_token
}
