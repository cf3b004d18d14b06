//! tlsbed - HTTPS test doubles for CI pipelines.
//!
//! Provisions a local CA and a certificate for a hostname, starts an HTTPS
//! echo service in Docker, waits until it answers a verified TLS request and
//! prints where to find it.
//!
//! # Usage
//!
//! ```bash
//! # Bring up https://localhost:8080 with the defaults
//! tlsbed up
//!
//! # Host networking, longer wait, outputs appended to a file
//! tlsbed up --host-network --wait-timeout 120 --outputs-file "$GITHUB_ENV"
//!
//! # Remove the container again
//! tlsbed down
//! ```
//!
//! Logs go to stderr; stdout carries only the published outputs, so
//! `tlsbed up | jq -r .serviceUrl` works.
//!
//! # Exit codes
//!
//! - `0`: service ready, outputs printed
//! - `1`: setup failed (certificates, gateway, launch, configuration)
//! - `2`: service started but never became ready; the container is left
//!   running for inspection

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::TlsbedConfig;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tlsbed_orchestrator::{ErrorKind, Orchestrator, OrchestratorError, TrustStoreKind};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for tlsbed.
#[derive(Parser, Debug)]
#[command(
    name = "tlsbed",
    about = "Bring up an HTTPS test double with a locally trusted certificate",
    version
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision certificates, start the service and wait until it is ready.
    Up(UpArgs),

    /// Remove the service container.
    Down {
        /// Container to remove (defaults to the configured name).
        #[arg(long, value_name = "NAME")]
        container_name: Option<String>,
    },

    /// Print the effective configuration and exit.
    PrintConfig,
}

/// Options of `tlsbed up`.
#[derive(Args, Debug, Default)]
pub struct UpArgs {
    /// Container name; an existing container with this name is replaced.
    #[arg(long, value_name = "NAME")]
    container_name: Option<String>,

    /// Port the service listens on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Test-double image.
    #[arg(long, value_name = "IMAGE")]
    image: Option<String>,

    /// Share the host network instead of publishing the port.
    #[arg(long)]
    host_network: bool,

    /// Seconds to wait for readiness.
    #[arg(long, value_name = "SECS")]
    wait_timeout: Option<u64>,

    /// Verbose logs and diagnostics even on success.
    #[arg(long)]
    debug: bool,

    /// Hostname the certificate is issued for.
    #[arg(long)]
    hostname: Option<String>,

    /// Directory for the CA and certificates.
    #[arg(long, value_name = "DIR")]
    cert_dir: Option<PathBuf>,

    /// Where to install the CA.
    #[arg(long, value_name = "STORE", value_parser = parse_store_kind)]
    install_ca: Option<TrustStoreKind>,

    /// Anchor directory for `--install-ca directory`.
    #[arg(long, value_name = "DIR")]
    trust_dir: Option<PathBuf>,

    /// Additional DNS name or IP for the certificate (repeatable).
    #[arg(long, value_name = "NAME")]
    extra_san: Vec<String>,

    /// Host-gateway address to publish instead of asking Docker.
    #[arg(long, value_name = "IP")]
    gateway: Option<IpAddr>,

    /// Append outputs as KEY=value lines to this file.
    #[arg(long, value_name = "FILE")]
    outputs_file: Option<PathBuf>,

    /// How to print the outputs on stdout.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
enum OutputFormat {
    /// Pretty-printed JSON object.
    #[default]
    Json,
    /// `KEY=value` lines.
    Env,
}

fn parse_store_kind(value: &str) -> std::result::Result<TrustStoreKind, String> {
    match value {
        "system" => Ok(TrustStoreKind::System),
        "directory" => Ok(TrustStoreKind::Directory),
        "none" => Ok(TrustStoreKind::None),
        other => Err(format!(
            "unknown trust store '{}' (expected system, directory or none)",
            other
        )),
    }
}

/// Initialize the tracing subscriber; logs are written to stderr.
fn init_tracing(config: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<TlsbedConfig> {
    let mut config = if let Some(ref config_path) = args.config {
        TlsbedConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        TlsbedConfig::default()
    };

    config.merge_global_args(args);
    if let Command::Up(ref up) = args.command {
        config.merge_up_args(up);
    }

    Ok(config)
}

async fn up(config: TlsbedConfig, format: OutputFormat) -> Result<()> {
    let orchestrator = Orchestrator::docker(config.run)
        .await
        .context("Failed to connect to Docker")?;

    let report = orchestrator.run().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report.outputs)?);
        }
        OutputFormat::Env => {
            for (key, value) in report.outputs.env_pairs() {
                println!("{}={}", key, value);
            }
        }
    }

    if let Some(diagnostics) = report.readiness.diagnostics {
        eprintln!("{}", diagnostics);
    }

    Ok(())
}

async fn down(config: TlsbedConfig, container_name: Option<String>) -> Result<()> {
    let orchestrator = Orchestrator::docker(config.run)
        .await
        .context("Failed to connect to Docker")?;
    orchestrator.down(container_name.as_deref()).await?;
    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let config = load_config(&args)?;

    if matches!(args.command, Command::PrintConfig) {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "tlsbed starting");

    match args.command {
        Command::Up(up_args) => up(config, up_args.format).await,
        Command::Down { container_name } => down(config, container_name).await,
        Command::PrintConfig => Ok(()),
    }
}

/// Maps a failure to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<OrchestratorError>() {
        Some(e) if e.kind() == ErrorKind::ReadinessTimeout => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "tlsbed failed");
            eprintln!("Error: {:#}", e);
            if let Some(diagnostics) = e
                .downcast_ref::<OrchestratorError>()
                .and_then(|e| e.diagnostics())
            {
                eprintln!("{}", diagnostics);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
