//! dwin CLI - drive and inspect the deduplicating sliding window.

use anyhow::Result;
use clap::{Parser, Subcommand};
use dwin_core::config::{LogFormat, LogLevel};
use dwin_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, unparsable TOML)
    ConfigError = 1,
    /// Window error (closed window, queue capacity breach)
    WindowError = 2,
    /// Worker pool error
    DispatchError = 3,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Convert an error to an exit code, by type where possible and by
    /// message otherwise.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(err) = error.downcast_ref::<dwin_core::Error>() {
            return match err {
                dwin_core::Error::Config(_) | dwin_core::Error::Serialization(_) => {
                    ExitCode::ConfigError
                }
                dwin_core::Error::Window(_) => ExitCode::WindowError,
                dwin_core::Error::Dispatch(_) => ExitCode::DispatchError,
                dwin_core::Error::Io(_) => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("interrupted") {
            ExitCode::SignalInterrupt
        } else if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "dwin")]
#[command(about = "Deduplicating sliding window CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,

    /// Push a synthetic burst of events through a window and report
    Simulate {
        /// Number of distinct keys in the burst
        #[arg(long, default_value_t = 100)]
        keys: usize,

        /// Total number of events to add
        #[arg(long, default_value_t = 1000)]
        events: usize,

        /// Fraction of events that repeat the previous key (0.0 - 1.0)
        #[arg(long, default_value_t = 0.5)]
        duplicate_ratio: f64,

        /// Time each callback takes, in milliseconds
        #[arg(long, default_value_t = 0)]
        listen_delay_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as TOML
    Defaults,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Try to load config for log settings (optional - falls back to defaults)
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_directive()),
            1 => EnvFilter::new(LogLevel::Debug.as_directive()),
            _ => EnvFilter::new(LogLevel::Trace.as_directive()),
        }
    };

    // Logs go to stderr so command output stays machine readable
    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    let result = execute_command(cli).await;

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            // Log the error
            tracing::error!(error = %e, "Command failed");

            // Determine appropriate exit code
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Validate => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from("dwin.toml"));
            commands::validate::run(&path)?;
        }

        Commands::Simulate {
            keys,
            events,
            duplicate_ratio,
            listen_delay_ms,
            json,
        } => {
            let config = load_config(&cli.config)?;
            let options = commands::simulate::SimulateOptions {
                keys,
                events,
                duplicate_ratio,
                listen_delay_ms,
                json,
            };
            commands::simulate::run(config, options).await?;
        }

        Commands::Defaults => {
            print!("{}", Config::default().to_toml()?);
        }
    }

    Ok(())
}

/// Load the config file if one was given, defaults otherwise.
fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}
