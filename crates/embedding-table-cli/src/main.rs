//! Command-line tools for persisted embedding tables.
//!
//! Inspects table files of any supported version and rewrites them in the
//! current format.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

mod commands;

use commands::{InspectCommand, MigrateCommand};

/// Inspect and migrate persisted embedding tables
#[derive(Parser)]
#[command(name = "embedding-table")]
#[command(about = "Inspect and migrate persisted embedding tables")]
#[command(long_about = r#"
Reads embedding tables saved in any of the four persisted versions.

Examples:
  # Summarize a table
  embedding-table inspect table.bin

  # Machine-readable summary with the first 20 items
  embedding-table inspect table.bin --json --show-items 20

  # Rewrite a legacy table in the current format
  embedding-table migrate old.bin new.bin --item-type u64
"#)]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, value_name = "LEVEL", global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header, shape, and items of a table file
    Inspect(InspectCommand),

    /// Rewrite a table file in the current format
    Migrate(MigrateCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.log_format)?;

    let result = match cli.command {
        Commands::Inspect(cmd) => cmd.execute(),
        Commands::Migrate(cmd) => cmd.execute(),
    };

    if let Err(e) = result {
        error!("command failed: {e}");
        for cause in e.chain().skip(1) {
            error!("  caused by: {cause}");
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for reports.
fn setup_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => subscriber.json().try_init(),
        LogFormat::Compact => subscriber.compact().try_init(),
        LogFormat::Pretty => subscriber.pretty().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}
