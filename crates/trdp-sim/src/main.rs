mod run;
mod summary;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use trdp_runtime::load_config;

#[derive(Parser)]
#[command(name = "trdp-sim", about = "TRDP process-data simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print interfaces, telegrams, datasets and configuration problems.
    Summary {
        /// JSON configuration file.
        config: PathBuf,
    },

    /// Open every interface and run the PD publishers/subscribers.
    Run {
        /// JSON configuration file.
        config: PathBuf,
        /// Stop after this many seconds (runs until Ctrl+C when omitted).
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Publish cycle for telegrams without a configured cycle time.
        #[arg(long, default_value = "100")]
        cycle_ms: u64,
        /// Delay between status tables in ms.
        #[arg(long, default_value = "1000")]
        status_interval_ms: u64,
        /// Transmit payload (hex) for every transmit-capable endpoint.
        #[arg(long)]
        payload: Option<String>,
        /// Fixed payload override (hex) for every transmit-capable endpoint.
        #[arg(long)]
        fixed_payload: Option<String>,
        /// Print status rows as JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Summary { config } => {
            let loaded = load_config(&config)?;
            summary::print(&loaded);
        }

        Command::Run {
            config,
            duration_secs,
            cycle_ms,
            status_interval_ms,
            payload,
            fixed_payload,
            json,
        } => {
            let loaded = load_config(&config)?;
            for problem in &loaded.errors {
                tracing::warn!("configuration: {problem}");
            }

            run::run(
                loaded.config,
                run::RunConfig {
                    duration: duration_secs.map(std::time::Duration::from_secs),
                    cycle: std::time::Duration::from_millis(cycle_ms),
                    status_interval: std::time::Duration::from_millis(status_interval_ms.max(1)),
                    payload: payload.as_deref().map(parse_hex).transpose()?,
                    fixed_payload: fixed_payload.as_deref().map(parse_hex).transpose()?,
                    json,
                },
            )
            .await?;
        }
    }

    Ok(())
}

/// Parse a hex payload, ignoring spaces and an optional `0x` prefix.
fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    hex::decode(digits).map_err(|e| anyhow::anyhow!("invalid hex payload '{s}': {e}"))
}
