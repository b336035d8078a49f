//! # duel-cli
//!
//! CLI tool for exercising the duelsync match core.
//!
//! ## Commands
//!
//! - `simulate`: Play a bot-versus-bot match over the in-process loopback hub
//! - `check-config`: Validate a match configuration file
//!
//! ## Example
//!
//! ```bash
//! # A reproducible match with one frame in ten lost
//! duel-cli simulate --seed 7 --drop-rate 0.1
//!
//! # Check a configuration before handing it to a client
//! duel-cli check-config match.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod bot;
mod commands;

use commands::{check_config, simulate};

/// CLI tool for exercising the duelsync match core.
#[derive(Parser, Debug)]
#[command(name = "duel-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a bot-versus-bot match and report whether both sides converged
    Simulate {
        /// Seed for deck shuffles and frame loss
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Stop after this many turns
        #[arg(long, default_value = "40")]
        max_turns: u32,

        /// Fraction of frames the loopback hub drops (0.0 to 1.0)
        #[arg(long, default_value = "0.0")]
        drop_rate: f64,

        /// Match configuration file (defaults apply when omitted)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Validate a match configuration file
    CheckConfig {
        /// Path to the TOML file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Simulate {
            seed,
            max_turns,
            drop_rate,
            config,
        } => {
            simulate::run(simulate::SimulateArgs {
                seed,
                max_turns,
                drop_rate,
                config,
            })
            .await?;
        }
        Commands::CheckConfig { path } => {
            check_config::run(&path)?;
        }
    }

    Ok(())
}
