//! Nexbot CLI — entry point.
//!
//! # Commands
//!
//! - `nexbot gateway` — run the full service (bus, agent, pool, cron)
//! - `nexbot repl [-s SESSION]` — interactive chat over the bus
//! - `nexbot status` — show configuration and session-store summary
//! - `nexbot cron <list|add|remove>` — manage scheduled jobs

mod cron_cmd;
mod gateway;
mod helpers;
mod repl;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// ⚡ Nexbot — multi-channel conversational agent host
#[derive(Parser)]
#[command(name = "nexbot", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway service (all subsystems)
    Gateway {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Chat interactively over the internal bus
    Repl {
        /// Session identifier
        #[arg(short, long, default_value = "cli_default")]
        session: String,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and session-store status
    Status,

    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        action: cron_cmd::CronCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway { logs } => {
            init_logging(logs);
            gateway::run().await
        }
        Commands::Repl { session, logs } => {
            init_logging(logs);
            repl::run(&session).await
        }
        Commands::Status => {
            init_logging(false);
            status::run()
        }
        Commands::Cron { action } => {
            init_logging(false);
            cron_cmd::dispatch(action).await
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("nexbot=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
