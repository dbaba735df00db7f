//! Harvester — manifest archive updater CLI.
//!
//! # Usage
//!
//! ```text
//! harvester run [--update] [--users alice bob] [--app-ids 100 230]
//!               [--init-only] [--interactive] [--no-push]
//! harvester status [--json]
//! harvester accounts add <username> <password> [--two-factor SECRET]
//! harvester accounts remove <username>
//! harvester accounts list [--json]
//! ```
//!
//! The archive root defaults to the current directory and must be an
//! initialized git repository; the session bridge socket defaults to
//! `<root>/harvester-bridge.sock`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{accounts::AccountsCommand, run::RunArgs, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Keep a versioned archive of per-application content manifests up to date",
    long_about = None,
)]
struct Cli {
    /// Log filter when RUST_LOG is unset (e.g. `info`, `harvester=debug`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an update pass over the selected accounts.
    Run(RunArgs),

    /// Show per-account record status.
    Status(StatusArgs),

    /// Manage stored account credentials.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Accounts { command } => commands::accounts::run(command),
    }
}

fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
