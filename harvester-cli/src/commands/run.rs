//! `harvester run` — execute one update pass.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use harvester_scheduler::{pipeline, RunOptions, RunSummary};
use harvester_session::BridgeConnector;

pub const DEFAULT_BRIDGE_SOCKET: &str = "harvester-bridge.sock";

/// Arguments for `harvester run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Archive root (an initialized git repository).
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Unix socket of the session bridge process
    /// (default: `<root>/harvester-bridge.sock`).
    #[arg(long)]
    pub bridge_socket: Option<PathBuf>,

    /// Concurrent account passes.
    #[arg(short = 'p', long, default_value_t = 8)]
    pub pool_size: usize,

    /// Login/metadata retry budget.
    #[arg(short = 'r', long, default_value_t = 3)]
    pub retries: u32,

    /// Seconds before an account may be processed again.
    #[arg(short = 't', long, default_value_t = 86_400)]
    pub cooldown: i64,

    /// Explicit accounts to process.
    #[arg(short = 'U', long = "users", num_args = 1.., value_name = "USERNAME")]
    pub users: Vec<String>,

    /// Explicit application ids; expands to their enabled owners.
    #[arg(short = 'a', long = "app-ids", num_args = 1.., value_name = "APP_ID")]
    pub app_ids: Vec<u32>,

    /// Build the work list from a staleness sweep instead of processing
    /// every account.
    #[arg(short = 'u', long)]
    pub update: bool,

    /// Fall back to an interactive prompt when a login keeps failing.
    #[arg(short = 'C', long)]
    pub interactive: bool,

    /// Bootstrap the archive branches/worktrees and exit.
    #[arg(short = 'i', long)]
    pub init_only: bool,

    /// Skip the final push of refreshed branches and tags.
    #[arg(short = 'P', long)]
    pub no_push: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let socket = self
            .bridge_socket
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_BRIDGE_SOCKET));
        let factory = Arc::new(BridgeConnector::new(socket));

        let mut options = RunOptions::new(&self.root);
        options.pool_size = self.pool_size;
        options.retry_count = self.retries;
        options.cooldown_secs = self.cooldown;
        options.users = self.users.clone();
        options.app_ids = self.app_ids.clone();
        options.update_sweep = self.update;
        options.interactive = self.interactive;
        options.init_only = self.init_only;
        options.no_push = self.no_push;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build async runtime")?;
        let summary = runtime
            .block_on(pipeline::run(options, factory))
            .context("update run failed")?;

        if self.init_only {
            println!("✓ archive initialized at '{}'", self.root.display());
            return Ok(());
        }
        print_summary(&summary);
        Ok(())
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "✓ run complete ({} processed, {} skipped, {} fetched, {} already archived, {} failed)",
        summary.processed,
        summary.skipped,
        summary.queued,
        summary.archived,
        summary.failed_depots + summary.failed_accounts,
    );
    for tag in &summary.new_tags {
        println!("  ✎  {tag}");
    }
    if summary.new_tags.is_empty() && summary.processed > 0 {
        println!("  ·  no new manifest versions");
    }
}
