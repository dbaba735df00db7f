//! `harvester status` — per-account record visibility.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use harvester_core::records::{self, StateRecords};
use harvester_store::STATE_DIR;

/// Arguments for `harvester status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Archive root.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let state_dir = self.root.join(STATE_DIR);
        let records = records::load_at(&state_dir)
            .with_context(|| format!("failed to load records from {}", state_dir.display()))?;

        if self.json {
            print_json(&records)?;
            return Ok(());
        }
        print_table(&records);
        Ok(())
    }
}

#[derive(Serialize)]
struct UserStatusJson {
    username: String,
    enabled: bool,
    owned_apps: usize,
    last_update_epoch: i64,
    last_status: Option<i32>,
}

#[derive(Serialize)]
struct StatusJson {
    accounts: usize,
    enabled: usize,
    depot_versions: usize,
    users: Vec<UserStatusJson>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "user")]
    user: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "apps")]
    apps: usize,
    #[tabled(rename = "last update")]
    last_update: String,
    #[tabled(rename = "status")]
    status: String,
}

fn print_json(records: &StateRecords) -> Result<()> {
    let users: Vec<UserStatusJson> = records
        .users
        .iter()
        .map(|(username, record)| UserStatusJson {
            username: username.clone(),
            enabled: record.enabled,
            owned_apps: record.owned_apps.len(),
            last_update_epoch: record.last_update,
            last_status: record.last_status,
        })
        .collect();
    let payload = StatusJson {
        accounts: records.accounts.len(),
        enabled: records.users.values().filter(|r| r.enabled).count(),
        depot_versions: records.depot_versions.len(),
        users,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(records: &StateRecords) {
    println!(
        "Harvester v{} | {} accounts | {} user records | {} depot versions",
        env!("CARGO_PKG_VERSION"),
        records.accounts.len(),
        records.users.len(),
        records.depot_versions.len(),
    );

    if records.users.is_empty() {
        println!("No user records yet. Run `harvester run` first.");
        return;
    }

    let rows: Vec<StatusTableRow> = records
        .users
        .iter()
        .map(|(username, record)| StatusTableRow {
            user: username.clone(),
            state: if record.enabled {
                "ENABLED".green().bold().to_string()
            } else {
                "DISABLED".red().bold().to_string()
            },
            apps: record.owned_apps.len(),
            last_update: format_age(record.last_update),
            status: record
                .last_status
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

/// Compact age of an epoch-seconds timestamp ("never", "42s", "3h", "2d").
fn format_age(epoch: i64) -> String {
    if epoch <= 0 {
        return "never".to_string();
    }
    let seconds = (Utc::now().timestamp() - epoch).max(0) as u64;
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
