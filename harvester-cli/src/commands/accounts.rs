//! `harvester accounts` — credential management.
//!
//! Edits `accounts.json` (and optionally `twofactor.json`) in the state
//! worktree. Passwords are never printed back.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use harvester_core::records;
use harvester_store::STATE_DIR;

#[derive(Subcommand, Debug)]
pub enum AccountsCommand {
    /// Register or update an account credential.
    Add {
        username: String,
        password: String,

        /// Base64 shared secret for one-time code derivation.
        #[arg(long)]
        two_factor: Option<String>,

        /// Archive root.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Remove an account credential (its user record is kept).
    Remove {
        username: String,

        /// Archive root.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// List configured accounts and their record state.
    List {
        /// Archive root.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

pub fn run(command: AccountsCommand) -> Result<()> {
    match command {
        AccountsCommand::Add {
            username,
            password,
            two_factor,
            root,
        } => add(&root, &username, &password, two_factor.as_deref()),
        AccountsCommand::Remove { username, root } => remove(&root, &username),
        AccountsCommand::List { root } => list(&root),
    }
}

fn add(root: &Path, username: &str, password: &str, two_factor: Option<&str>) -> Result<()> {
    let state_dir = root.join(STATE_DIR);
    let mut records = records::load_at(&state_dir).context("failed to load records")?;

    let replaced = records
        .accounts
        .insert(username.to_string(), password.to_string())
        .is_some();
    records::save_accounts_at(&state_dir, &records.accounts)
        .context("failed to write account list")?;

    if let Some(secret) = two_factor {
        records
            .two_factor
            .insert(username.to_string(), secret.to_string());
        records::save_two_factor_at(&state_dir, &records.two_factor)
            .context("failed to write two-factor secrets")?;
    }

    if replaced {
        println!("✓ updated credential for '{username}'");
    } else {
        println!("✓ added account '{username}'");
    }
    Ok(())
}

fn remove(root: &Path, username: &str) -> Result<()> {
    let state_dir = root.join(STATE_DIR);
    let mut records = records::load_at(&state_dir).context("failed to load records")?;

    if records.accounts.remove(username).is_none() {
        bail!("no account named '{username}'");
    }
    records::save_accounts_at(&state_dir, &records.accounts)
        .context("failed to write account list")?;

    if records.two_factor.remove(username).is_some() {
        records::save_two_factor_at(&state_dir, &records.two_factor)
            .context("failed to write two-factor secrets")?;
    }

    println!("✓ removed account '{username}'");
    Ok(())
}

fn list(root: &Path) -> Result<()> {
    let state_dir = root.join(STATE_DIR);
    let records = records::load_at(&state_dir).context("failed to load records")?;

    if records.accounts.is_empty() {
        println!("No accounts configured. Run `harvester accounts add` first.");
        return Ok(());
    }

    for username in records.accounts.keys() {
        let state = match records.users.get(username) {
            Some(record) if !record.enabled => "DISABLED".red().bold().to_string(),
            Some(_) => "ENABLED".green().bold().to_string(),
            None => "NEW".bright_black().bold().to_string(),
        };
        let two_factor = if records.two_factor.contains_key(username) {
            " (two-factor)"
        } else {
            ""
        };
        println!("{state}  {username}{two_factor}");
    }
    Ok(())
}
