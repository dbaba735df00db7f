//! Run pipeline — the top-level driver.
//!
//! Builds the user work list (explicit selection, app-id expansion, or the
//! staleness sweep), fans account passes out over a bounded pool, and
//! persists state at the end: record flush, state-branch commit, and an
//! optional push. An external interrupt aborts the whole batch and is
//! propagated, never absorbed; any single account failing is logged and does
//! not stop its siblings.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use harvester_core::records;
use harvester_core::state::SharedState;
use harvester_core::types::AppId;
use harvester_detector::detect_stale_users;
use harvester_session::ports::SessionFactory;
use harvester_store::VersionStore;

use crate::error::{join_err, SchedulerError};
use crate::scheduler::{FetchScheduler, SchedulerConfig, UserOutcome};

/// Configuration surface for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Archive root (an initialized git repository).
    pub root: PathBuf,
    /// Concurrent account passes.
    pub pool_size: usize,
    pub retry_count: u32,
    pub cooldown_secs: i64,
    /// Explicit user selection.
    pub users: Vec<String>,
    /// Explicit application selection; expands to the enabled owners.
    pub app_ids: Vec<u32>,
    /// Run the staleness sweep to build the work list.
    pub update_sweep: bool,
    pub interactive: bool,
    /// Bootstrap branches/worktrees and exit.
    pub init_only: bool,
    pub no_push: bool,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pool_size: 8,
            retry_count: 3,
            cooldown_secs: 86_400,
            users: Vec::new(),
            app_ids: Vec::new(),
            update_sweep: false,
            interactive: false,
            init_only: false,
            no_push: false,
        }
    }
}

/// What one run did, for logging and the CLI summary.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub selected_users: Vec<String>,
    pub processed: usize,
    pub skipped: usize,
    pub queued: usize,
    pub archived: usize,
    pub failed_depots: usize,
    pub failed_accounts: usize,
    pub new_tags: Vec<String>,
}

/// Run the full update pipeline.
pub async fn run(
    options: RunOptions,
    factory: Arc<dyn SessionFactory>,
) -> Result<RunSummary, SchedulerError> {
    let root = options.root.clone();
    let store = tokio::task::spawn_blocking(move || VersionStore::open(&root))
        .await
        .map_err(join_err)??;
    let state_dir = store.state_dir();

    if options.init_only {
        info!("archive initialized; exiting (init-only mode)");
        return Ok(RunSummary::default());
    }

    let state = SharedState::new(records::load_at(&state_dir)?);
    let store = Arc::new(StdMutex::new(store));

    let selected = select_users(&options, &state, factory.as_ref()).await?;
    info!(users = selected.len(), "user work list built");

    let scheduler = Arc::new(FetchScheduler::new(
        state.clone(),
        store.clone(),
        factory.clone(),
        SchedulerConfig {
            retry_count: options.retry_count,
            cooldown_secs: options.cooldown_secs,
            interactive: options.interactive,
            app_filter: if options.app_ids.is_empty() {
                None
            } else {
                Some(options.app_ids.iter().copied().collect())
            },
        },
    ));

    let semaphore = Arc::new(Semaphore::new(options.pool_size.max(1)));
    let mut passes: JoinSet<(String, Result<UserOutcome, SchedulerError>)> = JoinSet::new();
    for username in &selected {
        let Some(password) = state.password_of(username) else {
            warn!(user = %username, "no credentials on file; skipping");
            continue;
        };
        let scheduler = scheduler.clone();
        let semaphore = semaphore.clone();
        let username = username.clone();
        passes.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let err = SchedulerError::Join("account pool closed".to_string());
                    return (username, Err(err));
                }
            };
            let outcome = scheduler.process_user(&username, &password).await;
            (username, outcome)
        });
        tokio::task::yield_now().await;
    }

    let mut summary = RunSummary {
        selected_users: selected.iter().cloned().collect(),
        ..RunSummary::default()
    };
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received; aborting run");
                passes.abort_all();
                return Err(SchedulerError::Interrupted);
            }
            next = passes.join_next() => {
                let Some(joined) = next else { break };
                match joined {
                    Ok((username, Ok(outcome))) => tally(&mut summary, &username, outcome),
                    Ok((username, Err(err))) => {
                        error!(user = %username, error = %err, "account pass failed");
                        summary.failed_accounts += 1;
                    }
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        error!(error = %err, "account pass panicked");
                        summary.failed_accounts += 1;
                    }
                }
            }
        }
    }

    // Persist: record flush, state commit, optional push.
    records::save_at(&state_dir, &state.snapshot())?;
    let no_push = options.no_push;
    let store_for_flush = store.clone();
    summary.new_tags = tokio::task::spawn_blocking(move || -> Result<Vec<String>, SchedulerError> {
        let mut store = store_for_flush.lock().expect("store lock poisoned");
        store.commit_state("state: record update pass")?;
        if no_push {
            info!("push skipped (--no-push)");
        } else {
            store.push()?;
        }
        Ok(store.created_tags().to_vec())
    })
    .await
    .map_err(join_err)??;

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        queued = summary.queued,
        archived = summary.archived,
        failed_depots = summary.failed_depots,
        failed_accounts = summary.failed_accounts,
        new_tags = summary.new_tags.len(),
        "run complete",
    );
    Ok(summary)
}

/// Build the ordered user work list for this run.
///
/// Explicit users and app-id owners are additive; `--update` adds the sweep
/// result. With no selection mechanism at all, every configured account is
/// processed.
async fn select_users(
    options: &RunOptions,
    state: &SharedState,
    factory: &dyn SessionFactory,
) -> Result<BTreeSet<String>, SchedulerError> {
    let mut selected: BTreeSet<String> = options.users.iter().cloned().collect();

    if !options.app_ids.is_empty() {
        let apps: BTreeSet<AppId> = options.app_ids.iter().map(|id| AppId(*id)).collect();
        for owners in state.enabled_owners(&apps).values() {
            selected.extend(owners.iter().cloned());
        }
    }

    if options.update_sweep {
        let report = detect_stale_users(state, factory, options.retry_count).await?;
        selected.extend(report.users);
    }

    if selected.is_empty()
        && options.users.is_empty()
        && options.app_ids.is_empty()
        && !options.update_sweep
    {
        selected = state.accounts().into_iter().map(|(user, _)| user).collect();
    }

    Ok(selected)
}

fn tally(summary: &mut RunSummary, username: &str, outcome: UserOutcome) {
    if outcome.is_skip() {
        summary.skipped += 1;
        return;
    }
    summary.processed += 1;
    match outcome {
        UserOutcome::Processed {
            queued,
            archived,
            failed,
        } => {
            summary.queued += queued;
            summary.archived += archived;
            summary.failed_depots += failed;
        }
        UserOutcome::Disabled { code } => {
            warn!(user = %username, code = %code, "account disabled during run");
        }
        UserOutcome::LoginFailed { code } => {
            warn!(user = %username, code = %code, "account login failed");
            summary.failed_accounts += 1;
        }
        UserOutcome::NoPaidApps => {
            warn!(user = %username, "account disabled: no paid applications");
        }
        UserOutcome::ContentUnavailable | UserOutcome::MetadataUnavailable => {
            summary.failed_accounts += 1;
        }
        UserOutcome::SkippedDisabled | UserOutcome::SkippedCooldown { .. } => {}
    }
}
