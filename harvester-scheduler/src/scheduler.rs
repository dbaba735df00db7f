//! Per-account fetch orchestration.
//!
//! [`FetchScheduler::process_user`] drives one account end to end: admission
//! (disabled flag, cooldown), login, content session, paid-application
//! discovery, and one concurrent fetch task per depot that needs archiving.
//! Applications are locked for the duration of their tasks so overlapping
//! accounts never fetch the same application twice; each task releases its
//! depot on completion and the application unlocks when its set empties.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use harvester_core::records::unix_seconds_now;
use harvester_core::state::{Admission, SharedState};
use harvester_core::types::{AppId, DepotId, ManifestId};
use harvester_session::account::{AccountSession, LoginOutcome};
use harvester_session::codes::LoginCode;
use harvester_session::ports::{ContentClient, ProductQuery, SessionFactory};
use harvester_session::retry::{retry, transient_only};
use harvester_store::VersionStore;

use crate::error::{join_err, SchedulerError};

/// Per-call deadline for metadata fetches during an account pass.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for one run, shared by every account pass.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub retry_count: u32,
    pub cooldown_secs: i64,
    pub interactive: bool,
    /// Explicit application selection; `None` processes everything licensed.
    pub app_filter: Option<HashSet<u32>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            cooldown_secs: 86_400,
            interactive: false,
            app_filter: None,
        }
    }
}

/// Terminal outcome of one account pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Processed {
        queued: usize,
        archived: usize,
        failed: usize,
    },
    SkippedDisabled,
    SkippedCooldown {
        remaining_secs: i64,
    },
    /// Login came back disqualifying; the record is now disabled.
    Disabled {
        code: LoginCode,
    },
    LoginFailed {
        code: LoginCode,
    },
    /// The account owns no paid applications; the record is now disabled.
    NoPaidApps,
    ContentUnavailable,
    MetadataUnavailable,
}

impl UserOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            UserOutcome::SkippedDisabled | UserOutcome::SkippedCooldown { .. }
        )
    }
}

/// Outcome of one depot fetch task.
struct TaskReport {
    app: AppId,
    depot: DepotId,
    success: bool,
}

/// Orchestrates fetch passes for the accounts of one run.
pub struct FetchScheduler {
    state: SharedState,
    store: Arc<StdMutex<VersionStore>>,
    factory: Arc<dyn SessionFactory>,
    /// Serializes rate-limit backoff and interactive prompts process-wide.
    login_gate: Arc<TokioMutex<()>>,
    config: SchedulerConfig,
}

impl FetchScheduler {
    pub fn new(
        state: SharedState,
        store: Arc<StdMutex<VersionStore>>,
        factory: Arc<dyn SessionFactory>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            state,
            store,
            factory,
            login_gate: Arc::new(TokioMutex::new(())),
            config,
        }
    }

    /// Run the full fetch pass for one account. Invoked at most once per
    /// user per run.
    pub async fn process_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserOutcome, SchedulerError> {
        let now = unix_seconds_now();
        match self
            .state
            .admit(username, self.config.cooldown_secs, now)
        {
            Admission::Admitted => {}
            Admission::Disabled => {
                warn!(user = %username, "user is disabled; skipping");
                return Ok(UserOutcome::SkippedDisabled);
            }
            Admission::Cooldown { remaining_secs } => {
                warn!(
                    user = %username,
                    remaining_secs,
                    "update cooldown has not elapsed; skipping",
                );
                return Ok(UserOutcome::SkippedCooldown { remaining_secs });
            }
        }

        let session = self.factory.open_session(Some(username))?;
        let account = AccountSession::new(
            session.as_ref(),
            &self.login_gate,
            username,
            password,
            self.state.two_factor_secret(username),
            self.config.retry_count,
            self.config.interactive,
        );
        match account.login().await? {
            LoginOutcome::Success => {}
            LoginOutcome::Disabled { code } => {
                self.state.disable_user(username, Some(code.as_status()));
                return Ok(UserOutcome::Disabled { code });
            }
            LoginOutcome::ExhaustedRetries { last } => {
                return Ok(UserOutcome::LoginFailed { code: last });
            }
        }

        info!(user = %username, "opening content session");
        let content = match retry(
            self.config.retry_count,
            "open content session",
            transient_only,
            || session.open_content(),
        )
        .await
        {
            Ok(content) => content,
            Err(err) => {
                error!(user = %username, error = %err, "failed to open content session");
                return Ok(UserOutcome::ContentUnavailable);
            }
        };

        // Paid-application discovery: package metadata first, billing filter,
        // then application metadata for the survivors.
        let packages = content.licensed_packages();
        let mut app_ids: Vec<AppId> = Vec::new();
        if !packages.is_empty() {
            info!(user = %username, packages = packages.len(), "fetching package metadata");
            let package_info = match retry(
                self.config.retry_count,
                "package metadata",
                transient_only,
                || session.product_info(ProductQuery::Packages(packages.clone()), METADATA_TIMEOUT),
            )
            .await
            {
                Ok(info) => info,
                Err(err) => {
                    error!(user = %username, error = %err, "failed to fetch package metadata");
                    return Ok(UserOutcome::MetadataUnavailable);
                }
            };
            for package in package_info.packages.values() {
                if package.billing.grants_ownership() && !package.depot_ids.is_empty() {
                    app_ids.extend(package.app_ids.iter().copied());
                }
            }
        }
        app_ids.sort_unstable();
        app_ids.dedup();
        info!(user = %username, apps = app_ids.len(), "paid applications found");

        if app_ids.is_empty() {
            self.state
                .disable_user(username, Some(LoginCode::Ok.as_status()));
            warn!(user = %username, "no paid applications; user disabled");
            return Ok(UserOutcome::NoPaidApps);
        }

        let app_info = match retry(
            self.config.retry_count,
            "application metadata",
            transient_only,
            || session.product_info(ProductQuery::Apps(app_ids.clone()), METADATA_TIMEOUT),
        )
        .await
        {
            Ok(info) => info,
            Err(err) => {
                error!(user = %username, error = %err, "failed to fetch application metadata");
                return Ok(UserOutcome::MetadataUnavailable);
            }
        };

        // Per-application pass: lock, filter, queue depot tasks.
        let mut tasks: JoinSet<TaskReport> = JoinSet::new();
        let mut nothing_queued = true;
        let mut queued = 0usize;
        let mut archived = 0usize;
        for app_id in &app_ids {
            if let Some(filter) = &self.config.app_filter {
                if !filter.contains(&app_id.0) {
                    continue;
                }
            }
            if !self.state.try_lock_app(*app_id) {
                debug!(app = %app_id, "application already locked; skipping");
                continue;
            }
            debug!(app = %app_id, "application locked");

            let queued_before = queued;
            match self
                .queue_app_tasks(
                    username,
                    *app_id,
                    &app_info,
                    &content,
                    &mut tasks,
                    &mut queued,
                    &mut archived,
                )
                .await
            {
                Ok(()) => {}
                Err(err) => {
                    // Fatal for this application only (e.g. unresolvable
                    // branch); siblings continue.
                    error!(user = %username, app = %app_id, error = %err,
                        "cannot prepare application; skipping");
                }
            }
            if queued > queued_before {
                nothing_queued = false;
            } else if self.state.unlock_idle_app(*app_id) {
                debug!(app = %app_id, "application unlocked (nothing to fetch)");
            }
        }

        // Wait for the full batch across all applications before returning;
        // no partial application state survives this function.
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    if !report.success {
                        failed += 1;
                    }
                    debug!(app = %report.app, depot = %report.depot,
                        success = report.success, "depot task finished");
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    error!(error = %err, "depot task panicked");
                    failed += 1;
                }
            }
        }

        // An account with nothing new still counts as checked; partial or
        // failed fetches leave the cooldown untouched so the next run retries.
        if nothing_queued {
            self.state.refresh_last_update(username, now);
        }

        Ok(UserOutcome::Processed {
            queued,
            archived,
            failed,
        })
    }

    /// Inspect one locked application and spawn fetch tasks for every depot
    /// that needs archiving. Tasks for the application are registered first
    /// and launched together, so the lock-set is never observed half-built.
    #[allow(clippy::too_many_arguments)]
    async fn queue_app_tasks(
        &self,
        username: &str,
        app_id: AppId,
        app_info: &harvester_session::ports::ProductInfo,
        content: &Arc<dyn ContentClient>,
        tasks: &mut JoinSet<TaskReport>,
        queued: &mut usize,
        archived: &mut usize,
    ) -> Result<(), SchedulerError> {
        let Some(app) = app_info.apps.get(&app_id) else {
            return Ok(());
        };
        if !app.category.is_archivable() || app.depots.is_empty() {
            return Ok(());
        }

        let mut jobs: Vec<(DepotId, ManifestId)> = Vec::new();
        for (depot_id, manifests) in &app.depots {
            let Some(manifest) = &manifests.public else {
                continue;
            };
            if !content.is_depot_licensed(*depot_id) {
                continue;
            }
            let already_archived = {
                let store = self.store.lock().expect("store lock poisoned");
                store.tag_exists(*depot_id, manifest)?
            };
            if already_archived {
                info!(depot = %depot_id, manifest = %manifest, "already archived");
                self.state.record_depot_version(*depot_id, manifest.clone());
                self.state.record_owned_app(username, app_id);
                *archived += 1;
            } else {
                jobs.push((*depot_id, manifest.clone()));
            }
        }
        if jobs.is_empty() {
            return Ok(());
        }

        // The branch/worktree must exist before any task touches it.
        let worktree = {
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || {
                store
                    .lock()
                    .expect("store lock poisoned")
                    .ensure_app_worktree(app_id)
            })
            .await
            .map_err(join_err)??
        };

        for (depot_id, _) in &jobs {
            self.state.add_locked_depot(app_id, *depot_id);
        }
        for (depot_id, manifest) in jobs {
            *queued += 1;
            tasks.spawn(run_depot_task(
                self.state.clone(),
                self.store.clone(),
                content.clone(),
                username.to_string(),
                app_id,
                depot_id,
                manifest,
                worktree.clone(),
            ));
            // Keep the scheduler responsive between task creations.
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// One depot fetch: collaborator call, then commit+tag, then version record.
/// The depot is released from the application lock-set no matter how the
/// fetch ends.
#[allow(clippy::too_many_arguments)]
async fn run_depot_task(
    state: SharedState,
    store: Arc<StdMutex<VersionStore>>,
    content: Arc<dyn ContentClient>,
    username: String,
    app: AppId,
    depot: DepotId,
    manifest: ManifestId,
    worktree: PathBuf,
) -> TaskReport {
    let result = fetch_and_record(&state, &store, &content, app, depot, &manifest, &worktree).await;

    let success = match result {
        Ok(()) => true,
        Err(err) => {
            error!(user = %username, app = %app, depot = %depot, error = %err,
                "depot fetch failed");
            false
        }
    };

    state.record_owned_app(&username, app);
    if state.release_depot(app, depot) {
        debug!(app = %app, "application unlocked");
    }

    TaskReport {
        app,
        depot,
        success,
    }
}

async fn fetch_and_record(
    state: &SharedState,
    store: &Arc<StdMutex<VersionStore>>,
    content: &Arc<dyn ContentClient>,
    app: AppId,
    depot: DepotId,
    manifest: &ManifestId,
    worktree: &std::path::Path,
) -> Result<(), SchedulerError> {
    let fetch = content
        .fetch_manifest(app, depot, manifest, worktree)
        .await?;

    let store = store.clone();
    let manifest_for_store = manifest.clone();
    tokio::task::spawn_blocking(move || {
        let mut store = store.lock().expect("store lock poisoned");
        store.record_fetch(
            app,
            depot,
            &manifest_for_store,
            fetch.manifest_commit.as_deref(),
            &fetch.removed_files,
        )
    })
    .await
    .map_err(join_err)??;

    state.record_depot_version(depot, manifest.clone());
    Ok(())
}
