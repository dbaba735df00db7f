//! Staleness detection for `harvester-detector`.
//!
//! An anonymous-session sweep over every application owned by enabled users:
//! fetch published metadata in bounded batches, compare each depot's "public"
//! manifest version against the recorded one, and map stale applications back
//! to the accounts that own them. The resulting user set is the work queue
//! for the next fetch run.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use harvester_core::state::SharedState;
use harvester_core::types::AppId;
use harvester_session::codes::LoginCode;
use harvester_session::error::SessionError;
use harvester_session::ports::{ProductQuery, SessionFactory};
use harvester_session::retry::{retry, transient_only};

/// Applications per metadata query; the remote service caps bulk lookups.
pub const METADATA_BATCH: usize = 300;

/// Per-batch deadline. Sweep batches are big, so this is far above the
/// interactive default.
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of one staleness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessReport {
    /// Applications with at least one depot whose published version differs
    /// from the recorded one.
    pub stale_apps: BTreeSet<AppId>,
    /// Enabled owners of each stale application.
    pub stale_owners: BTreeMap<AppId, Vec<String>>,
    /// The refresh work queue: owners of stale applications plus accounts
    /// never yet processed.
    pub users: BTreeSet<String>,
}

/// Errors from the staleness sweep.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The anonymous session could not be established; without it no
    /// metadata can be compared.
    #[error("anonymous login failed with {code}")]
    AnonymousLogin { code: LoginCode },

    #[error(transparent)]
    Session(#[from] SessionError),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run the sweep and return the set of users requiring a refresh.
///
/// Individual metadata batches that fail after retries are logged and
/// skipped — their applications simply stay unexamined until the next sweep.
pub async fn detect_stale_users(
    state: &SharedState,
    factory: &dyn SessionFactory,
    retry_count: u32,
) -> Result<StalenessReport, DetectError> {
    let app_ids: Vec<AppId> = state.apps_of_enabled_users().into_iter().collect();
    info!(apps = app_ids.len(), "starting staleness sweep");

    let session = factory.open_session(None)?;
    let code = session.anonymous_login().await?;
    if !code.is_ok() {
        return Err(DetectError::AnonymousLogin { code });
    }

    let mut stale_apps = BTreeSet::new();
    let mut examined = 0usize;
    for batch in app_ids.chunks(METADATA_BATCH) {
        let info = retry(retry_count, "app metadata batch", transient_only, || {
            session.product_info(ProductQuery::Apps(batch.to_vec()), BATCH_TIMEOUT)
        })
        .await;
        let info = match info {
            Ok(info) => info,
            Err(err) => {
                error!(error = %err, batch = batch.len(), "metadata batch failed; skipping");
                continue;
            }
        };
        examined += info.apps.len();
        info!(acquired = examined, "app metadata acquired");

        for (app_id, app) in &info.apps {
            for (depot_id, manifests) in &app.depots {
                let Some(published) = &manifests.public else {
                    continue;
                };
                if state.is_depot_stale(*depot_id, published) {
                    stale_apps.insert(*app_id);
                }
            }
        }
    }

    let stale_owners = state.enabled_owners(&stale_apps);
    let mut users: BTreeSet<String> = stale_owners.values().flatten().cloned().collect();
    // Accounts on file that never produced a user record still need a first
    // pass, stale or not.
    users.extend(state.unprocessed_accounts());

    for (app, owners) in &stale_owners {
        info!(app = %app, users = owners.join(","), "application needs refresh");
    }
    info!(
        apps = stale_owners.len(),
        users = users.len(),
        "staleness sweep complete",
    );

    Ok(StalenessReport {
        stale_apps,
        stale_owners,
        users,
    })
}
