//! Shared run state.
//!
//! [`SharedState`] is the one synchronized view of the mutable bookkeeping a
//! run touches: user records, the depot version map, and the per-application
//! lock table for in-flight fetch tasks. Every accessor is a complete
//! lock/mutate/unlock section — callers never see the guard, and the lock is
//! never held across I/O or an `.await` point.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::records::{StateRecords, UserRecord};
use crate::types::{AppId, DepotId, ManifestId};

/// Outcome of the per-user admission check at the top of a fetch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The user may be processed now.
    Admitted,
    /// The record is permanently disabled; no login is attempted.
    Disabled,
    /// The cooldown interval has not elapsed yet.
    Cooldown { remaining_secs: i64 },
}

struct StateInner {
    records: StateRecords,
    app_locks: HashMap<AppId, HashSet<DepotId>>,
}

/// Cloneable handle to the synchronized run state.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<StateInner>>,
}

impl SharedState {
    pub fn new(records: StateRecords) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateInner {
                records,
                app_locks: HashMap::new(),
            })),
        }
    }

    fn guard(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().expect("state lock poisoned")
    }

    // -----------------------------------------------------------------------
    // Accounts and secrets (read-only during a run)
    // -----------------------------------------------------------------------

    /// All configured credentials, sorted by username.
    pub fn accounts(&self) -> Vec<(String, String)> {
        self.guard()
            .records
            .accounts
            .iter()
            .map(|(user, password)| (user.clone(), password.clone()))
            .collect()
    }

    pub fn password_of(&self, username: &str) -> Option<String> {
        self.guard().records.accounts.get(username).cloned()
    }

    pub fn two_factor_secret(&self, username: &str) -> Option<String> {
        self.guard().records.two_factor.get(username).cloned()
    }

    // -----------------------------------------------------------------------
    // User records
    // -----------------------------------------------------------------------

    /// Admission check for one user: creates the record on first sight, then
    /// gates on the disabled flag and the cooldown interval.
    pub fn admit(&self, username: &str, cooldown_secs: i64, now: i64) -> Admission {
        let mut inner = self.guard();
        let record = inner
            .records
            .users
            .entry(username.to_string())
            .or_default();
        if !record.enabled {
            return Admission::Disabled;
        }
        let remaining = record.last_update + cooldown_secs - now;
        if remaining > 0 {
            return Admission::Cooldown {
                remaining_secs: remaining,
            };
        }
        Admission::Admitted
    }

    /// Permanently disable a user, recording the status code that caused it.
    pub fn disable_user(&self, username: &str, status: Option<i32>) {
        let mut inner = self.guard();
        let record = inner
            .records
            .users
            .entry(username.to_string())
            .or_default();
        record.enabled = false;
        record.last_status = status;
    }

    pub fn record_owned_app(&self, username: &str, app: AppId) {
        let mut inner = self.guard();
        inner
            .records
            .users
            .entry(username.to_string())
            .or_default()
            .owned_apps
            .insert(app);
    }

    pub fn refresh_last_update(&self, username: &str, now: i64) {
        let mut inner = self.guard();
        inner
            .records
            .users
            .entry(username.to_string())
            .or_default()
            .last_update = now;
    }

    pub fn user(&self, username: &str) -> Option<UserRecord> {
        self.guard().records.users.get(username).cloned()
    }

    /// Union of application ids owned by all enabled users.
    pub fn apps_of_enabled_users(&self) -> BTreeSet<AppId> {
        let inner = self.guard();
        inner
            .records
            .users
            .values()
            .filter(|record| record.enabled)
            .flat_map(|record| record.owned_apps.iter().copied())
            .collect()
    }

    /// Enabled users owning each of the given applications.
    pub fn enabled_owners(&self, apps: &BTreeSet<AppId>) -> BTreeMap<AppId, Vec<String>> {
        let inner = self.guard();
        let mut owners: BTreeMap<AppId, Vec<String>> = BTreeMap::new();
        for (username, record) in &inner.records.users {
            if !record.enabled {
                continue;
            }
            for app in record.owned_apps.intersection(apps) {
                owners.entry(*app).or_default().push(username.clone());
            }
        }
        owners
    }

    /// Accounts present in the credential list but never yet processed.
    pub fn unprocessed_accounts(&self) -> Vec<String> {
        let inner = self.guard();
        inner
            .records
            .accounts
            .keys()
            .filter(|username| !inner.records.users.contains_key(*username))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Depot versions
    // -----------------------------------------------------------------------

    pub fn depot_version(&self, depot: DepotId) -> Option<ManifestId> {
        self.guard().records.depot_versions.get(&depot).cloned()
    }

    pub fn record_depot_version(&self, depot: DepotId, manifest: ManifestId) {
        self.guard().records.depot_versions.insert(depot, manifest);
    }

    /// A depot is stale when a version is on record and the published one
    /// differs. Depots never seen before are not stale — they surface through
    /// the per-account fetch pass instead.
    pub fn is_depot_stale(&self, depot: DepotId, published: &ManifestId) -> bool {
        match self.guard().records.depot_versions.get(&depot) {
            Some(recorded) => recorded != published,
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Application locks
    // -----------------------------------------------------------------------

    /// Register an empty lock-set for `app`. Returns `false` when the
    /// application is already locked — callers skip it this pass, never queue.
    pub fn try_lock_app(&self, app: AppId) -> bool {
        let mut inner = self.guard();
        match inner.app_locks.entry(app) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(HashSet::new());
                true
            }
        }
    }

    pub fn add_locked_depot(&self, app: AppId, depot: DepotId) {
        let mut inner = self.guard();
        inner.app_locks.entry(app).or_default().insert(depot);
    }

    /// Release one depot from `app`'s lock-set; the application entry is
    /// removed exactly when the set empties. Returns `true` when this release
    /// unlocked the application.
    pub fn release_depot(&self, app: AppId, depot: DepotId) -> bool {
        let mut inner = self.guard();
        let emptied = match inner.app_locks.get_mut(&app) {
            Some(depots) => {
                depots.remove(&depot);
                depots.is_empty()
            }
            None => return false,
        };
        if emptied {
            inner.app_locks.remove(&app);
        }
        emptied
    }

    /// Drop the lock entry for an application whose pass queued no tasks.
    pub fn unlock_idle_app(&self, app: AppId) -> bool {
        let mut inner = self.guard();
        let is_idle = inner
            .app_locks
            .get(&app)
            .is_some_and(|depots| depots.is_empty());
        if is_idle {
            inner.app_locks.remove(&app);
        }
        is_idle
    }

    pub fn is_app_locked(&self, app: AppId) -> bool {
        self.guard().app_locks.contains_key(&app)
    }

    pub fn locked_app_count(&self) -> usize {
        self.guard().app_locks.len()
    }

    // -----------------------------------------------------------------------
    // Persistence handoff
    // -----------------------------------------------------------------------

    /// Clone the records for flushing; the lock table is ephemeral and never
    /// persisted.
    pub fn snapshot(&self) -> StateRecords {
        self.guard().records.clone()
    }
}
