//! Persisted state records.
//!
//! # Storage layout
//!
//! ```text
//! <state dir>/
//!   accounts.json   (username -> password; externally supplied, read-only here)
//!   users.json      (username -> UserRecord)
//!   depots.json     (depot id -> manifest version id)
//!   twofactor.json  (username -> base64 shared secret; read-only during a run)
//! ```
//!
//! All four files are flat JSON maps, loaded wholesale at startup and written
//! wholesale at run end. Writes use an atomic `.tmp` + rename protocol so a
//! crash mid-flush never truncates a record file. Missing files load as empty
//! maps; the account and two-factor files are never rewritten by a run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{io_err, StateError};
use crate::types::{AppId, DepotId, ManifestId};

pub const ACCOUNTS_FILE: &str = "accounts.json";
pub const USERS_FILE: &str = "users.json";
pub const DEPOTS_FILE: &str = "depots.json";
pub const TWO_FACTOR_FILE: &str = "twofactor.json";

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// Per-account bookkeeping, created on the first login attempt.
///
/// `enabled` flips to `false` permanently when a disqualifying login result
/// comes back or the account owns zero paid applications; records are never
/// deleted automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub enabled: bool,
    /// Unix seconds of the last completed (or no-op) update pass.
    pub last_update: i64,
    /// Status code of the last disqualifying login result, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<i32>,
    #[serde(default)]
    pub owned_apps: BTreeSet<AppId>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            enabled: true,
            last_update: 0,
            last_status: None,
            owned_apps: BTreeSet::new(),
        }
    }
}

/// The full set of persisted records for one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateRecords {
    pub accounts: BTreeMap<String, String>,
    pub users: BTreeMap<String, UserRecord>,
    pub depot_versions: BTreeMap<DepotId, ManifestId>,
    pub two_factor: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load all record files from `dir`. Missing files yield empty maps.
pub fn load_at(dir: &Path) -> Result<StateRecords, StateError> {
    Ok(StateRecords {
        accounts: load_map(&dir.join(ACCOUNTS_FILE))?,
        users: load_map(&dir.join(USERS_FILE))?,
        depot_versions: load_map(&dir.join(DEPOTS_FILE))?,
        two_factor: load_map(&dir.join(TWO_FACTOR_FILE))?,
    })
}

/// Flush the mutable records (`users.json`, `depots.json`) to `dir`.
///
/// The account list and two-factor secrets are inputs, not outputs — they are
/// deliberately left untouched so a run can never corrupt credentials.
pub fn save_at(dir: &Path, records: &StateRecords) -> Result<(), StateError> {
    write_json_atomic(&dir.join(USERS_FILE), &records.users)?;
    write_json_atomic(&dir.join(DEPOTS_FILE), &records.depot_versions)?;
    Ok(())
}

/// Rewrite the account list alone (used by credential management, never by a
/// fetch run).
pub fn save_accounts_at(
    dir: &Path,
    accounts: &BTreeMap<String, String>,
) -> Result<(), StateError> {
    write_json_atomic(&dir.join(ACCOUNTS_FILE), accounts)
}

/// Rewrite the two-factor secret map alone (credential management only).
pub fn save_two_factor_at(
    dir: &Path,
    secrets: &BTreeMap<String, String>,
) -> Result<(), StateError> {
    write_json_atomic(&dir.join(TWO_FACTOR_FILE), secrets)
}

fn load_map<K, V>(path: &Path) -> Result<BTreeMap<K, V>, StateError>
where
    K: Ord + DeserializeOwned,
    V: DeserializeOwned,
{
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&contents).map_err(|source| StateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `value` as pretty JSON to `path` via `<path>.tmp` + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("record path has no parent directory"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(value)?;
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Current time as Unix seconds, the resolution every record timestamp uses.
pub fn unix_seconds_now() -> i64 {
    Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn empty_records_when_files_missing() {
        let dir = TempDir::new().expect("dir");
        let records = load_at(dir.path()).expect("load");
        assert!(records.accounts.is_empty());
        assert!(records.users.is_empty());
        assert!(records.depot_versions.is_empty());
        assert!(records.two_factor.is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let dir = TempDir::new().expect("dir");
        let mut records = StateRecords::default();
        records.users.insert(
            "alice".to_string(),
            UserRecord {
                enabled: true,
                last_update: 1_700_000_000,
                last_status: None,
                owned_apps: BTreeSet::from([AppId(100)]),
            },
        );
        records
            .depot_versions
            .insert(DepotId(200), ManifestId::from("abc"));

        save_at(dir.path(), &records).expect("save");
        let loaded = load_at(dir.path()).expect("load");
        assert_eq!(loaded.users, records.users);
        assert_eq!(loaded.depot_versions, records.depot_versions);
    }

    #[test]
    fn save_never_touches_credentials() {
        let dir = TempDir::new().expect("dir");
        std::fs::write(
            dir.path().join(ACCOUNTS_FILE),
            r#"{"alice":"hunter2"}"#,
        )
        .expect("seed accounts");

        let records = load_at(dir.path()).expect("load");
        assert_eq!(records.accounts.get("alice").map(String::as_str), Some("hunter2"));

        save_at(dir.path(), &records).expect("save");
        let raw = std::fs::read_to_string(dir.path().join(ACCOUNTS_FILE)).expect("read");
        assert_eq!(raw, r#"{"alice":"hunter2"}"#);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let dir = TempDir::new().expect("dir");
        save_at(dir.path(), &StateRecords::default()).expect("save");
        assert!(!dir.path().join(format!("{USERS_FILE}.tmp")).exists());
        assert!(!dir.path().join(format!("{DEPOTS_FILE}.tmp")).exists());
    }

    #[test]
    fn empty_file_loads_as_empty_map() {
        let dir = TempDir::new().expect("dir");
        std::fs::write(dir.path().join(USERS_FILE), "").expect("touch");
        let records = load_at(dir.path()).expect("load");
        assert!(records.users.is_empty());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = TempDir::new().expect("dir");
        std::fs::write(dir.path().join(DEPOTS_FILE), "{not json").expect("write");
        let err = load_at(dir.path()).expect_err("parse failure");
        match err {
            StateError::Parse { path, .. } => {
                assert!(path.ends_with(DEPOTS_FILE));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn user_record_defaults_enabled() {
        let record = UserRecord::default();
        assert!(record.enabled);
        assert_eq!(record.last_update, 0);
        assert!(record.last_status.is_none());
        assert!(record.owned_apps.is_empty());
    }

    #[test]
    fn legacy_record_without_owned_apps_deserializes() {
        let record: UserRecord =
            serde_json::from_str(r#"{"enabled":false,"last_update":5,"last_status":63}"#)
                .expect("deserialize");
        assert!(!record.enabled);
        assert_eq!(record.last_status, Some(63));
        assert!(record.owned_apps.is_empty());
    }
}
