//! Content-addressed manifest archive over git.
//!
//! # Storage layout
//!
//! ```text
//! <archive root>/          (main repository; must exist before a run)
//!   state/                 (worktree of the `state` branch — record files)
//!   depots/<app_id>/       (worktree of the per-application branch)
//! ```
//!
//! Every archived manifest version is a lightweight tag named
//! `{depot_id}_{manifest_id}`. Tag existence — locally or in the remote
//! snapshot taken once per run — is the at-most-once-fetch guarantee: a
//! version with a tag is never fetched again.
//!
//! Branch resolution order for applications: remote branch, else the common
//! `base` branch, else a loud per-application failure. The `state` branch is
//! bootstrapped the same way.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use git2::{
    BranchType, Direction, FetchOptions, PushOptions, Repository, Signature, Sort,
    WorktreeAddOptions,
};
use tracing::{debug, info, warn};

use harvester_core::records::{DEPOTS_FILE, USERS_FILE};
use harvester_core::types::{AppId, DepotId, ManifestId};

use crate::error::{io_err, StoreError};

pub const REMOTE: &str = "origin";
pub const BASE_BRANCH: &str = "base";
pub const STATE_BRANCH: &str = "state";
pub const STATE_DIR: &str = "state";
pub const DEPOTS_DIR: &str = "depots";

/// Archive tag name for one `(depot, manifest)` pair.
pub fn tag_name(depot: DepotId, manifest: &ManifestId) -> String {
    format!("{depot}_{manifest}")
}

/// Git-backed version archive.
///
/// All mutating operations go through `&mut self`; the scheduler serializes
/// them behind one lock.
pub struct VersionStore {
    root: PathBuf,
    repo: Repository,
    remote_available: bool,
    /// Remote branch tips, snapshotted once per run.
    remote_heads: HashMap<String, String>,
    /// Remote tag names, snapshotted once per run. Unioned with local tags
    /// for existence checks so a re-fetch never needs another round-trip.
    remote_tags: HashSet<String>,
    /// Branches this run created or committed to; these are what a final
    /// push uploads.
    touched_branches: HashSet<String>,
    created_tags: Vec<String>,
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("root", &self.root)
            .field("remote_available", &self.remote_available)
            .field("remote_heads", &self.remote_heads)
            .field("remote_tags", &self.remote_tags)
            .field("touched_branches", &self.touched_branches)
            .field("created_tags", &self.created_tags)
            .finish_non_exhaustive()
    }
}

impl VersionStore {
    /// Open the archive at `root`, snapshot remote refs, and make sure the
    /// base branch and state worktree exist.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let repo = Repository::open(root).map_err(|source| StoreError::NotARepository {
            path: root.to_path_buf(),
            source,
        })?;
        let mut store = Self {
            root: root.to_path_buf(),
            repo,
            remote_available: false,
            remote_heads: HashMap::new(),
            remote_tags: HashSet::new(),
            touched_branches: HashSet::new(),
            created_tags: Vec::new(),
        };
        store.load_remote_snapshot();
        store.ensure_base_branch()?;
        store.ensure_state_worktree()?;
        Ok(store)
    }

    /// Directory holding the persisted record files.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn app_worktree_path(&self, app: AppId) -> PathBuf {
        self.root.join(DEPOTS_DIR).join(app.to_string())
    }

    // -----------------------------------------------------------------------
    // Remote snapshot
    // -----------------------------------------------------------------------

    /// One ls-remote per run. Failure degrades to local-only operation; the
    /// archive still works, it just cannot dedup against remote tags or push.
    fn load_remote_snapshot(&mut self) {
        let mut remote = match self.repo.find_remote(REMOTE) {
            Ok(remote) => remote,
            Err(_) => {
                debug!("no '{REMOTE}' remote; archive is local-only");
                return;
            }
        };
        let connection =
            match remote.connect_auth(Direction::Fetch, Some(make_callbacks()), None) {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(error = %err, "remote unreachable; using local refs only");
                    return;
                }
            };
        let heads = match connection.list() {
            Ok(heads) => heads,
            Err(err) => {
                warn!(error = %err, "remote ref listing failed; using local refs only");
                return;
            }
        };
        for head in heads {
            let name = head.name();
            if let Some(branch) = name.strip_prefix("refs/heads/") {
                self.remote_heads
                    .insert(branch.to_string(), head.oid().to_string());
            } else if let Some(tag) = name.strip_prefix("refs/tags/") {
                // ls-remote lists annotated tags twice; drop the peeled form.
                if !tag.ends_with("^{}") {
                    self.remote_tags.insert(tag.to_string());
                }
            }
        }
        self.remote_available = true;
        debug!(
            heads = self.remote_heads.len(),
            tags = self.remote_tags.len(),
            "remote snapshot loaded",
        );
    }

    // -----------------------------------------------------------------------
    // Branch / worktree bootstrap
    // -----------------------------------------------------------------------

    fn ensure_base_branch(&mut self) -> Result<(), StoreError> {
        if self.local_branch_exists(BASE_BRANCH) {
            return Ok(());
        }
        if self.remote_heads.contains_key(BASE_BRANCH) {
            info!("fetching remote base branch");
            self.fetch_branch(BASE_BRANCH)?;
            return Ok(());
        }
        // No base anywhere: anchor it at the repository's root commit so
        // every application branch shares one ancestor.
        let root_commit = self.first_root_commit()?;
        let commit = self.repo.find_commit(root_commit)?;
        self.repo.branch(BASE_BRANCH, &commit, false)?;
        debug!(commit = %root_commit, "base branch created at root commit");
        Ok(())
    }

    fn ensure_state_worktree(&mut self) -> Result<(), StoreError> {
        if self.worktree_exists(STATE_BRANCH) {
            return Ok(());
        }
        let path = self.state_dir();
        if !self.local_branch_exists(STATE_BRANCH) {
            if self.remote_heads.contains_key(STATE_BRANCH) {
                info!("fetching remote state branch");
                self.fetch_branch(STATE_BRANCH)?;
            } else {
                self.branch_from(STATE_BRANCH, BASE_BRANCH)?;
            }
        }
        self.worktree_from_branch(STATE_BRANCH, &path)
    }

    /// Make sure `app` has a branch and a checked-out worktree.
    ///
    /// Resolution order: existing worktree, remote branch, base branch. A
    /// stale local branch with no remote counterpart is recreated from base.
    pub fn ensure_app_worktree(&mut self, app: AppId) -> Result<PathBuf, StoreError> {
        let name = app.to_string();
        let path = self.app_worktree_path(app);
        if self.worktree_exists(&name) {
            return Ok(path);
        }
        if path.exists() {
            // Leftover empty directory from an interrupted run.
            let _ = std::fs::remove_dir(&path);
        }
        let depots_dir = self.root.join(DEPOTS_DIR);
        std::fs::create_dir_all(&depots_dir).map_err(|e| io_err(&depots_dir, e))?;

        if self.remote_heads.contains_key(&name) {
            if !self.local_branch_exists(&name) {
                self.fetch_branch(&name)?;
            }
            self.worktree_from_branch(&name, &path)?;
            debug!(app = %app, "worktree created from remote branch");
        } else if self.local_branch_exists(BASE_BRANCH) {
            if self.local_branch_exists(&name) {
                warn!(app = %app, "branch exists locally but not remotely; recreating from base");
                let mut branch = self.repo.find_branch(&name, BranchType::Local)?;
                branch.delete()?;
            }
            self.branch_from(&name, BASE_BRANCH)?;
            self.worktree_from_branch(&name, &path)?;
            debug!(app = %app, "worktree created from base branch");
        } else {
            return Err(StoreError::BranchUnresolvable { app: app.0 });
        }
        self.touched_branches.insert(name);
        Ok(path)
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    /// A version is archived iff its tag exists locally or in the remote
    /// snapshot.
    pub fn tag_exists(&self, depot: DepotId, manifest: &ManifestId) -> Result<bool, StoreError> {
        let name = tag_name(depot, manifest);
        if self.remote_tags.contains(&name) {
            return Ok(true);
        }
        let local = self.repo.tag_names(None)?;
        Ok(local.iter().flatten().any(|tag| tag == name))
    }

    /// Record a completed fetch for `(app, depot, manifest)`.
    ///
    /// With `manifest_commit` set this is a metadata-only confirmation: the
    /// named commit is tagged in place. Otherwise the collaborator has
    /// written the manifest and config descriptor into the worktree; stage
    /// the delete-list removals and the new files, commit, and tag the
    /// result.
    pub fn record_fetch(
        &mut self,
        app: AppId,
        depot: DepotId,
        manifest: &ManifestId,
        manifest_commit: Option<&str>,
        removed_files: &[String],
    ) -> Result<(), StoreError> {
        let worktree = self.app_worktree_path(app);
        let repo = Repository::open(&worktree)?;
        let tag = tag_name(depot, manifest);

        if removed_files.len() > 1 {
            warn!(app = %app, depot = %depot, count = removed_files.len(),
                "manifest delete-list removed more than one file");
        }

        match manifest_commit {
            Some(commit_ref) => {
                let object = repo.revparse_single(commit_ref)?;
                repo.tag_lightweight(&tag, &object, false)?;
            }
            None => {
                let mut index = repo.index()?;
                for file in removed_files {
                    let rel = Path::new(file);
                    let absolute = worktree.join(rel);
                    if absolute.exists() {
                        std::fs::remove_file(&absolute).map_err(|e| io_err(&absolute, e))?;
                    }
                    if index.get_path(rel, 0).is_some() {
                        index.remove_path(rel)?;
                    }
                }
                index.add_path(Path::new(&format!("{depot}_{manifest}.manifest")))?;
                index.add_path(Path::new("config.vdf"))?;
                index.write()?;

                let tree = repo.find_tree(index.write_tree()?)?;
                let signature = archive_signature(&repo)?;
                let parent = repo.head()?.peel_to_commit()?;
                let commit = repo.commit(
                    Some("HEAD"),
                    &signature,
                    &signature,
                    &format!("Update depot: {tag}"),
                    &tree,
                    &[&parent],
                )?;
                let object = repo.find_object(commit, None)?;
                repo.tag_lightweight(&tag, &object, false)?;
            }
        }

        self.created_tags.push(tag);
        self.touched_branches.insert(app.to_string());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State branch
    // -----------------------------------------------------------------------

    /// Commit the record files on the state branch. Returns `None` when the
    /// records are unchanged since the last commit.
    pub fn commit_state(&mut self, message: &str) -> Result<Option<git2::Oid>, StoreError> {
        let path = self.state_dir();
        let repo = Repository::open(&path)?;
        let mut index = repo.index()?;
        for file in [USERS_FILE, DEPOTS_FILE] {
            if path.join(file).exists() {
                index.add_path(Path::new(file))?;
            }
        }
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = repo.head()?.peel_to_commit()?;
        if parent.tree_id() == tree_id {
            debug!("state records unchanged; skipping commit");
            return Ok(None);
        }
        let tree = repo.find_tree(tree_id)?;
        let signature = archive_signature(&repo)?;
        let commit = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &[&parent])?;
        self.touched_branches.insert(STATE_BRANCH.to_string());
        Ok(Some(commit))
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Upload every branch this run touched plus every tag it created.
    /// A no-op without a reachable remote or without changes.
    pub fn push(&mut self) -> Result<(), StoreError> {
        if !self.remote_available {
            info!("no reachable remote; skipping push");
            return Ok(());
        }
        let mut refspecs: Vec<String> = self
            .touched_branches
            .iter()
            .map(|branch| format!("refs/heads/{branch}:refs/heads/{branch}"))
            .collect();
        refspecs.sort();
        refspecs.extend(
            self.created_tags
                .iter()
                .map(|tag| format!("refs/tags/{tag}:refs/tags/{tag}")),
        );
        if refspecs.is_empty() {
            debug!("nothing to push");
            return Ok(());
        }

        let mut remote = self.repo.find_remote(REMOTE)?;
        let mut options = PushOptions::new();
        options.remote_callbacks(make_callbacks());
        let specs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
        remote.push(&specs, Some(&mut options))?;
        info!(
            branches = self.touched_branches.len(),
            tags = self.created_tags.len(),
            "pushed archive refs",
        );
        Ok(())
    }

    /// Tags created during this run (newest last).
    pub fn created_tags(&self) -> &[String] {
        &self.created_tags
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn local_branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    fn worktree_exists(&self, name: &str) -> bool {
        self.repo.find_worktree(name).is_ok()
    }

    fn fetch_branch(&self, name: &str) -> Result<(), StoreError> {
        let mut remote = self.repo.find_remote(REMOTE)?;
        let mut options = FetchOptions::new();
        options.remote_callbacks(make_callbacks());
        let refspec = format!("refs/heads/{name}:refs/heads/{name}");
        remote.fetch(&[refspec.as_str()], Some(&mut options), None)?;
        Ok(())
    }

    fn branch_from(&self, name: &str, source: &str) -> Result<(), StoreError> {
        let source = self.repo.find_branch(source, BranchType::Local)?;
        let commit = source.get().peel_to_commit()?;
        self.repo.branch(name, &commit, false)?;
        Ok(())
    }

    fn worktree_from_branch(&self, name: &str, path: &Path) -> Result<(), StoreError> {
        let branch = self.repo.find_branch(name, BranchType::Local)?;
        let reference = branch.into_reference();
        let mut options = WorktreeAddOptions::new();
        options.reference(Some(&reference));
        self.repo.worktree(name, path, Some(&options))?;
        Ok(())
    }

    fn first_root_commit(&self) -> Result<git2::Oid, StoreError> {
        let head = self.repo.head().map_err(|_| StoreError::EmptyHistory)?;
        let tip = head.peel_to_commit().map_err(|_| StoreError::EmptyHistory)?;
        let mut walk = self.repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        walk.push(tip.id())?;
        for oid in walk {
            let oid = oid?;
            if self.repo.find_commit(oid)?.parent_count() == 0 {
                return Ok(oid);
            }
        }
        Err(StoreError::EmptyHistory)
    }
}

/// Committer identity: repository config when present, a fixed archive
/// identity otherwise (CI checkouts rarely configure one).
fn archive_signature(repo: &Repository) -> Result<Signature<'static>, git2::Error> {
    repo.signature()
        .or_else(|_| Signature::now("harvester", "harvester@localhost"))
}

/// Credential chain for remote operations: ssh agent, then the configured
/// credential helper, then default anonymous credentials.
fn make_callbacks() -> git2::RemoteCallbacks<'static> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(|url, username_from_url, _allowed| {
        if let Some(user) = username_from_url {
            if let Ok(cred) = git2::Cred::ssh_key_from_agent(user) {
                return Ok(cred);
            }
        }
        if let Ok(config) = git2::Config::open_default() {
            if let Ok(cred) = git2::Cred::credential_helper(&config, url, username_from_url) {
                return Ok(cred);
            }
        }
        git2::Cred::default()
    });
    callbacks
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    /// A fresh repository with one root commit, the shape `open` expects.
    fn init_archive(dir: &Path) {
        let repo = Repository::init(dir).expect("init repo");
        std::fs::write(dir.join("README.md"), "manifest archive\n").expect("seed file");
        let mut index = repo.index().expect("index");
        index.add_path(Path::new("README.md")).expect("add");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("tree");
        let tree = repo.find_tree(tree_id).expect("find tree");
        let signature = Signature::now("test", "test@example.com").expect("signature");
        repo.commit(Some("HEAD"), &signature, &signature, "init", &tree, &[])
            .expect("root commit");
    }

    fn open_store(dir: &TempDir) -> VersionStore {
        init_archive(dir.path());
        VersionStore::open(dir.path()).expect("open store")
    }

    #[test]
    fn open_rejects_a_plain_directory() {
        let dir = TempDir::new().expect("dir");
        let err = VersionStore::open(dir.path()).expect_err("not a repository");
        assert!(matches!(err, StoreError::NotARepository { .. }));
    }

    #[test]
    fn open_bootstraps_base_branch_and_state_worktree() {
        let dir = TempDir::new().expect("dir");
        let store = open_store(&dir);
        assert!(store.local_branch_exists(BASE_BRANCH));
        assert!(store.worktree_exists(STATE_BRANCH));
        assert!(store.state_dir().join("README.md").exists());
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = TempDir::new().expect("dir");
        init_archive(dir.path());
        VersionStore::open(dir.path()).expect("first open");
        VersionStore::open(dir.path()).expect("second open");
    }

    #[test]
    fn app_worktree_created_from_base() {
        let dir = TempDir::new().expect("dir");
        let mut store = open_store(&dir);
        let path = store.ensure_app_worktree(AppId(100)).expect("worktree");
        assert!(path.join("README.md").exists());
        // Second call finds the existing worktree.
        let again = store.ensure_app_worktree(AppId(100)).expect("idempotent");
        assert_eq!(path, again);
    }

    #[test]
    fn record_fetch_commits_and_tags_staged_files() {
        let dir = TempDir::new().expect("dir");
        let mut store = open_store(&dir);
        let worktree = store.ensure_app_worktree(AppId(100)).expect("worktree");

        let manifest = ManifestId::from("abc");
        std::fs::write(worktree.join("200_abc.manifest"), "payload").expect("manifest");
        std::fs::write(worktree.join("config.vdf"), "config").expect("config");
        store
            .record_fetch(AppId(100), DepotId(200), &manifest, None, &[])
            .expect("record");

        assert!(store.tag_exists(DepotId(200), &manifest).expect("tag check"));
        assert_eq!(store.created_tags(), ["200_abc"]);

        let repo = Repository::open(&worktree).expect("worktree repo");
        let head = repo.head().expect("head").peel_to_commit().expect("commit");
        assert_eq!(head.message(), Some("Update depot: 200_abc"));
    }

    #[test]
    fn record_fetch_with_commit_ref_tags_in_place() {
        let dir = TempDir::new().expect("dir");
        let mut store = open_store(&dir);
        let worktree = store.ensure_app_worktree(AppId(100)).expect("worktree");

        let repo = Repository::open(&worktree).expect("worktree repo");
        let head = repo.head().expect("head").peel_to_commit().expect("commit");
        let manifest = ManifestId::from("def");
        store
            .record_fetch(
                AppId(100),
                DepotId(200),
                &manifest,
                Some(&head.id().to_string()),
                &[],
            )
            .expect("record");

        assert!(store.tag_exists(DepotId(200), &manifest).expect("tag check"));
        // Metadata-only confirmation creates no new commit.
        let after = repo.head().expect("head").peel_to_commit().expect("commit");
        assert_eq!(after.id(), head.id());
    }

    #[test]
    fn record_fetch_applies_the_delete_list() {
        let dir = TempDir::new().expect("dir");
        let mut store = open_store(&dir);
        let worktree = store.ensure_app_worktree(AppId(100)).expect("worktree");

        std::fs::write(worktree.join("200_old.manifest"), "old").expect("old manifest");
        std::fs::write(worktree.join("config.vdf"), "config v1").expect("config");
        store
            .record_fetch(AppId(100), DepotId(200), &ManifestId::from("old"), None, &[])
            .expect("first record");

        std::fs::write(worktree.join("200_new.manifest"), "new").expect("new manifest");
        std::fs::write(worktree.join("config.vdf"), "config v2").expect("config");
        store
            .record_fetch(
                AppId(100),
                DepotId(200),
                &ManifestId::from("new"),
                None,
                &["200_old.manifest".to_string()],
            )
            .expect("second record");

        assert!(!worktree.join("200_old.manifest").exists());
        assert!(store
            .tag_exists(DepotId(200), &ManifestId::from("new"))
            .expect("tag check"));
    }

    #[test]
    fn tag_existence_is_negative_for_unknown_versions() {
        let dir = TempDir::new().expect("dir");
        let store = open_store(&dir);
        assert!(!store
            .tag_exists(DepotId(999), &ManifestId::from("zzz"))
            .expect("tag check"));
    }

    #[test]
    fn commit_state_skips_unchanged_records() {
        let dir = TempDir::new().expect("dir");
        let mut store = open_store(&dir);
        std::fs::write(store.state_dir().join(USERS_FILE), "{}").expect("users file");

        let first = store.commit_state("state: run").expect("first commit");
        assert!(first.is_some());
        let second = store.commit_state("state: run").expect("second commit");
        assert!(second.is_none(), "unchanged records should not re-commit");
    }

    #[test]
    fn push_without_remote_is_a_noop() {
        let dir = TempDir::new().expect("dir");
        let mut store = open_store(&dir);
        store.push().expect("push should no-op");
    }
}
