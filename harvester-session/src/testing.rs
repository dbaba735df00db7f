//! Scripted session doubles.
//!
//! In-tree test support: every crate that exercises the orchestration engine
//! drives it through these scripted implementations of the collaborator
//! ports. Scripts are queues — each call pops the next result; an exhausted
//! queue falls back to a benign default so tests only script what they assert.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use harvester_core::types::{AppId, DepotId, ManifestId, PackageId};

use crate::codes::LoginCode;
use crate::error::SessionError;
use crate::ports::{
    ContentClient, ManifestFetch, ProductInfo, ProductQuery, RemoteSession, SessionFactory,
};

/// A scripted product metadata reply.
#[derive(Debug, Clone)]
pub enum ScriptedProduct {
    Ok(ProductInfo),
    Timeout,
}

/// Scripted outcome for one depot's manifest fetch.
#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    /// Write `{depot}_{manifest}.manifest` and `config.vdf` into the target
    /// worktree and report `removed` as the delete-list.
    WriteFiles { removed: Vec<String> },
    /// Metadata-only confirmation of an existing commit.
    ConfirmCommit(String),
    /// Unsuccessful fetch with a remote status code.
    Fail(i32),
}

// ---------------------------------------------------------------------------
// ScriptedSession
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionScript {
    relogin: VecDeque<LoginCode>,
    login: VecDeque<LoginCode>,
    interactive: VecDeque<LoginCode>,
    anonymous: VecDeque<LoginCode>,
    product: VecDeque<ScriptedProduct>,
}

/// Scripted [`RemoteSession`] recording every call it receives.
pub struct ScriptedSession {
    script: Mutex<SessionScript>,
    content: Mutex<Option<Arc<ScriptedContent>>>,
    open_content_failures: AtomicUsize,
    relogin_calls: AtomicUsize,
    login_calls: AtomicUsize,
    interactive_calls: AtomicUsize,
    anonymous_calls: AtomicUsize,
    product_calls: AtomicUsize,
    one_time_codes: Mutex<Vec<Option<String>>>,
    product_queries: Mutex<Vec<ProductQuery>>,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(SessionScript::default()),
            content: Mutex::new(None),
            open_content_failures: AtomicUsize::new(0),
            relogin_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            interactive_calls: AtomicUsize::new(0),
            anonymous_calls: AtomicUsize::new(0),
            product_calls: AtomicUsize::new(0),
            one_time_codes: Mutex::new(Vec::new()),
            product_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_relogin(self, codes: Vec<LoginCode>) -> Self {
        self.script.lock().expect("script lock").relogin = codes.into();
        self
    }

    pub fn with_login(self, codes: Vec<LoginCode>) -> Self {
        self.script.lock().expect("script lock").login = codes.into();
        self
    }

    pub fn with_interactive(self, codes: Vec<LoginCode>) -> Self {
        self.script.lock().expect("script lock").interactive = codes.into();
        self
    }

    pub fn with_anonymous(self, codes: Vec<LoginCode>) -> Self {
        self.script.lock().expect("script lock").anonymous = codes.into();
        self
    }

    pub fn with_product_info(self, replies: Vec<ScriptedProduct>) -> Self {
        self.script.lock().expect("script lock").product = replies.into();
        self
    }

    pub fn with_content(self, content: Arc<ScriptedContent>) -> Self {
        *self.content.lock().expect("content lock") = Some(content);
        self
    }

    /// Make the next `n` `open_content` calls time out.
    pub fn with_open_content_failures(self, n: usize) -> Self {
        self.open_content_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn relogin_calls(&self) -> usize {
        self.relogin_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn interactive_calls(&self) -> usize {
        self.interactive_calls.load(Ordering::SeqCst)
    }

    pub fn anonymous_calls(&self) -> usize {
        self.anonymous_calls.load(Ordering::SeqCst)
    }

    pub fn product_calls(&self) -> usize {
        self.product_calls.load(Ordering::SeqCst)
    }

    pub fn seen_one_time_codes(&self) -> Vec<Option<String>> {
        self.one_time_codes.lock().expect("codes lock").clone()
    }

    pub fn seen_product_queries(&self) -> Vec<ProductQuery> {
        self.product_queries.lock().expect("queries lock").clone()
    }

    fn pop(queue: &mut VecDeque<LoginCode>) -> LoginCode {
        queue.pop_front().unwrap_or(LoginCode::Ok)
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn relogin(&self) -> Result<LoginCode, SessionError> {
        self.relogin_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("script lock");
        Ok(script.relogin.pop_front().unwrap_or(LoginCode::Fail))
    }

    async fn login(
        &self,
        _username: &str,
        _password: &str,
        one_time_code: Option<&str>,
    ) -> Result<LoginCode, SessionError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.one_time_codes
            .lock()
            .expect("codes lock")
            .push(one_time_code.map(str::to_owned));
        let mut script = self.script.lock().expect("script lock");
        Ok(Self::pop(&mut script.login))
    }

    async fn interactive_login(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<LoginCode, SessionError> {
        self.interactive_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("script lock");
        Ok(Self::pop(&mut script.interactive))
    }

    async fn anonymous_login(&self) -> Result<LoginCode, SessionError> {
        self.anonymous_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("script lock");
        Ok(Self::pop(&mut script.anonymous))
    }

    async fn product_info(
        &self,
        query: ProductQuery,
        _timeout: Duration,
    ) -> Result<ProductInfo, SessionError> {
        self.product_calls.fetch_add(1, Ordering::SeqCst);
        self.product_queries
            .lock()
            .expect("queries lock")
            .push(query);
        let reply = {
            let mut script = self.script.lock().expect("script lock");
            script.product.pop_front()
        };
        match reply {
            Some(ScriptedProduct::Ok(info)) => Ok(info),
            Some(ScriptedProduct::Timeout) => Err(SessionError::Timeout {
                operation: "product_info".to_string(),
            }),
            None => Ok(ProductInfo::default()),
        }
    }

    async fn open_content(&self) -> Result<Arc<dyn ContentClient>, SessionError> {
        let failures = self.open_content_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.open_content_failures.store(failures - 1, Ordering::SeqCst);
            return Err(SessionError::Timeout {
                operation: "open_content".to_string(),
            });
        }
        let content = self
            .content
            .lock()
            .expect("content lock")
            .clone()
            .unwrap_or_else(|| Arc::new(ScriptedContent::new()));
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// ScriptedContent
// ---------------------------------------------------------------------------

/// Scripted [`ContentClient`].
pub struct ScriptedContent {
    packages: Vec<PackageId>,
    licensed: HashSet<u32>,
    outcomes: Mutex<HashMap<(u32, u32), ScriptedFetch>>,
    fetched: Mutex<Vec<(AppId, DepotId, ManifestId)>>,
}

impl Default for ScriptedContent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedContent {
    pub fn new() -> Self {
        Self {
            packages: Vec::new(),
            licensed: HashSet::new(),
            outcomes: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_packages(mut self, packages: Vec<PackageId>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_licensed_depots(mut self, depots: impl IntoIterator<Item = u32>) -> Self {
        self.licensed.extend(depots);
        self
    }

    pub fn with_outcome(self, app: AppId, depot: DepotId, outcome: ScriptedFetch) -> Self {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .insert((app.0, depot.0), outcome);
        self
    }

    /// Every `(app, depot, manifest)` fetch this client served, in order.
    pub fn fetch_calls(&self) -> Vec<(AppId, DepotId, ManifestId)> {
        self.fetched.lock().expect("fetched lock").clone()
    }
}

#[async_trait]
impl ContentClient for ScriptedContent {
    fn licensed_packages(&self) -> Vec<PackageId> {
        self.packages.clone()
    }

    fn is_depot_licensed(&self, depot: DepotId) -> bool {
        self.licensed.contains(&depot.0)
    }

    async fn fetch_manifest(
        &self,
        app: AppId,
        depot: DepotId,
        manifest: &ManifestId,
        target_dir: &Path,
    ) -> Result<ManifestFetch, SessionError> {
        self.fetched
            .lock()
            .expect("fetched lock")
            .push((app, depot, manifest.clone()));
        let outcome = self
            .outcomes
            .lock()
            .expect("outcomes lock")
            .get(&(app.0, depot.0))
            .cloned()
            .unwrap_or(ScriptedFetch::WriteFiles { removed: vec![] });
        match outcome {
            ScriptedFetch::WriteFiles { removed } => {
                let manifest_file = target_dir.join(format!("{depot}_{manifest}.manifest"));
                std::fs::write(&manifest_file, format!("manifest {depot} {manifest}\n"))
                    .map_err(|e| crate::error::io_err("scripted manifest write", e))?;
                std::fs::write(target_dir.join("config.vdf"), "config\n")
                    .map_err(|e| crate::error::io_err("scripted config write", e))?;
                Ok(ManifestFetch {
                    manifest_commit: None,
                    removed_files: removed,
                })
            }
            ScriptedFetch::ConfirmCommit(commit) => Ok(ManifestFetch {
                manifest_commit: Some(commit),
                removed_files: vec![],
            }),
            ScriptedFetch::Fail(code) => Err(SessionError::FetchFailed { code }),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedFactory
// ---------------------------------------------------------------------------

/// Scripted [`SessionFactory`] handing out per-user sessions.
///
/// Unknown users receive a fresh default session (every call succeeds with
/// empty results).
pub struct ScriptedFactory {
    sessions: Mutex<HashMap<String, Arc<ScriptedSession>>>,
    anonymous: Mutex<Option<Arc<ScriptedSession>>>,
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            anonymous: Mutex::new(None),
        }
    }

    pub fn with_user(self, username: &str, session: Arc<ScriptedSession>) -> Self {
        self.sessions
            .lock()
            .expect("sessions lock")
            .insert(username.to_string(), session);
        self
    }

    pub fn with_anonymous(self, session: Arc<ScriptedSession>) -> Self {
        *self.anonymous.lock().expect("anonymous lock") = Some(session);
        self
    }
}

impl SessionFactory for ScriptedFactory {
    fn open_session(
        &self,
        username: Option<&str>,
    ) -> Result<Arc<dyn RemoteSession>, SessionError> {
        match username {
            Some(user) => {
                let session = self
                    .sessions
                    .lock()
                    .expect("sessions lock")
                    .get(user)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(ScriptedSession::new()));
                Ok(session)
            }
            None => {
                let session = self
                    .anonymous
                    .lock()
                    .expect("anonymous lock")
                    .clone()
                    .unwrap_or_else(|| Arc::new(ScriptedSession::new()));
                Ok(session)
            }
        }
    }
}
