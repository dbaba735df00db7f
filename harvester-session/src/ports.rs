//! Port traits for the session collaborator.
//!
//! The wire-level authentication/CDN protocol lives outside this workspace;
//! these traits are the seam. [`crate::bridge`] ships the production
//! implementation (JSON lines over a Unix socket to a companion process) and
//! [`crate::testing`] ships scripted doubles for tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use harvester_core::types::{AppCategory, AppId, BillingClass, DepotId, ManifestId, PackageId};

use crate::codes::LoginCode;
use crate::error::SessionError;

// ---------------------------------------------------------------------------
// Product metadata
// ---------------------------------------------------------------------------

/// A product metadata query: either applications or license packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductQuery {
    Apps(Vec<AppId>),
    Packages(Vec<PackageId>),
}

/// Published manifest ids of one depot, keyed by channel. Only the "public"
/// channel is archived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepotManifests {
    pub public: Option<ManifestId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub category: AppCategory,
    pub depots: BTreeMap<DepotId, DepotManifests>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub billing: BillingClass,
    pub app_ids: Vec<AppId>,
    pub depot_ids: Vec<DepotId>,
}

/// Typed result of a product metadata fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductInfo {
    pub apps: BTreeMap<AppId, AppInfo>,
    pub packages: BTreeMap<PackageId, PackageInfo>,
}

/// Typed result of a manifest fetch.
///
/// Either the collaborator confirmed an existing commit (`manifest_commit`,
/// metadata-only — the version store tags it in place), or it wrote the new
/// manifest and config descriptor into the target worktree and reports which
/// previously tracked files the new manifest no longer references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestFetch {
    pub manifest_commit: Option<String>,
    pub removed_files: Vec<String>,
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// One account-scoped (or anonymous) session against the remote service.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Attempt a cached-credential relogin.
    async fn relogin(&self) -> Result<LoginCode, SessionError>;

    /// Full password login. The collaborator supplies its own cached login
    /// key; `one_time_code` is derived from the stored two-factor secret.
    async fn login(
        &self,
        username: &str,
        password: &str,
        one_time_code: Option<&str>,
    ) -> Result<LoginCode, SessionError>;

    /// Interactive fallback: the collaborator prompts on its own terminal.
    async fn interactive_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginCode, SessionError>;

    /// Identity-free login for the staleness sweep.
    async fn anonymous_login(&self) -> Result<LoginCode, SessionError>;

    /// Fetch product metadata with a per-call deadline.
    async fn product_info(
        &self,
        query: ProductQuery,
        timeout: Duration,
    ) -> Result<ProductInfo, SessionError>;

    /// Open the content session for a logged-in account.
    async fn open_content(&self) -> Result<Arc<dyn ContentClient>, SessionError>;
}

/// Content-delivery access for one logged-in account.
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// License packages the account holds.
    fn licensed_packages(&self) -> Vec<PackageId>;

    /// Whether a depot id is covered by the account's licenses (depot grants
    /// and app-wide grants both count).
    fn is_depot_licensed(&self, depot: DepotId) -> bool;

    /// Fetch one manifest version into `target_dir` (the application's
    /// worktree).
    async fn fetch_manifest(
        &self,
        app: AppId,
        depot: DepotId,
        manifest: &ManifestId,
        target_dir: &Path,
    ) -> Result<ManifestFetch, SessionError>;
}

/// Opens sessions. One session is opened per processed account plus one
/// anonymous session for the staleness sweep.
pub trait SessionFactory: Send + Sync {
    /// `username` scopes collaborator-side credential caching; `None` opens
    /// an anonymous session.
    fn open_session(&self, username: Option<&str>) -> Result<Arc<dyn RemoteSession>, SessionError>;
}
