//! Unix-socket bridge to the session collaborator process.
//!
//! The wire protocol is newline-delimited JSON, one request and one reply per
//! connection:
//!
//! ```text
//! -> {"op":"login","session":"alice","username":"alice","password":"…"}
//! <- {"ok":true,"code":1}
//! ```
//!
//! `ok:false` marks a transport/protocol-level failure (`error` carries the
//! message, `code` an optional remote status); login-family replies carry the
//! remote result in `code`, product metadata and content descriptors in
//! `data`. The bridge process owns credential caching (per-session sentry and
//! login key) and the actual CDN traffic; manifest files are written by the
//! bridge directly into the worktree directory this side names.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use harvester_core::types::{
    AppCategory, AppId, BillingClass, DepotId, ManifestId, PackageId,
};

use crate::codes::LoginCode;
use crate::error::{io_err, SessionError};
use crate::ports::{
    AppInfo, ContentClient, DepotManifests, ManifestFetch, PackageInfo, ProductInfo,
    ProductQuery, RemoteSession, SessionFactory,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BridgeReply {
    ok: bool,
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireProductInfo {
    #[serde(default)]
    apps: BTreeMap<u32, WireApp>,
    #[serde(default)]
    packages: BTreeMap<u32, WirePackage>,
}

#[derive(Debug, Deserialize)]
struct WireApp {
    #[serde(rename = "type", default)]
    category: Option<String>,
    /// Depot keys arrive as raw strings; non-numeric entries (branch
    /// metadata and the like) are filtered out during conversion.
    #[serde(default)]
    depots: BTreeMap<String, WireDepot>,
}

#[derive(Debug, Deserialize)]
struct WireDepot {
    #[serde(default)]
    manifests: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct WirePackage {
    #[serde(default)]
    billing_type: u32,
    #[serde(default)]
    app_ids: Vec<u32>,
    #[serde(default)]
    depot_ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    packages: Vec<u32>,
    #[serde(default)]
    licensed_app_ids: Vec<u32>,
    #[serde(default)]
    licensed_depot_ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct WireManifestFetch {
    #[serde(default)]
    manifest_commit: Option<String>,
    #[serde(default)]
    removed_files: Vec<String>,
}

fn product_info_from_wire(wire: WireProductInfo) -> ProductInfo {
    let mut info = ProductInfo::default();
    for (app_id, app) in wire.apps {
        let mut depots = BTreeMap::new();
        for (raw_depot, depot) in app.depots {
            let Ok(depot_id) = raw_depot.parse::<u32>() else {
                continue;
            };
            depots.insert(
                DepotId(depot_id),
                DepotManifests {
                    public: depot.manifests.get("public").cloned().map(ManifestId),
                },
            );
        }
        info.apps.insert(
            AppId(app_id),
            AppInfo {
                category: app
                    .category
                    .as_deref()
                    .map(AppCategory::parse)
                    .unwrap_or(AppCategory::Unknown(String::new())),
                depots,
            },
        );
    }
    for (package_id, package) in wire.packages {
        info.packages.insert(
            PackageId(package_id),
            PackageInfo {
                billing: BillingClass::from_code(package.billing_type),
                app_ids: package.app_ids.into_iter().map(AppId).collect(),
                depot_ids: package.depot_ids.into_iter().map(DepotId).collect(),
            },
        );
    }
    info
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Opens [`BridgeSession`]s against one bridge socket.
pub struct BridgeConnector {
    socket: PathBuf,
}

impl BridgeConnector {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }
}

impl SessionFactory for BridgeConnector {
    fn open_session(
        &self,
        username: Option<&str>,
    ) -> Result<Arc<dyn RemoteSession>, SessionError> {
        Ok(Arc::new(BridgeSession {
            socket: self.socket.clone(),
            session: username.map(str::to_owned),
        }))
    }
}

/// One bridge-backed session; `session` scopes collaborator-side credential
/// caching (absent for anonymous sessions).
pub struct BridgeSession {
    socket: PathBuf,
    session: Option<String>,
}

impl BridgeSession {
    async fn call(&self, op: &str, mut payload: Value) -> Result<BridgeReply, SessionError> {
        payload["op"] = json!(op);
        if let Some(session) = &self.session {
            payload["session"] = json!(session);
        }

        let stream = UnixStream::connect(&self.socket).await.map_err(|source| {
            SessionError::BridgeUnavailable {
                socket: self.socket.clone(),
                source,
            }
        })?;
        let (reader, mut writer) = stream.into_split();

        let request = payload.to_string();
        writer
            .write_all(request.as_bytes())
            .await
            .map_err(|e| io_err(op, e))?;
        writer.write_all(b"\n").await.map_err(|e| io_err(op, e))?;
        writer.flush().await.map_err(|e| io_err(op, e))?;

        let mut lines = BufReader::new(reader).lines();
        let line = lines
            .next_line()
            .await
            .map_err(|e| io_err(op, e))?
            .ok_or_else(|| {
                SessionError::Protocol(format!("bridge closed connection during {op}"))
            })?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Run a login-family op and extract the remote result code.
    async fn login_call(&self, op: &str, payload: Value) -> Result<LoginCode, SessionError> {
        let reply = self.call(op, payload).await?;
        if !reply.ok {
            return Err(protocol_err(op, reply));
        }
        let code = reply
            .code
            .ok_or_else(|| SessionError::Protocol(format!("{op} reply carried no code")))?;
        Ok(LoginCode::from_status(code))
    }

    async fn data_call(&self, op: &str, payload: Value) -> Result<Value, SessionError> {
        let reply = self.call(op, payload).await?;
        if !reply.ok {
            return Err(protocol_err(op, reply));
        }
        reply
            .data
            .ok_or_else(|| SessionError::Protocol(format!("{op} reply carried no data")))
    }
}

fn protocol_err(op: &str, reply: BridgeReply) -> SessionError {
    match reply.code {
        Some(code) => SessionError::FetchFailed { code },
        None => SessionError::Protocol(
            reply
                .error
                .unwrap_or_else(|| format!("{op} failed without detail")),
        ),
    }
}

#[async_trait]
impl RemoteSession for BridgeSession {
    async fn relogin(&self) -> Result<LoginCode, SessionError> {
        self.login_call("relogin", json!({})).await
    }

    async fn login(
        &self,
        username: &str,
        password: &str,
        one_time_code: Option<&str>,
    ) -> Result<LoginCode, SessionError> {
        self.login_call(
            "login",
            json!({
                "username": username,
                "password": password,
                "one_time_code": one_time_code,
            }),
        )
        .await
    }

    async fn interactive_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginCode, SessionError> {
        self.login_call(
            "interactive_login",
            json!({ "username": username, "password": password }),
        )
        .await
    }

    async fn anonymous_login(&self) -> Result<LoginCode, SessionError> {
        self.login_call("anonymous_login", json!({})).await
    }

    async fn product_info(
        &self,
        query: ProductQuery,
        timeout: Duration,
    ) -> Result<ProductInfo, SessionError> {
        let payload = match &query {
            ProductQuery::Apps(apps) => {
                json!({ "apps": apps.iter().map(|a| a.0).collect::<Vec<_>>() })
            }
            ProductQuery::Packages(packages) => {
                json!({ "packages": packages.iter().map(|p| p.0).collect::<Vec<_>>() })
            }
        };
        let data = tokio::time::timeout(timeout, self.data_call("product_info", payload))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "product_info".to_string(),
            })??;
        let wire: WireProductInfo = serde_json::from_value(data)?;
        Ok(product_info_from_wire(wire))
    }

    async fn open_content(&self) -> Result<Arc<dyn ContentClient>, SessionError> {
        let data = self.data_call("open_content", json!({})).await?;
        let wire: WireContent = serde_json::from_value(data)?;
        let mut licensed: std::collections::HashSet<u32> =
            wire.licensed_depot_ids.into_iter().collect();
        licensed.extend(wire.licensed_app_ids);
        Ok(Arc::new(BridgeContent {
            session: BridgeSession {
                socket: self.socket.clone(),
                session: self.session.clone(),
            },
            packages: wire.packages.into_iter().map(PackageId).collect(),
            licensed,
        }))
    }
}

/// Content access backed by the same bridge socket.
pub struct BridgeContent {
    session: BridgeSession,
    packages: Vec<PackageId>,
    licensed: std::collections::HashSet<u32>,
}

#[async_trait]
impl ContentClient for BridgeContent {
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
        let data = self
            .session
            .data_call(
                "fetch_manifest",
                json!({
                    "app": app.0,
                    "depot": depot.0,
                    "manifest": manifest.0,
                    "target_dir": target_dir.display().to_string(),
                }),
            )
            .await?;
        let wire: WireManifestFetch = serde_json::from_value(data)?;
        Ok(ManifestFetch {
            manifest_commit: wire.manifest_commit,
            removed_files: wire.removed_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::UnixListener;

    use super::*;

    /// Serve exactly one scripted reply on a fresh socket.
    async fn serve_one(dir: &Path, reply: &'static str) -> PathBuf {
        let socket = dir.join("bridge.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let _request = lines.next_line().await.expect("read").expect("line");
            writer
                .write_all(reply.as_bytes())
                .await
                .expect("write reply");
            writer.write_all(b"\n").await.expect("write newline");
        });
        socket
    }

    #[tokio::test]
    async fn login_reply_code_maps_to_login_code() {
        let dir = tempfile::tempdir().expect("dir");
        let socket = serve_one(dir.path(), r#"{"ok":true,"code":84}"#).await;
        let connector = BridgeConnector::new(&socket);
        let session = connector.open_session(Some("alice")).expect("session");

        let code = session.relogin().await.expect("reply");
        assert_eq!(code, LoginCode::RateLimitExceeded);
    }

    #[tokio::test]
    async fn missing_socket_is_bridge_unavailable() {
        let dir = tempfile::tempdir().expect("dir");
        let connector = BridgeConnector::new(dir.path().join("absent.sock"));
        let session = connector.open_session(None).expect("session");

        let err = session.anonymous_login().await.expect_err("no bridge");
        assert!(matches!(err, SessionError::BridgeUnavailable { .. }));
    }

    #[tokio::test]
    async fn product_info_parses_wire_shape() {
        let dir = tempfile::tempdir().expect("dir");
        let reply = r#"{"ok":true,"data":{"apps":{"100":{"type":"Game","depots":{"200":{"manifests":{"public":"abc"}},"branches":{}}}},"packages":{"7":{"billing_type":1,"app_ids":[100],"depot_ids":[200]}}}}"#;
        let socket = serve_one(dir.path(), reply).await;
        let connector = BridgeConnector::new(&socket);
        let session = connector.open_session(Some("alice")).expect("session");

        let info = session
            .product_info(ProductQuery::Apps(vec![AppId(100)]), Duration::from_secs(5))
            .await
            .expect("product info");

        let app = info.apps.get(&AppId(100)).expect("app present");
        assert_eq!(app.category, AppCategory::Game);
        assert_eq!(
            app.depots.get(&DepotId(200)).and_then(|d| d.public.clone()),
            Some(ManifestId::from("abc"))
        );
        // Non-numeric depot keys are dropped.
        assert_eq!(app.depots.len(), 1);
        let package = info.packages.get(&PackageId(7)).expect("package present");
        assert!(package.billing.grants_ownership());
    }

    #[tokio::test]
    async fn failed_fetch_surfaces_remote_code() {
        let dir = tempfile::tempdir().expect("dir");
        let socket = serve_one(dir.path(), r#"{"ok":false,"code":2,"error":"depot gone"}"#).await;
        let session = BridgeSession {
            socket,
            session: Some("alice".to_string()),
        };
        let content = BridgeContent {
            session,
            packages: vec![],
            licensed: [200].into_iter().collect(),
        };

        let err = content
            .fetch_manifest(
                AppId(100),
                DepotId(200),
                &ManifestId::from("abc"),
                dir.path(),
            )
            .await
            .expect_err("fetch fails");
        assert!(matches!(err, SessionError::FetchFailed { code: 2 }));
    }
}
