//! Staleness sweep tests for `harvester-detector`.
//!
//! Every case drives the sweep through scripted sessions — no network, no
//! filesystem.

use std::collections::BTreeMap;
use std::sync::Arc;

use harvester_core::records::StateRecords;
use harvester_core::state::SharedState;
use harvester_core::types::{AppCategory, AppId, DepotId, ManifestId};
use harvester_detector::{detect_stale_users, DetectError, METADATA_BATCH};
use harvester_session::codes::LoginCode;
use harvester_session::ports::{AppInfo, DepotManifests, ProductInfo, ProductQuery};
use harvester_session::testing::{ScriptedFactory, ScriptedProduct, ScriptedSession};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn app_with_depot(app: AppId, depot: DepotId, published: &str) -> (AppId, AppInfo) {
    (
        app,
        AppInfo {
            category: AppCategory::Game,
            depots: BTreeMap::from([(
                depot,
                DepotManifests {
                    public: Some(ManifestId::from(published)),
                },
            )]),
        },
    )
}

fn product_info(apps: Vec<(AppId, AppInfo)>) -> ProductInfo {
    ProductInfo {
        apps: apps.into_iter().collect(),
        packages: BTreeMap::new(),
    }
}

fn state_with_owner(username: &str, app: AppId, depot: DepotId, recorded: &str) -> SharedState {
    let mut records = StateRecords::default();
    records
        .accounts
        .insert(username.to_string(), "pw".to_string());
    let state = SharedState::new(records);
    state.admit(username, 0, 0);
    state.record_owned_app(username, app);
    state.record_depot_version(depot, ManifestId::from(recorded));
    state
}

fn factory_with_sweep(replies: Vec<ScriptedProduct>) -> (ScriptedFactory, Arc<ScriptedSession>) {
    let session = Arc::new(ScriptedSession::new().with_product_info(replies));
    let factory = ScriptedFactory::new().with_anonymous(session.clone());
    (factory, session)
}

// ---------------------------------------------------------------------------
// Cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn changed_version_marks_app_and_owner_stale() {
    let state = state_with_owner("alice", AppId(100), DepotId(200), "v1");
    let (factory, _session) = factory_with_sweep(vec![ScriptedProduct::Ok(product_info(vec![
        app_with_depot(AppId(100), DepotId(200), "v2"),
    ]))]);

    let report = detect_stale_users(&state, &factory, 3).await.expect("sweep");
    assert!(report.stale_apps.contains(&AppId(100)));
    assert!(report.users.contains("alice"));
    assert_eq!(
        report.stale_owners.get(&AppId(100)),
        Some(&vec!["alice".to_string()])
    );
}

#[tokio::test]
async fn matching_version_is_not_stale() {
    let state = state_with_owner("alice", AppId(100), DepotId(200), "v1");
    let (factory, _session) = factory_with_sweep(vec![ScriptedProduct::Ok(product_info(vec![
        app_with_depot(AppId(100), DepotId(200), "v1"),
    ]))]);

    let report = detect_stale_users(&state, &factory, 3).await.expect("sweep");
    assert!(report.stale_apps.is_empty());
    assert!(report.users.is_empty());
}

#[tokio::test]
async fn unrecorded_depot_is_not_stale() {
    // Depot 201 was never fetched; only recorded depots can be stale.
    let state = state_with_owner("alice", AppId(100), DepotId(200), "v1");
    let (factory, _session) = factory_with_sweep(vec![ScriptedProduct::Ok(product_info(vec![
        app_with_depot(AppId(100), DepotId(201), "v9"),
    ]))]);

    let report = detect_stale_users(&state, &factory, 3).await.expect("sweep");
    assert!(report.stale_apps.is_empty());
}

#[tokio::test]
async fn never_processed_accounts_join_the_queue() {
    let mut records = StateRecords::default();
    records.accounts.insert("alice".into(), "pw".into());
    records.accounts.insert("bob".into(), "pw".into());
    let state = SharedState::new(records);
    state.admit("alice", 0, 0); // alice has a record, bob does not

    let (factory, _session) = factory_with_sweep(vec![]);
    let report = detect_stale_users(&state, &factory, 3).await.expect("sweep");
    assert!(!report.users.contains("alice"));
    assert!(report.users.contains("bob"));
}

#[tokio::test]
async fn disabled_owners_are_not_queued() {
    let state = state_with_owner("alice", AppId(100), DepotId(200), "v1");
    state.disable_user("alice", Some(63));
    let (factory, _session) = factory_with_sweep(vec![ScriptedProduct::Ok(product_info(vec![
        app_with_depot(AppId(100), DepotId(200), "v2"),
    ]))]);

    let report = detect_stale_users(&state, &factory, 3).await.expect("sweep");
    assert!(report.users.is_empty());
}

#[tokio::test]
async fn sweep_batches_large_app_sets() {
    let mut records = StateRecords::default();
    records.accounts.insert("alice".into(), "pw".into());
    let state = SharedState::new(records);
    state.admit("alice", 0, 0);
    for id in 0..(METADATA_BATCH as u32 + 1) {
        state.record_owned_app("alice", AppId(id));
    }

    let (factory, session) = factory_with_sweep(vec![
        ScriptedProduct::Ok(ProductInfo::default()),
        ScriptedProduct::Ok(ProductInfo::default()),
    ]);
    detect_stale_users(&state, &factory, 3).await.expect("sweep");

    let queries = session.seen_product_queries();
    assert_eq!(queries.len(), 2);
    match (&queries[0], &queries[1]) {
        (ProductQuery::Apps(first), ProductQuery::Apps(second)) => {
            assert_eq!(first.len(), METADATA_BATCH);
            assert_eq!(second.len(), 1);
        }
        other => panic!("expected app queries, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_batch_is_skipped_not_fatal() {
    let state = state_with_owner("alice", AppId(100), DepotId(200), "v1");
    // Both attempts of the only batch time out; the sweep still completes.
    let (factory, session) = factory_with_sweep(vec![
        ScriptedProduct::Timeout,
        ScriptedProduct::Timeout,
    ]);

    let report = detect_stale_users(&state, &factory, 2).await.expect("sweep");
    assert!(report.stale_apps.is_empty());
    assert_eq!(session.anonymous_calls(), 1);
    assert_eq!(session.product_calls(), 2);
}

#[tokio::test]
async fn anonymous_login_failure_is_fatal_for_the_sweep() {
    let state = state_with_owner("alice", AppId(100), DepotId(200), "v1");
    let session = Arc::new(
        ScriptedSession::new().with_anonymous(vec![LoginCode::ServiceUnavailable]),
    );
    let factory = ScriptedFactory::new().with_anonymous(session);

    let err = detect_stale_users(&state, &factory, 3)
        .await
        .expect_err("sweep fails");
    assert!(matches!(
        err,
        DetectError::AnonymousLogin {
            code: LoginCode::ServiceUnavailable
        }
    ));
}
