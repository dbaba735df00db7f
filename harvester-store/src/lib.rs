//! # harvester-store
//!
//! Git-backed manifest archive: one branch/worktree per application, one
//! lightweight tag per archived `(depot, manifest)` version, and a `state`
//! branch carrying the persisted record files.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{tag_name, VersionStore, BASE_BRANCH, DEPOTS_DIR, STATE_BRANCH, STATE_DIR};
