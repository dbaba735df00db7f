//! Harvester core library — domain types, persisted records, shared state.
//!
//! Public API surface:
//! - [`types`] — identifier newtypes and classification enums
//! - [`records`] — persisted JSON record files (load / flush)
//! - [`state`] — the synchronized run state with atomic accessors
//! - [`error`] — [`StateError`]

pub mod error;
pub mod records;
pub mod state;
pub mod types;

pub use error::StateError;
pub use records::{StateRecords, UserRecord};
pub use state::{Admission, SharedState};
pub use types::{AppCategory, AppId, BillingClass, DepotId, ManifestId, PackageId};
