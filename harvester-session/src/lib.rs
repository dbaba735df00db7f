//! # harvester-session
//!
//! Account sessions against the remote content service: the collaborator
//! port traits, the login state machine with rate-limit backoff, one-time
//! code derivation, the bounded retry helper, and the Unix-socket bridge
//! implementation of the ports.

pub mod account;
pub mod bridge;
pub mod codes;
pub mod error;
pub mod guard;
pub mod ports;
pub mod retry;
pub mod testing;

pub use account::{AccountSession, LoginOutcome};
pub use bridge::{BridgeConnector, BridgeSession};
pub use codes::LoginCode;
pub use error::SessionError;
pub use ports::{
    AppInfo, ContentClient, DepotManifests, ManifestFetch, PackageInfo, ProductInfo,
    ProductQuery, RemoteSession, SessionFactory,
};
pub use retry::{retry, transient_only, ErrorClass};
