//! keepsake-core - Core library for Keepsake
//!
//! This crate contains the record models, the local and remote stores, the
//! profile cache, and the sync engine that keeps a device's local store
//! converging with the user's remote document tree.

pub mod account;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod session;
pub mod state;
pub mod sync;
mod util;

pub use account::{delete_account, IdentityProvider, LocalIdentity};
pub use cache::ProfileCache;
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{Note, Profile, Record, RecordId, RecordKind};
pub use session::{run_session_loop, SessionEvent};
pub use state::{SyncEvent, SyncSnapshot, SyncStatus};
pub use sync::SyncEngine;
