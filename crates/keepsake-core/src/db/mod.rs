//! Database layer for Keepsake

mod connection;
mod migrations;
mod repository;
mod store;

pub use connection::Database;
pub use repository::SqliteRecordStore;
pub use store::{ensure_profile, LocalRecordStore, RecordQuery};
