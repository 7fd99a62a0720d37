//! Remote document store contract
//!
//! The remote store is a per-user tree of collections
//! (`users/{uid}/profile`, `users/{uid}/notes`) holding JSON documents.
//! Listeners receive a full snapshot of the collection on subscribe and after
//! every change.

mod document;
mod file;
mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::RecordKind;

pub use document::{Document, NoteDocument, ProfileDocument, PROFILE_DOCUMENT_ID};
pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;

/// Result alias for remote store calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Errors at the remote store boundary
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Store unreachable (offline, transport failure)
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// A document could not be decoded into a record
    #[error("Failed to decode document {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("Remote serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Account cascade left some paths behind
    #[error("Cascade delete incomplete; failed paths: {}", failed.join(", "))]
    CascadeIncomplete { failed: Vec<String> },

    /// The store refused the write
    #[error("Remote store rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub(crate) fn decode(id: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Decode {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

/// A per-user collection, rendered `users/{uid}/{collection}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath {
    pub user_id: String,
    pub kind: RecordKind,
}

impl CollectionPath {
    pub fn new(user_id: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
        }
    }

    /// Path of a single document in this collection
    pub fn document(&self, id: &str) -> String {
        format!("{self}/{id}")
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "users/{}/{}", self.user_id, self.kind.collection())
    }
}

/// Callback invoked with the full collection snapshot
pub type ChangeHandler = Arc<dyn Fn(Vec<Document>) + Send + Sync>;

/// Handle for a listener registration; removes it when dropped
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the registration; later calls are no-ops
    pub fn remove(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Remote document store operations used by the sync engine
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// Fetch one document
    async fn get(&self, path: &CollectionPath, id: &str) -> RemoteResult<Option<Document>>;

    /// Fetch every document of a collection
    async fn list(&self, path: &CollectionPath) -> RemoteResult<Vec<Document>>;

    /// Write a document; with `merge`, top-level fields are merged into the
    /// existing document instead of replacing it
    async fn set(
        &self,
        path: &CollectionPath,
        id: &str,
        document: Document,
        merge: bool,
    ) -> RemoteResult<()>;

    /// Delete one document; deleting a missing document succeeds
    async fn delete(&self, path: &CollectionPath, id: &str) -> RemoteResult<()>;

    /// Subscribe to snapshots of a collection
    fn listen(&self, path: &CollectionPath, handler: ChangeHandler) -> RemoteResult<Subscription>;

    /// Delete every note, the profile, then the user root
    async fn delete_all(&self, user_id: &str) -> RemoteResult<()>;
}
