//! Observable sync state shared with clients.

use std::fmt;

use crate::models::RecordKind;

/// Sync status shown by clients.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error(String),
    Offline,
}

impl SyncStatus {
    /// Whether a sync is currently running.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Syncing)
    }

    /// Error message when the status is `Error`.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Error(message) => write!(f, "error: {message}"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Point-in-time view of the engine published to observers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub status: SyncStatus,
    /// Unix ms of the last completed sync pass
    pub last_sync_at: Option<i64>,
    /// Local changes not yet confirmed by the remote store
    pub pending_changes: usize,
    /// Local writes waiting for a successful save
    pub outbox_len: usize,
}

/// Broadcast notifications emitted by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// Bootstrap download finished for a user on this device.
    InitialSyncCompleted { user_id: String },
    /// An upload pass finished.
    UploadPassCompleted { uploaded: usize, failed: usize },
    /// A remote listener batch was reconciled into the local store.
    RemoteChangesApplied { kind: RecordKind, changed: usize },
    /// The session stopped while local writes still could not be saved.
    LocalWritesDropped { user_id: String, dropped: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_includes_error_message() {
        let status = SyncStatus::Error("Sync failed: offline".to_string());
        assert_eq!(status.to_string(), "error: Sync failed: offline");
        assert_eq!(status.error_message(), Some("Sync failed: offline"));
        assert!(!status.is_active());
        assert!(SyncStatus::Syncing.is_active());
    }
}
