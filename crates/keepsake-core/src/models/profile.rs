//! User profile model

use serde::{Deserialize, Serialize};

use super::record::{advance_timestamp, RecordId};
use crate::util::now_millis;

/// Name shown until the user picks one
pub const DEFAULT_PROFILE_NAME: &str = "User";

/// The single profile record kept per user on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: RecordId,
    pub name: String,
    pub has_completed_onboarding: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    pub needs_sync: bool,
}

impl Profile {
    /// Create a profile authored on this device (dirty until uploaded)
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: RecordId::new(),
            name: name.into(),
            has_completed_onboarding: false,
            created_at: now,
            updated_at: now,
            needs_sync: true,
        }
    }

    /// Placeholder created by fetch-or-create; carries no user edits
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            needs_sync: false,
            ..Self::new(DEFAULT_PROFILE_NAME)
        }
    }

    /// Mark as locally modified
    pub fn touch(&mut self) {
        self.updated_at = advance_timestamp(self.updated_at).max(self.created_at);
        self.needs_sync = true;
    }
}
