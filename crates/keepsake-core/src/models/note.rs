//! Note model

use serde::{Deserialize, Serialize};

use super::record::{advance_timestamp, RecordId};
use crate::util::now_millis;

/// A note in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: RecordId,
    /// Title line
    pub title: String,
    /// Free-form body text
    pub body: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Local state not yet confirmed on the remote store
    pub needs_sync: bool,
}

impl Note {
    /// Create a new locally authored note (dirty until uploaded)
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: RecordId::new(),
            title: title.into(),
            body: body.into(),
            created_at: now,
            updated_at: now,
            needs_sync: true,
        }
    }

    /// Mark as locally modified
    pub fn touch(&mut self) {
        self.updated_at = advance_timestamp(self.updated_at).max(self.created_at);
        self.needs_sync = true;
    }

    /// Get the title, or the first body line when the title is blank,
    /// truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        let source = if self.title.trim().is_empty() {
            self.body.lines().next().unwrap_or("")
        } else {
            self.title.as_str()
        };
        source.trim().chars().take(max_len).collect()
    }

    /// Check if both title and body are blank
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body.trim().is_empty()
    }
}
