//! Local record store contract

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Profile, Record, RecordId, RecordKind};

/// Filter for [`LocalRecordStore::fetch`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: Option<RecordKind>,
    pub id: Option<RecordId>,
    pub needs_sync: Option<bool>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    /// Every record of every kind
    #[must_use]
    pub const fn all() -> Self {
        Self {
            kind: None,
            id: None,
            needs_sync: None,
            limit: None,
        }
    }

    /// Every record of one kind
    #[must_use]
    pub const fn of_kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::all()
        }
    }

    /// A single record by key
    #[must_use]
    pub const fn by_id(kind: RecordKind, id: RecordId) -> Self {
        Self {
            kind: Some(kind),
            id: Some(id),
            needs_sync: None,
            limit: Some(1),
        }
    }

    /// Records waiting for upload
    #[must_use]
    pub const fn dirty() -> Self {
        Self {
            needs_sync: Some(true),
            ..Self::all()
        }
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record satisfies the filters (limit excluded)
    pub fn matches(&self, record: &Record) -> bool {
        self.kind.is_none_or(|kind| kind == record.kind())
            && self.id.is_none_or(|id| id == record.id())
            && self
                .needs_sync
                .is_none_or(|needs_sync| needs_sync == record.needs_sync())
    }
}

/// Persistent per-device record storage.
///
/// Writes are staged until [`save`](Self::save); reads on the same store see
/// staged writes.
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    /// Records matching the query, newest `updated_at` first
    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<Record>>;

    /// Insert or replace a record by key
    async fn insert(&self, record: &Record) -> Result<()>;

    /// Delete a record; deleting a missing record succeeds
    async fn delete(&self, kind: RecordKind, id: RecordId) -> Result<()>;

    /// Commit staged writes
    async fn save(&self) -> Result<()>;

    async fn setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn clear_setting(&self, key: &str) -> Result<()>;

    /// Fetch a single record by key
    async fn get(&self, kind: RecordKind, id: RecordId) -> Result<Option<Record>> {
        Ok(self
            .fetch(&RecordQuery::by_id(kind, id))
            .await?
            .into_iter()
            .next())
    }
}

/// Fetch the profile singleton, creating and saving a placeholder if absent
pub async fn ensure_profile(store: &dyn LocalRecordStore) -> Result<Profile> {
    let existing = store
        .fetch(&RecordQuery::of_kind(RecordKind::Profile).with_limit(1))
        .await?;
    if let Some(Record::Profile(profile)) = existing.into_iter().next() {
        return Ok(profile);
    }

    let profile = Profile::placeholder();
    store.insert(&Record::Profile(profile.clone())).await?;
    store.save().await?;
    tracing::debug!("Created placeholder profile {}", profile.id);
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Note;

    #[test]
    fn query_matches_filters() {
        let mut note = Note::new("a", "");
        note.needs_sync = false;
        let record = Record::Note(note.clone());

        assert!(RecordQuery::all().matches(&record));
        assert!(RecordQuery::of_kind(RecordKind::Note).matches(&record));
        assert!(!RecordQuery::of_kind(RecordKind::Profile).matches(&record));
        assert!(RecordQuery::by_id(RecordKind::Note, note.id).matches(&record));
        assert!(!RecordQuery::dirty().matches(&record));
    }
}
