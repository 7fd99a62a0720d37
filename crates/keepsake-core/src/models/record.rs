//! Record identity, kinds, and conflict resolution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Note, Profile};
use crate::util::now_millis;

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The synchronizable record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Profile,
    Note,
}

impl RecordKind {
    /// All kinds, in upload order
    pub const ALL: [Self; 2] = [Self::Profile, Self::Note];

    /// Remote collection name for this kind
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Note => "notes",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile => write!(f, "profile"),
            Self::Note => write!(f, "note"),
        }
    }
}

/// A record of any kind, as held by the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Profile(Profile),
    Note(Note),
}

impl Record {
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Profile(_) => RecordKind::Profile,
            Self::Note(_) => RecordKind::Note,
        }
    }

    pub const fn id(&self) -> RecordId {
        match self {
            Self::Profile(profile) => profile.id,
            Self::Note(note) => note.id,
        }
    }

    pub const fn created_at(&self) -> i64 {
        match self {
            Self::Profile(profile) => profile.created_at,
            Self::Note(note) => note.created_at,
        }
    }

    pub const fn updated_at(&self) -> i64 {
        match self {
            Self::Profile(profile) => profile.updated_at,
            Self::Note(note) => note.updated_at,
        }
    }

    pub const fn needs_sync(&self) -> bool {
        match self {
            Self::Profile(profile) => profile.needs_sync,
            Self::Note(note) => note.needs_sync,
        }
    }

    pub fn set_needs_sync(&mut self, needs_sync: bool) {
        match self {
            Self::Profile(profile) => profile.needs_sync = needs_sync,
            Self::Note(note) => note.needs_sync = needs_sync,
        }
    }

    /// Mark as locally modified: dirty flag set, `updated_at` advanced
    pub fn touch(&mut self) {
        match self {
            Self::Profile(profile) => profile.touch(),
            Self::Note(note) => note.touch(),
        }
    }

    /// Key used to address this record across stores
    pub const fn key(&self) -> (RecordKind, RecordId) {
        (self.kind(), self.id())
    }
}

impl From<Profile> for Record {
    fn from(profile: Profile) -> Self {
        Self::Profile(profile)
    }
}

impl From<Note> for Record {
    fn from(note: Note) -> Self {
        Self::Note(note)
    }
}

/// Next `updated_at` for a local mutation: wall clock, but never backwards.
pub(crate) fn advance_timestamp(previous: i64) -> i64 {
    now_millis().max(previous.saturating_add(1))
}

/// Outcome of comparing an incoming remote version with the local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// No local copy: materialize the remote record
    Insert,
    /// Remote is newer and local is clean: overwrite local
    Apply,
    /// Remote is newer but local has unsynced edits: discard remote
    KeepDirtyLocal,
    /// Remote is not newer: nothing to do
    KeepLocal,
}

impl ConflictDecision {
    /// Dirty wins over a stale push; between clean states the strictly newer
    /// `updated_at` wins and ties keep the local copy.
    pub fn resolve(local: Option<&Record>, remote_updated_at: i64) -> Self {
        let Some(local) = local else {
            return Self::Insert;
        };

        if remote_updated_at <= local.updated_at() {
            Self::KeepLocal
        } else if local.needs_sync() {
            Self::KeepDirtyLocal
        } else {
            Self::Apply
        }
    }

    pub const fn changes_local(self) -> bool {
        matches!(self, Self::Insert | Self::Apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_at(updated_at: i64, needs_sync: bool) -> Record {
        let mut note = Note::new("A", "");
        note.created_at = 50;
        note.updated_at = updated_at;
        note.needs_sync = needs_sync;
        Record::Note(note)
    }

    #[test]
    fn test_record_id_unique() {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_record_id_parse() {
        let id = RecordId::new();
        let parsed: RecordId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(RecordKind::Profile.collection(), "profile");
        assert_eq!(RecordKind::Note.collection(), "notes");
    }

    #[test]
    fn missing_local_inserts() {
        assert_eq!(ConflictDecision::resolve(None, 10), ConflictDecision::Insert);
    }

    #[test]
    fn only_insert_and_apply_change_local() {
        assert!(ConflictDecision::Insert.changes_local());
        assert!(ConflictDecision::Apply.changes_local());
        assert!(!ConflictDecision::KeepDirtyLocal.changes_local());
        assert!(!ConflictDecision::KeepLocal.changes_local());
    }

    #[test]
    fn newer_remote_overwrites_clean_local() {
        let local = note_at(100, false);
        assert_eq!(
            ConflictDecision::resolve(Some(&local), 200),
            ConflictDecision::Apply
        );
    }

    #[test]
    fn newer_remote_never_overwrites_dirty_local() {
        let local = note_at(100, true);
        assert_eq!(
            ConflictDecision::resolve(Some(&local), 200),
            ConflictDecision::KeepDirtyLocal
        );
    }

    #[test]
    fn equal_or_older_remote_keeps_local() {
        let local = note_at(100, false);
        assert_eq!(
            ConflictDecision::resolve(Some(&local), 100),
            ConflictDecision::KeepLocal
        );
        assert_eq!(
            ConflictDecision::resolve(Some(&local), 99),
            ConflictDecision::KeepLocal
        );
    }

    #[test]
    fn touch_marks_dirty_and_advances_timestamp() {
        let mut record = note_at(i64::from(i32::MAX) * 1_000_000, false);
        let before = record.updated_at();
        record.touch();
        assert!(record.needs_sync());
        assert!(record.updated_at() > before);
        assert!(record.updated_at() >= record.created_at());
    }
}
