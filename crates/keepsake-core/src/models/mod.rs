//! Data models for Keepsake

mod note;
mod profile;
mod record;

pub use note::Note;
pub use profile::{Profile, DEFAULT_PROFILE_NAME};
pub use record::{ConflictDecision, Record, RecordId, RecordKind};
