//! Wire representation of records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{RemoteError, RemoteResult};
use crate::models::{Note, Profile, Record, RecordId, RecordKind};

/// Fixed document id of the per-user profile singleton
pub const PROFILE_DOCUMENT_ID: &str = "data";

/// A schemaless remote document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub const fn new(id: String, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Top-level merge: fields present in `other` replace ours
    pub fn merge_from(&mut self, other: Self) {
        self.fields.extend(other.fields);
    }

    fn encode<T: Serialize>(id: String, body: &T) -> RemoteResult<Self> {
        match serde_json::to_value(body)? {
            Value::Object(fields) => Ok(Self::new(id, fields)),
            other => Err(RemoteError::decode(
                id,
                format!("expected an object, got {other}"),
            )),
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self) -> RemoteResult<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|error| RemoteError::decode(&self.id, error))
    }
}

/// Profile as stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub has_completed_onboarding: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Note as stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

fn parse_id(document_id: &str, raw: &str) -> RemoteResult<RecordId> {
    raw.parse()
        .map_err(|error| RemoteError::decode(document_id, format!("invalid record id: {error}")))
}

fn check_timestamps(document_id: &str, created_at: i64, updated_at: i64) -> RemoteResult<()> {
    if updated_at < created_at {
        return Err(RemoteError::decode(
            document_id,
            "updatedAt precedes createdAt",
        ));
    }
    Ok(())
}

impl Record {
    /// Remote document id for this record
    pub fn document_id(&self) -> String {
        match self {
            Self::Profile(_) => PROFILE_DOCUMENT_ID.to_string(),
            Self::Note(note) => note.id.to_string(),
        }
    }

    /// Remote representation (no dirty flag)
    pub fn to_document(&self) -> RemoteResult<Document> {
        match self {
            Self::Profile(profile) => Document::encode(
                self.document_id(),
                &ProfileDocument {
                    id: profile.id.to_string(),
                    name: profile.name.clone(),
                    has_completed_onboarding: profile.has_completed_onboarding,
                    created_at: profile.created_at,
                    updated_at: profile.updated_at,
                },
            ),
            Self::Note(note) => Document::encode(
                self.document_id(),
                &NoteDocument {
                    id: note.id.to_string(),
                    title: note.title.clone(),
                    body: note.body.clone(),
                    created_at: note.created_at,
                    updated_at: note.updated_at,
                },
            ),
        }
    }

    /// Materialize a clean record from a remote document
    pub fn from_document(kind: RecordKind, document: &Document) -> RemoteResult<Self> {
        match kind {
            RecordKind::Profile => {
                let wire: ProfileDocument = document.decode()?;
                check_timestamps(&document.id, wire.created_at, wire.updated_at)?;
                Ok(Self::Profile(Profile {
                    id: parse_id(&document.id, &wire.id)?,
                    name: wire.name,
                    has_completed_onboarding: wire.has_completed_onboarding,
                    created_at: wire.created_at,
                    updated_at: wire.updated_at,
                    needs_sync: false,
                }))
            }
            RecordKind::Note => {
                let wire: NoteDocument = document.decode()?;
                check_timestamps(&document.id, wire.created_at, wire.updated_at)?;
                let id = parse_id(&document.id, &wire.id)?;
                if id.to_string() != document.id {
                    return Err(RemoteError::decode(
                        &document.id,
                        format!("body id {id} does not match document id"),
                    ));
                }
                Ok(Self::Note(Note {
                    id,
                    title: wire.title,
                    body: wire.body,
                    created_at: wire.created_at,
                    updated_at: wire.updated_at,
                    needs_sync: false,
                }))
            }
        }
    }

    /// Copy remote fields into this record and clear the dirty flag.
    ///
    /// The local id is kept; everything else follows the remote version.
    pub fn apply_document(&mut self, document: &Document) -> RemoteResult<()> {
        let remote = Self::from_document(self.kind(), document)?;
        let id = self.id();
        *self = remote;
        match self {
            Self::Profile(profile) => profile.id = id,
            Self::Note(note) => note.id = id,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn note_document(id: &str, updated_at: i64) -> Document {
        let Value::Object(fields) = json!({
            "id": id,
            "title": "Remote",
            "body": "from another device",
            "createdAt": 10,
            "updatedAt": updated_at,
        }) else {
            unreachable!()
        };
        Document::new(id.to_string(), fields)
    }

    #[test]
    fn note_document_uses_camel_case_and_drops_dirty_flag() {
        let note = Note::new("Title", "Body");
        let document = Record::Note(note.clone()).to_document().unwrap();
        assert_eq!(document.id, note.id.to_string());
        assert!(document.fields.contains_key("createdAt"));
        assert!(document.fields.contains_key("updatedAt"));
        assert!(!document.fields.contains_key("needsSync"));
        assert!(!document.fields.contains_key("needs_sync"));
    }

    #[test]
    fn profile_uses_fixed_document_id() {
        let profile = Profile::new("Alice");
        let document = Record::Profile(profile.clone()).to_document().unwrap();
        assert_eq!(document.id, PROFILE_DOCUMENT_ID);
        assert_eq!(document.fields["id"], json!(profile.id.to_string()));
        assert_eq!(document.fields["hasCompletedOnboarding"], json!(false));
    }

    #[test]
    fn decoded_records_are_clean() {
        let id = RecordId::new().to_string();
        let record = Record::from_document(RecordKind::Note, &note_document(&id, 20)).unwrap();
        assert!(!record.needs_sync());
        assert_eq!(record.updated_at(), 20);
        let Record::Note(note) = record else {
            panic!("expected a note");
        };
        assert_eq!(note.title, "Remote");
    }

    #[test]
    fn decode_rejects_bad_documents() {
        let bad_id = note_document("not-a-uuid", 20);
        assert!(matches!(
            Record::from_document(RecordKind::Note, &bad_id),
            Err(RemoteError::Decode { .. })
        ));

        let id = RecordId::new().to_string();
        let backwards = note_document(&id, 5);
        assert!(Record::from_document(RecordKind::Note, &backwards).is_err());

        let mut mismatched = note_document(&id, 20);
        mismatched.id = RecordId::new().to_string();
        assert!(Record::from_document(RecordKind::Note, &mismatched).is_err());

        let mut missing = note_document(&id, 20);
        missing.fields.remove("updatedAt");
        assert!(Record::from_document(RecordKind::Note, &missing).is_err());
    }

    #[test]
    fn apply_document_copies_fields_and_clears_dirty() {
        let mut local = Record::Note(Note::new("Local", "draft"));
        let id = local.id();
        let remote = note_document(&id.to_string(), i64::MAX);
        local.apply_document(&remote).unwrap();
        assert_eq!(local.id(), id);
        assert_eq!(local.updated_at(), i64::MAX);
        assert!(!local.needs_sync());
    }

    #[test]
    fn merge_replaces_top_level_fields_only() {
        let id = RecordId::new().to_string();
        let mut existing = note_document(&id, 20);
        existing
            .fields
            .insert("legacy".to_string(), json!("kept"));
        existing.merge_from(note_document(&id, 30));
        assert_eq!(existing.fields["updatedAt"], json!(30));
        assert_eq!(existing.fields["legacy"], json!("kept"));
    }
}
