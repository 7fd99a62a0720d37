//! `SQLite` record store implementation

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;

use super::store::{LocalRecordStore, RecordQuery};
use super::Database;
use crate::error::Result;
use crate::models::{Note, Profile, Record, RecordId, RecordKind};

type RowParser = fn(&rusqlite::Row<'_>) -> rusqlite::Result<Record>;

/// `SQLite` implementation of `LocalRecordStore`.
///
/// Writes open a transaction that stays open until `save()` commits it.
pub struct SqliteRecordStore {
    db: Mutex<Database>,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Start a write transaction unless one is already open
    fn begin(conn: &Connection) -> Result<()> {
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn parse_id(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordId> {
        let raw: String = row.get(0)?;
        raw.parse().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(error))
        })
    }

    /// Parse a profile from a database row
    fn parse_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        Ok(Record::Profile(Profile {
            id: Self::parse_id(row)?,
            name: row.get(1)?,
            has_completed_onboarding: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            needs_sync: row.get(5)?,
        }))
    }

    /// Parse a note from a database row
    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        Ok(Record::Note(Note {
            id: Self::parse_id(row)?,
            title: row.get(1)?,
            body: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            needs_sync: row.get(5)?,
        }))
    }

    fn fetch_kind(conn: &Connection, kind: RecordKind, query: &RecordQuery) -> Result<Vec<Record>> {
        let (sql, parse) = match kind {
            RecordKind::Profile => (
                "SELECT id, name, has_completed_onboarding, created_at, updated_at, needs_sync
                 FROM profiles
                 WHERE (?1 IS NULL OR id = ?1) AND (?2 IS NULL OR needs_sync = ?2)
                 ORDER BY updated_at DESC
                 LIMIT ?3",
                Self::parse_profile as RowParser,
            ),
            RecordKind::Note => (
                "SELECT id, title, body, created_at, updated_at, needs_sync
                 FROM notes
                 WHERE (?1 IS NULL OR id = ?1) AND (?2 IS NULL OR needs_sync = ?2)
                 ORDER BY updated_at DESC
                 LIMIT ?3",
                Self::parse_note as RowParser,
            ),
        };

        let limit = query
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare_cached(sql)?;
        let records = stmt
            .query_map(
                params![query.id.map(|id| id.to_string()), query.needs_sync, limit],
                parse,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[async_trait]
impl LocalRecordStore for SqliteRecordStore {
    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        match query.kind {
            Some(kind) => Self::fetch_kind(conn, kind, query),
            None => {
                let mut records = Vec::new();
                for kind in RecordKind::ALL {
                    records.extend(Self::fetch_kind(conn, kind, query)?);
                }
                records.sort_by_key(|record| std::cmp::Reverse(record.updated_at()));
                if let Some(limit) = query.limit {
                    records.truncate(limit);
                }
                Ok(records)
            }
        }
    }

    async fn insert(&self, record: &Record) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        Self::begin(conn)?;

        match record {
            Record::Profile(profile) => {
                conn.execute(
                    "INSERT INTO profiles (id, name, has_completed_onboarding, created_at, updated_at, needs_sync)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        has_completed_onboarding = excluded.has_completed_onboarding,
                        created_at = excluded.created_at,
                        updated_at = excluded.updated_at,
                        needs_sync = excluded.needs_sync",
                    params![
                        profile.id.as_str(),
                        profile.name,
                        profile.has_completed_onboarding,
                        profile.created_at,
                        profile.updated_at,
                        profile.needs_sync
                    ],
                )?;
            }
            Record::Note(note) => {
                conn.execute(
                    "INSERT INTO notes (id, title, body, created_at, updated_at, needs_sync)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        body = excluded.body,
                        created_at = excluded.created_at,
                        updated_at = excluded.updated_at,
                        needs_sync = excluded.needs_sync",
                    params![
                        note.id.as_str(),
                        note.title,
                        note.body,
                        note.created_at,
                        note.updated_at,
                        note.needs_sync
                    ],
                )?;
            }
        }
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, id: RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        Self::begin(conn)?;

        let sql = match kind {
            RecordKind::Profile => "DELETE FROM profiles WHERE id = ?1",
            RecordKind::Note => "DELETE FROM notes WHERE id = ?1",
        };
        conn.execute(sql, params![id.as_str()])?;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        if conn.is_autocommit() {
            return Ok(());
        }

        if let Err(error) = conn.execute_batch("COMMIT") {
            conn.execute_batch("ROLLBACK").ok();
            return Err(error.into());
        }
        Ok(())
    }

    async fn setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .connection()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        Self::begin(conn)?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    async fn clear_setting(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        Self::begin(conn)?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_profile;
    use pretty_assertions::assert_eq;

    fn setup() -> SqliteRecordStore {
        SqliteRecordStore::open_in_memory().unwrap()
    }

    fn clean_note(title: &str, updated_at: i64) -> Note {
        let mut note = Note::new(title, "");
        note.created_at = 1;
        note.updated_at = updated_at;
        note.needs_sync = false;
        note
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = setup();
        let note = Note::new("Hello", "world");
        store.insert(&Record::Note(note.clone())).await.unwrap();
        store.save().await.unwrap();

        let fetched = store.get(RecordKind::Note, note.id).await.unwrap();
        assert_eq!(fetched, Some(Record::Note(note)));
    }

    #[tokio::test]
    async fn test_insert_is_upsert() {
        let store = setup();
        let mut note = Note::new("First", "");
        store.insert(&Record::Note(note.clone())).await.unwrap();
        note.title = "Second".to_string();
        store.insert(&Record::Note(note.clone())).await.unwrap();
        store.save().await.unwrap();

        let all = store
            .fetch(&RecordQuery::of_kind(RecordKind::Note))
            .await
            .unwrap();
        assert_eq!(all, vec![Record::Note(note)]);
    }

    #[tokio::test]
    async fn test_fetch_orders_newest_first_and_limits() {
        let store = setup();
        for (title, updated_at) in [("old", 10), ("new", 30), ("mid", 20)] {
            store
                .insert(&Record::Note(clean_note(title, updated_at)))
                .await
                .unwrap();
        }
        store.save().await.unwrap();

        let records = store
            .fetch(&RecordQuery::of_kind(RecordKind::Note).with_limit(2))
            .await
            .unwrap();
        let stamps: Vec<i64> = records.iter().map(Record::updated_at).collect();
        assert_eq!(stamps, vec![30, 20]);
    }

    #[tokio::test]
    async fn test_fetch_dirty_across_kinds() {
        let store = setup();
        let profile = Profile::new("Alice");
        let dirty = Note::new("dirty", "");
        store.insert(&Record::Profile(profile.clone())).await.unwrap();
        store.insert(&Record::Note(dirty.clone())).await.unwrap();
        store
            .insert(&Record::Note(clean_note("clean", 5)))
            .await
            .unwrap();
        store.save().await.unwrap();

        let records = store.fetch(&RecordQuery::dirty()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(Record::needs_sync));
        assert!(records.iter().any(|record| record.id() == profile.id));
        assert!(records.iter().any(|record| record.id() == dirty.id));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = setup();
        let note = Note::new("Bye", "");
        store.insert(&Record::Note(note.clone())).await.unwrap();
        store.delete(RecordKind::Note, note.id).await.unwrap();
        store.delete(RecordKind::Note, RecordId::new()).await.unwrap();
        store.save().await.unwrap();

        assert!(store.get(RecordKind::Note, note.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsaved_writes_visible_and_durable_after_save() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keepsake.db");
        let note = Note::new("Durable", "");
        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.insert(&Record::Note(note.clone())).await.unwrap();
            assert!(store.get(RecordKind::Note, note.id).await.unwrap().is_some());
            store.save().await.unwrap();
        }

        let reopened = SqliteRecordStore::open(&path).unwrap();
        assert!(reopened
            .get(RecordKind::Note, note.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unsaved_writes_are_lost_on_close() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keepsake.db");
        let note = Note::new("Volatile", "");
        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store.insert(&Record::Note(note.clone())).await.unwrap();
        }

        let reopened = SqliteRecordStore::open(&path).unwrap();
        assert!(reopened
            .get(RecordKind::Note, note.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_settings() {
        let store = setup();
        assert_eq!(store.setting("bootstrap_complete:u1").await.unwrap(), None);

        store
            .set_setting("bootstrap_complete:u1", "true")
            .await
            .unwrap();
        store.save().await.unwrap();
        assert_eq!(
            store.setting("bootstrap_complete:u1").await.unwrap(),
            Some("true".to_string())
        );

        store.clear_setting("bootstrap_complete:u1").await.unwrap();
        store.save().await.unwrap();
        assert_eq!(store.setting("bootstrap_complete:u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ensure_profile_is_fetch_or_create() {
        let store = setup();
        let created = ensure_profile(&store).await.unwrap();
        assert!(!created.needs_sync);

        let fetched = ensure_profile(&store).await.unwrap();
        assert_eq!(created, fetched);
        let profiles = store
            .fetch(&RecordQuery::of_kind(RecordKind::Profile))
            .await
            .unwrap();
        assert_eq!(profiles.len(), 1);
    }
}
