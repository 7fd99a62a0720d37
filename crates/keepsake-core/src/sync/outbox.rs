//! Local writes waiting for a successful save

use std::collections::BTreeMap;

use crate::db::LocalRecordStore;
use crate::error::Result;
use crate::models::{Record, RecordId, RecordKind};

type Key = (RecordKind, RecordId);

/// A local mutation not yet committed to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    Upsert(Record),
    Delete(RecordKind, RecordId),
}

impl PendingWrite {
    const fn key(&self) -> Key {
        match self {
            Self::Upsert(record) => record.key(),
            Self::Delete(kind, id) => (*kind, *id),
        }
    }
}

/// Latest pending write per record, replayed before every save
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    entries: BTreeMap<Key, PendingWrite>,
}

impl Outbox {
    pub fn push(&mut self, write: PendingWrite) {
        self.entries.insert(write.key(), write);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending state of a record: `Some(None)` is a pending delete
    pub fn lookup(&self, kind: RecordKind, id: RecordId) -> Option<Option<&Record>> {
        self.entries.get(&(kind, id)).map(|write| match write {
            PendingWrite::Upsert(record) => Some(record),
            PendingWrite::Delete(..) => None,
        })
    }

    /// Pending profile, if one is parked
    pub fn profile(&self) -> Option<&Record> {
        self.entries.values().find_map(|write| match write {
            PendingWrite::Upsert(record) if record.kind() == RecordKind::Profile => Some(record),
            _ => None,
        })
    }

    /// Apply every parked write and commit; entries are kept on failure
    pub async fn flush(&mut self, store: &dyn LocalRecordStore) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }

        for write in self.entries.values() {
            match write {
                PendingWrite::Upsert(record) => store.insert(record).await?,
                PendingWrite::Delete(kind, id) => store.delete(*kind, *id).await?,
            }
        }
        store.save().await?;

        tracing::debug!("Saved {} local write(s)", self.entries.len());
        self.entries.clear();
        Ok(())
    }

    /// Overlay parked writes on records read from the store
    pub fn overlay(&self, records: Vec<Record>, dirty_only: bool) -> Vec<Record> {
        let mut merged: BTreeMap<Key, Record> = records
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();

        for (key, write) in &self.entries {
            match write {
                PendingWrite::Upsert(record) if !dirty_only || record.needs_sync() => {
                    merged.insert(*key, record.clone());
                }
                _ => {
                    merged.remove(key);
                }
            }
        }
        merged.into_values().collect()
    }
}
