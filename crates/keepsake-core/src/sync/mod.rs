//! Sync engine: keeps the local store and the remote document store converging.
//!
//! [`SyncEngine`] is a cheap, cloneable handle. All state lives in a single
//! worker task that serializes local writes, listener batches, upload reports
//! and the debounce timer, so no locks are held across remote calls.

mod outbox;
mod upload;
mod worker;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::cache::ProfileCache;
use crate::config::SyncConfig;
use crate::db::LocalRecordStore;
use crate::error::{Error, Result};
use crate::models::{Record, RecordId};
use crate::remote::RemoteDocumentStore;
use crate::state::{SyncEvent, SyncSnapshot, SyncStatus};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Settings key marking a completed bootstrap for a user on this device
pub(crate) fn bootstrap_key(user_id: &str) -> String {
    format!("bootstrap_complete:{user_id}")
}

pub(crate) enum Command {
    Configure {
        user_id: String,
        store: Arc<dyn LocalRecordStore>,
        reply: Reply<()>,
    },
    MarkNeedsSync {
        record: Record,
        reply: Reply<Record>,
    },
    DeleteNote {
        id: RecordId,
        reply: Reply<()>,
    },
    DeleteNoteFromCloud {
        id: RecordId,
        reply: Reply<()>,
    },
    SyncAll {
        reply: Reply<()>,
    },
    Flush {
        reply: Reply<()>,
    },
    SetOnline {
        online: bool,
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
}

/// Handle to the sync engine worker.
///
/// Must be created inside a tokio runtime. The worker exits once every handle
/// has been dropped.
#[derive(Clone)]
pub struct SyncEngine {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SyncSnapshot>,
    events: broadcast::Sender<SyncEvent>,
    cache: ProfileCache,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        cache: ProfileCache,
        config: SyncConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        worker::Worker::spawn(
            remote,
            cache.clone(),
            config,
            snapshot_tx,
            events_tx.clone(),
            commands_rx,
        );

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events: events_tx,
            cache,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)?
    }

    /// Start syncing `user_id` against `store`, replacing any previous session.
    ///
    /// Runs the initial download on first use of this store by this user.
    /// Download failures are reported through [`status`](Self::status).
    pub async fn configure(
        &self,
        user_id: impl Into<String>,
        store: Arc<dyn LocalRecordStore>,
    ) -> Result<()> {
        let user_id = user_id.into();
        self.request(|reply| Command::Configure {
            user_id,
            store,
            reply,
        })
        .await
    }

    /// Record a local edit: marks it dirty, bumps `updated_at`, saves it and
    /// schedules a debounced upload. Returns the record as stored.
    pub async fn mark_needs_sync(&self, record: impl Into<Record>) -> Result<Record> {
        let record = record.into();
        self.request(|reply| Command::MarkNeedsSync { record, reply })
            .await
    }

    /// Delete a note locally, then from the remote store
    pub async fn delete_note(&self, id: RecordId) -> Result<()> {
        self.request(|reply| Command::DeleteNote { id, reply }).await
    }

    /// Delete the remote copy of a note; remote failures are only logged
    pub async fn delete_note_from_cloud(&self, id: RecordId) -> Result<()> {
        self.request(|reply| Command::DeleteNoteFromCloud { id, reply })
            .await
    }

    /// Manual sync: retry a missing bootstrap, then upload everything pending
    pub async fn sync_all(&self) -> Result<()> {
        self.request(|reply| Command::SyncAll { reply }).await
    }

    /// Skip the debounce and wait until no upload pass is running or queued
    pub async fn flush(&self) -> Result<()> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Report connectivity changes; going online retries pending uploads
    pub async fn set_online(&self, online: bool) -> Result<()> {
        self.request(|reply| Command::SetOnline { online, reply })
            .await
    }

    /// Cancel listeners, timers and queued passes. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub fn status(&self) -> SyncStatus {
        self.snapshot.borrow().status.clone()
    }

    pub fn last_sync_at(&self) -> Option<i64> {
        self.snapshot.borrow().last_sync_at
    }

    pub fn pending_changes(&self) -> usize {
        self.snapshot.borrow().pending_changes
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub const fn profile_cache(&self) -> &ProfileCache {
        &self.cache
    }
}
