//! Engine worker task. Owns every piece of sync state; the public handle
//! only talks to it through channels.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use super::outbox::{Outbox, PendingWrite};
use super::upload::{self, UploadReport};
use super::{bootstrap_key, Command};
use crate::cache::ProfileCache;
use crate::config::SyncConfig;
use crate::db::{LocalRecordStore, RecordQuery};
use crate::error::{Error, Result};
use crate::models::{ConflictDecision, Record, RecordId, RecordKind};
use crate::remote::{
    ChangeHandler, CollectionPath, Document, RemoteDocumentStore, Subscription,
    PROFILE_DOCUMENT_ID,
};
use crate::state::{SyncEvent, SyncSnapshot, SyncStatus};
use crate::util::{compact_text, normalize_text_option, now_millis};

/// Documents delivered by a remote listener
#[derive(Debug)]
pub(crate) struct ListenerBatch {
    pub generation: u64,
    pub kind: RecordKind,
    pub documents: Vec<Document>,
}

/// State bound to one signed-in user and local store
struct Session {
    user_id: String,
    store: Arc<dyn LocalRecordStore>,
    generation: u64,
    subscriptions: Vec<Subscription>,
    overflow: Vec<(RecordKind, Arc<AtomicBool>)>,
    outbox: Outbox,
    /// Notes deleted on this device; remote copies of them are never restored
    deleted_notes: HashSet<RecordId>,
}

impl Session {
    fn new(user_id: String, store: Arc<dyn LocalRecordStore>, generation: u64) -> Self {
        Self {
            user_id,
            store,
            generation,
            subscriptions: Vec::new(),
            overflow: Vec::new(),
            outbox: Outbox::default(),
            deleted_notes: HashSet::new(),
        }
    }

    fn path(&self, kind: RecordKind) -> CollectionPath {
        CollectionPath::new(self.user_id.as_str(), kind)
    }

    /// Queue writes behind any parked ones and try to save them all
    async fn persist(&mut self, writes: Vec<PendingWrite>) -> bool {
        for write in writes {
            self.outbox.push(write);
        }
        match self.outbox.flush(self.store.as_ref()).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    "Local save failed, {} write(s) parked for retry: {error}",
                    self.outbox.len()
                );
                false
            }
        }
    }

    async fn lookup(&self, kind: RecordKind, id: RecordId) -> Result<Option<Record>> {
        if let Some(pending) = self.outbox.lookup(kind, id) {
            return Ok(pending.cloned());
        }
        self.store.get(kind, id).await
    }

    async fn lookup_profile(&self) -> Result<Option<Record>> {
        if let Some(profile) = self.outbox.profile() {
            return Ok(Some(profile.clone()));
        }
        Ok(self
            .store
            .fetch(&RecordQuery::of_kind(RecordKind::Profile).with_limit(1))
            .await?
            .into_iter()
            .next())
    }

    async fn dirty_records(&self) -> Result<Vec<Record>> {
        let stored = self.store.fetch(&RecordQuery::dirty()).await?;
        Ok(self.outbox.overlay(stored, true))
    }

    async fn is_bootstrapped(&self) -> bool {
        match self.store.setting(&bootstrap_key(&self.user_id)).await {
            Ok(flag) => flag.is_some(),
            Err(error) => {
                tracing::warn!("Failed to read bootstrap flag for {}: {error}", self.user_id);
                false
            }
        }
    }

    async fn mark_bootstrapped(&self) -> Result<()> {
        self.store
            .set_setting(&bootstrap_key(&self.user_id), "true")
            .await?;
        self.store.save().await
    }
}

fn listener_handler(
    batches: mpsc::Sender<ListenerBatch>,
    generation: u64,
    kind: RecordKind,
    overflow: Arc<AtomicBool>,
) -> ChangeHandler {
    Arc::new(move |documents| {
        let batch = ListenerBatch {
            generation,
            kind,
            documents,
        };
        match batches.try_send(batch) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => overflow.store(true, Ordering::SeqCst),
        }
    })
}

/// Remote changes to apply locally during bootstrap
async fn download(
    remote: &dyn RemoteDocumentStore,
    session: &Session,
) -> Result<Vec<PendingWrite>> {
    let mut writes = Vec::new();

    let profile_path = session.path(RecordKind::Profile);
    if let Some(document) = remote.get(&profile_path, PROFILE_DOCUMENT_ID).await? {
        let remote_profile = Record::from_document(RecordKind::Profile, &document)?;
        match session.lookup_profile().await? {
            Some(local) if local.needs_sync() => {
                tracing::debug!("Keeping unsynced local profile over the remote copy");
            }
            Some(mut local) => {
                local.apply_document(&document)?;
                writes.push(PendingWrite::Upsert(local));
            }
            None => writes.push(PendingWrite::Upsert(remote_profile)),
        }
    }

    for document in remote.list(&session.path(RecordKind::Note)).await? {
        let remote_note = match Record::from_document(RecordKind::Note, &document) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!("Skipping remote note during initial sync: {error}");
                continue;
            }
        };
        let local = session.lookup(RecordKind::Note, remote_note.id()).await?;
        match ConflictDecision::resolve(local.as_ref(), remote_note.updated_at()) {
            decision if decision.changes_local() => {
                writes.push(PendingWrite::Upsert(remote_note));
            }
            decision => {
                tracing::debug!("Initial sync kept local note {}: {decision:?}", remote_note.id());
            }
        }
    }

    Ok(writes)
}

pub(crate) struct Worker {
    remote: Arc<dyn RemoteDocumentStore>,
    cache: ProfileCache,
    config: SyncConfig,
    snapshot: watch::Sender<SyncSnapshot>,
    events: broadcast::Sender<SyncEvent>,
    batches: mpsc::Sender<ListenerBatch>,
    reports: mpsc::UnboundedSender<UploadReport>,
    session: Option<Session>,
    generation: u64,
    debounce_at: Option<Instant>,
    upload_in_flight: bool,
    upload_queued: bool,
    flush_waiters: Vec<oneshot::Sender<Result<()>>>,
    online: bool,
}

impl Worker {
    fn new(
        remote: Arc<dyn RemoteDocumentStore>,
        cache: ProfileCache,
        config: SyncConfig,
        snapshot: watch::Sender<SyncSnapshot>,
        events: broadcast::Sender<SyncEvent>,
        batches: mpsc::Sender<ListenerBatch>,
        reports: mpsc::UnboundedSender<UploadReport>,
    ) -> Self {
        Self {
            remote,
            cache,
            config,
            snapshot,
            events,
            batches,
            reports,
            session: None,
            generation: 0,
            debounce_at: None,
            upload_in_flight: false,
            upload_queued: false,
            flush_waiters: Vec::new(),
            online: true,
        }
    }

    /// Start the worker on the current tokio runtime
    pub(crate) fn spawn(
        remote: Arc<dyn RemoteDocumentStore>,
        cache: ProfileCache,
        config: SyncConfig,
        snapshot: watch::Sender<SyncSnapshot>,
        events: broadcast::Sender<SyncEvent>,
        commands: mpsc::Receiver<Command>,
    ) {
        let (batches_tx, batches_rx) = mpsc::channel(config.listener_buffer.max(1));
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let worker = Self::new(
            remote, cache, config, snapshot, events, batches_tx, reports_tx,
        );
        tokio::spawn(worker.run(commands, batches_rx, reports_rx));
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut batches: mpsc::Receiver<ListenerBatch>,
        mut reports: mpsc::UnboundedReceiver<UploadReport>,
    ) {
        tracing::debug!("Sync engine worker started");
        loop {
            let debounce_at = self.debounce_at;
            tokio::select! {
                biased;
                Some(report) = reports.recv() => self.finish_upload(report).await,
                Some(batch) = batches.recv() => self.on_listener_batch(batch).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                () = sleep_until(debounce_at.unwrap_or_else(Instant::now)), if debounce_at.is_some() => {
                    self.debounce_at = None;
                    self.request_upload().await;
                }
            }
        }
        self.stop_session().await;
        tracing::debug!("Sync engine worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Configure {
                user_id,
                store,
                reply,
            } => {
                reply.send(self.configure(user_id, store).await).ok();
            }
            Command::MarkNeedsSync { record, reply } => {
                reply.send(self.mark_needs_sync(record).await).ok();
            }
            Command::DeleteNote { id, reply } => {
                reply.send(self.delete_note(id).await).ok();
            }
            Command::DeleteNoteFromCloud { id, reply } => {
                reply.send(self.delete_note_from_cloud(id).await).ok();
            }
            Command::SyncAll { reply } => self.sync_all(reply).await,
            Command::Flush { reply } => self.flush(reply).await,
            Command::SetOnline { online, reply } => {
                self.set_online(online).await;
                reply.send(Ok(())).ok();
            }
            Command::Stop { reply } => {
                self.stop_session().await;
                reply.send(Ok(())).ok();
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut SyncSnapshot)) {
        self.snapshot.send_modify(update);
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error
        self.events.send(event).ok();
    }

    fn current_generation(&self) -> Option<u64> {
        self.session.as_ref().map(|session| session.generation)
    }

    async fn configure(&mut self, user_id: String, store: Arc<dyn LocalRecordStore>) -> Result<()> {
        let user_id = normalize_text_option(Some(user_id))
            .ok_or_else(|| Error::InvalidInput("user id must not be empty".to_string()))?;

        self.stop_session().await;
        self.cache.configure(Arc::clone(&store)).await?;

        self.generation += 1;
        tracing::info!("Configuring sync for user {user_id}");
        let session = Session::new(user_id, store, self.generation);
        let bootstrapped = session.is_bootstrapped().await;
        self.session = Some(session);

        let online = self.online;
        self.publish(|snapshot| {
            snapshot.status = if online {
                SyncStatus::Syncing
            } else {
                SyncStatus::Offline
            };
        });

        if !bootstrapped {
            self.initial_sync().await.ok();
        }
        self.start_listeners();
        self.refresh_pending().await;
        self.request_upload().await;
        Ok(())
    }

    /// Download the user's remote data into a fresh local store
    async fn initial_sync(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::NotConfigured);
        };
        let user_id = session.user_id.clone();
        tracing::info!("Starting initial sync for user {user_id}");

        let writes = match download(self.remote.as_ref(), session).await {
            Ok(writes) => writes,
            Err(error) => {
                self.fail_sync(&error);
                return Err(error);
            }
        };

        let downloaded = writes.len();
        let persisted = session.persist(writes).await;
        let outbox_len = session.outbox.len();
        let flagged = if persisted {
            session.mark_bootstrapped().await
        } else {
            Err(Error::Database(format!(
                "{outbox_len} downloaded record(s) could not be saved"
            )))
        };
        self.publish(|snapshot| snapshot.outbox_len = outbox_len);

        if let Err(error) = flagged {
            self.fail_sync(&error);
            return Err(error);
        }

        let online = self.online;
        self.publish(|snapshot| {
            snapshot.last_sync_at = Some(now_millis());
            if online {
                snapshot.status = SyncStatus::Idle;
            }
        });
        self.emit(SyncEvent::InitialSyncCompleted {
            user_id: user_id.clone(),
        });
        if let Err(error) = self.cache.invalidate().await {
            tracing::warn!("Failed to refresh profile cache after initial sync: {error}");
        }
        tracing::info!("Initial sync complete for user {user_id}: {downloaded} record(s) applied");
        Ok(())
    }

    fn fail_sync(&self, error: &Error) {
        let message = format!("Sync failed: {}", compact_text(&error.to_string()));
        tracing::warn!("{message}");
        self.publish(|snapshot| snapshot.status = SyncStatus::Error(message));
    }

    fn start_listeners(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        for kind in RecordKind::ALL {
            let path = session.path(kind);
            let overflow = Arc::new(AtomicBool::new(false));
            let handler = listener_handler(
                self.batches.clone(),
                session.generation,
                kind,
                Arc::clone(&overflow),
            );
            match self.remote.listen(&path, handler) {
                Ok(subscription) => {
                    session.subscriptions.push(subscription);
                    session.overflow.push((kind, overflow));
                    tracing::debug!("Listening for remote changes on {path}");
                }
                Err(error) => tracing::warn!("Failed to listen on {path}: {error}"),
            }
        }
    }

    async fn on_listener_batch(&mut self, batch: ListenerBatch) {
        if self.current_generation() != Some(batch.generation) {
            tracing::debug!(
                "Dropping {} listener batch from a stopped session",
                batch.kind
            );
            return;
        }
        self.reconcile(batch.kind, &batch.documents).await;
        self.recover_overflow().await;
    }

    /// Re-fetch collections whose listener batches were dropped
    async fn recover_overflow(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let overflowed: Vec<(CollectionPath, Arc<AtomicBool>)> = session
            .overflow
            .iter()
            .filter(|(_, flag)| flag.swap(false, Ordering::SeqCst))
            .map(|(kind, flag)| (session.path(*kind), Arc::clone(flag)))
            .collect();

        for (path, flag) in overflowed {
            tracing::warn!("Listener queue overflowed for {path}, re-fetching collection");
            match self.remote.list(&path).await {
                Ok(documents) => self.reconcile(path.kind, &documents).await,
                Err(error) => {
                    tracing::warn!("Failed to re-fetch {path}: {error}");
                    flag.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// Merge remote documents into the local store
    async fn reconcile(&mut self, kind: RecordKind, documents: &[Document]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut writes = Vec::new();
        for document in documents {
            let remote = match Record::from_document(kind, document) {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!("Skipping remote {kind}: {error}");
                    continue;
                }
            };
            if kind == RecordKind::Note && session.deleted_notes.contains(&remote.id()) {
                tracing::debug!("Ignoring remote copy of deleted note {}", remote.id());
                continue;
            }
            let local = match kind {
                RecordKind::Profile => session.lookup_profile().await,
                RecordKind::Note => session.lookup(kind, remote.id()).await,
            };
            let local = match local {
                Ok(local) => local,
                Err(error) => {
                    tracing::warn!("Failed to read local {kind} {}: {error}", remote.id());
                    continue;
                }
            };

            let decision = ConflictDecision::resolve(local.as_ref(), remote.updated_at());
            tracing::debug!("Remote {kind} {}: {decision:?}", remote.id());
            match (decision, local) {
                (ConflictDecision::Insert, _) => writes.push(PendingWrite::Upsert(remote)),
                (ConflictDecision::Apply, Some(mut local)) => {
                    match local.apply_document(document) {
                        Ok(()) => writes.push(PendingWrite::Upsert(local)),
                        Err(error) => tracing::warn!("Skipping remote {kind}: {error}"),
                    }
                }
                _ => {}
            }
        }

        if writes.is_empty() {
            return;
        }

        let changed = writes.len();
        let latest_profile = writes.iter().find_map(|write| match write {
            PendingWrite::Upsert(Record::Profile(profile)) => Some(profile.clone()),
            _ => None,
        });
        let persisted = session.persist(writes).await;
        let outbox_len = session.outbox.len();
        self.publish(|snapshot| snapshot.outbox_len = outbox_len);

        if let Some(profile) = latest_profile {
            if persisted {
                if let Err(error) = self.cache.invalidate().await {
                    tracing::warn!("Failed to refresh profile cache: {error}");
                }
            } else {
                self.cache.update(profile);
            }
        }

        tracing::info!("Applied {changed} remote {kind} change(s)");
        self.emit(SyncEvent::RemoteChangesApplied { kind, changed });
    }

    async fn mark_needs_sync(&mut self, mut record: Record) -> Result<Record> {
        let session = self.session.as_mut().ok_or(Error::NotConfigured)?;

        // Keep the profile a singleton: edits always land on the stored row
        if let Record::Profile(profile) = &mut record {
            if let Some(existing) = session.lookup_profile().await? {
                profile.id = existing.id();
            }
        }

        if let Record::Note(note) = &record {
            session.deleted_notes.remove(&note.id);
        }
        record.touch();
        session
            .persist(vec![PendingWrite::Upsert(record.clone())])
            .await;
        let outbox_len = session.outbox.len();

        if let Record::Profile(profile) = &record {
            self.cache.update(profile.clone());
        }
        self.publish(|snapshot| {
            snapshot.pending_changes += 1;
            snapshot.outbox_len = outbox_len;
        });
        self.debounce_at = Some(Instant::now() + self.config.debounce());
        tracing::debug!("Marked {} {} for sync", record.kind(), record.id());
        Ok(record)
    }

    async fn delete_note(&mut self, id: RecordId) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotConfigured)?;
        session.deleted_notes.insert(id);
        session
            .persist(vec![PendingWrite::Delete(RecordKind::Note, id)])
            .await;
        let outbox_len = session.outbox.len();
        self.publish(|snapshot| snapshot.outbox_len = outbox_len);
        self.refresh_pending().await;
        self.delete_note_from_cloud(id).await
    }

    /// Remove the remote copy; failures are logged and not retried
    async fn delete_note_from_cloud(&self, id: RecordId) -> Result<()> {
        let session = self.session.as_ref().ok_or(Error::NotConfigured)?;
        let path = session.path(RecordKind::Note);
        match self.remote.delete(&path, &id.to_string()).await {
            Ok(()) => tracing::info!("Deleted note {id} from cloud"),
            Err(error) => tracing::warn!("Failed to delete note {id} from cloud: {error}"),
        }
        Ok(())
    }

    async fn sync_all(&mut self, reply: oneshot::Sender<Result<()>>) {
        let Some(session) = self.session.as_ref() else {
            reply.send(Err(Error::NotConfigured)).ok();
            return;
        };
        let bootstrapped = session.is_bootstrapped().await;

        if self.online {
            self.publish(|snapshot| snapshot.status = SyncStatus::Syncing);
        }
        if !bootstrapped {
            if let Err(error) = self.initial_sync().await {
                reply.send(Err(error)).ok();
                return;
            }
        }
        self.flush(reply).await;
    }

    async fn flush(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.session.is_none() {
            reply.send(Err(Error::NotConfigured)).ok();
            return;
        }
        self.debounce_at = None;
        self.flush_waiters.push(reply);
        self.request_upload().await;
    }

    async fn set_online(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;

        if online {
            tracing::info!("Connectivity restored");
            self.publish(|snapshot| {
                if snapshot.status == SyncStatus::Offline {
                    snapshot.status = SyncStatus::Idle;
                }
            });
            self.request_upload().await;
        } else {
            tracing::info!("Connectivity lost");
            self.publish(|snapshot| snapshot.status = SyncStatus::Offline);
        }
    }

    async fn refresh_pending(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match session.dirty_records().await {
            Ok(records) => {
                let pending = records.len();
                self.publish(|snapshot| snapshot.pending_changes = pending);
            }
            Err(error) => tracing::warn!("Failed to count pending changes: {error}"),
        }
    }

    /// Start a pass now, or queue one behind the pass in flight
    async fn request_upload(&mut self) {
        if self.session.is_none() {
            return;
        }
        if self.upload_in_flight {
            self.upload_queued = true;
            return;
        }
        self.start_upload().await;
    }

    async fn start_upload(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if !session.outbox.is_empty() {
            session.persist(Vec::new()).await;
        }
        let records = match session.dirty_records().await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!("Failed to collect dirty records: {error}");
                Vec::new()
            }
        };
        let user_id = session.user_id.clone();
        let generation = session.generation;
        let outbox_len = session.outbox.len();

        self.upload_in_flight = true;
        self.publish(|snapshot| {
            if snapshot.status == SyncStatus::Idle {
                snapshot.status = SyncStatus::Syncing;
            }
            snapshot.outbox_len = outbox_len;
        });
        tracing::debug!("Starting upload pass with {} record(s)", records.len());
        tokio::spawn(upload::run_pass(
            Arc::clone(&self.remote),
            user_id,
            generation,
            records,
            self.reports.clone(),
        ));
    }

    async fn finish_upload(&mut self, report: UploadReport) {
        self.upload_in_flight = false;

        if self.current_generation() == Some(report.generation) {
            self.apply_upload_report(&report).await;
        } else {
            tracing::debug!("Ignoring upload report from a stopped session");
        }

        if self.upload_queued && self.session.is_some() {
            self.upload_queued = false;
            self.start_upload().await;
        } else {
            self.upload_queued = false;
            self.resolve_flush_waiters(false);
        }
    }

    /// Clear dirty flags of records that were not edited during the pass
    async fn apply_upload_report(&mut self, report: &UploadReport) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut writes = Vec::new();
        let mut resurrected = Vec::new();
        for uploaded in &report.uploaded {
            if uploaded.kind == RecordKind::Note && session.deleted_notes.contains(&uploaded.id) {
                resurrected.push(uploaded.id);
                continue;
            }
            match session.lookup(uploaded.kind, uploaded.id).await {
                Ok(Some(mut record))
                    if record.needs_sync() && record.updated_at() == uploaded.updated_at =>
                {
                    record.set_needs_sync(false);
                    writes.push(PendingWrite::Upsert(record));
                }
                Ok(None) if uploaded.kind == RecordKind::Note => resurrected.push(uploaded.id),
                Ok(_) => tracing::debug!(
                    "{} {} changed during upload, leaving it for the next pass",
                    uploaded.kind,
                    uploaded.id
                ),
                Err(error) => tracing::warn!(
                    "Failed to read {} {} after upload: {error}",
                    uploaded.kind,
                    uploaded.id
                ),
            }
        }

        let clean_profile = writes.iter().find_map(|write| match write {
            PendingWrite::Upsert(Record::Profile(profile)) => Some(profile.clone()),
            _ => None,
        });
        if !writes.is_empty() {
            session.persist(writes).await;
        }
        let outbox_len = session.outbox.len();
        let user_id = session.user_id.clone();

        if let Some(profile) = clean_profile {
            self.cache.update(profile);
        }
        // The pass wrote these after they were deleted locally
        for id in resurrected {
            self.delete_note_from_cloud(id).await.ok();
        }
        self.refresh_pending().await;
        self.publish(|snapshot| {
            snapshot.last_sync_at = Some(now_millis());
            snapshot.outbox_len = outbox_len;
            if snapshot.status == SyncStatus::Syncing {
                snapshot.status = SyncStatus::Idle;
            }
        });

        tracing::info!(
            "Upload pass for user {user_id}: {} uploaded, {} failed",
            report.uploaded.len(),
            report.failed
        );
        self.emit(SyncEvent::UploadPassCompleted {
            uploaded: report.uploaded.len(),
            failed: report.failed,
        });
    }

    fn resolve_flush_waiters(&mut self, stopped: bool) {
        for waiter in self.flush_waiters.drain(..) {
            let result = if stopped {
                Err(Error::NotConfigured)
            } else {
                Ok(())
            };
            waiter.send(result).ok();
        }
    }

    /// Tear down the current session. Safe to call repeatedly.
    async fn stop_session(&mut self) {
        self.debounce_at = None;
        self.upload_queued = false;
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.subscriptions.clear();
        if let Err(error) = session.outbox.flush(session.store.as_ref()).await {
            let dropped = session.outbox.len();
            tracing::warn!(
                "Dropping {dropped} unsaved local write(s) for user {}: {error}",
                session.user_id
            );
            self.emit(SyncEvent::LocalWritesDropped {
                user_id: session.user_id.clone(),
                dropped,
            });
        }
        self.resolve_flush_waiters(true);

        let online = self.online;
        self.publish(|snapshot| {
            snapshot.pending_changes = 0;
            snapshot.outbox_len = 0;
            snapshot.status = if online {
                SyncStatus::Idle
            } else {
                SyncStatus::Offline
            };
        });
        tracing::info!("Stopped sync for user {}", session.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRecordStore;
    use crate::models::Note;
    use crate::remote::MemoryDocumentStore;

    struct Fixture {
        worker: Worker,
        remote: MemoryDocumentStore,
        store: Arc<SqliteRecordStore>,
        _batches: mpsc::Receiver<ListenerBatch>,
        _reports: mpsc::UnboundedReceiver<UploadReport>,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let remote = MemoryDocumentStore::new();
        let (snapshot, _) = watch::channel(SyncSnapshot::default());
        let (events, _) = broadcast::channel(16);
        let (batches_tx, batches_rx) = mpsc::channel(config.listener_buffer);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(
            Arc::new(remote.clone()),
            ProfileCache::from_config(&config),
            config,
            snapshot,
            events,
            batches_tx,
            reports_tx,
        );
        Fixture {
            worker,
            remote,
            store: Arc::new(SqliteRecordStore::open_in_memory().unwrap()),
            _batches: batches_rx,
            _reports: reports_rx,
        }
    }

    fn remote_note(title: &str) -> (Note, Document) {
        let mut note = Note::new(title, "");
        note.needs_sync = false;
        let document = Record::Note(note.clone()).to_document().unwrap();
        (note, document)
    }

    #[tokio::test]
    async fn stale_listener_batches_are_dropped() {
        let mut fx = fixture(SyncConfig::default());
        fx.worker
            .configure("u1".to_string(), fx.store.clone())
            .await
            .unwrap();
        let stale = fx.worker.current_generation().unwrap();
        fx.worker
            .configure("u1".to_string(), fx.store.clone())
            .await
            .unwrap();
        let current = fx.worker.current_generation().unwrap();
        assert_ne!(stale, current);

        let (note, document) = remote_note("late");
        fx.worker
            .on_listener_batch(ListenerBatch {
                generation: stale,
                kind: RecordKind::Note,
                documents: vec![document.clone()],
            })
            .await;
        assert!(fx.store.get(RecordKind::Note, note.id).await.unwrap().is_none());

        fx.worker
            .on_listener_batch(ListenerBatch {
                generation: current,
                kind: RecordKind::Note,
                documents: vec![document],
            })
            .await;
        assert!(fx.store.get(RecordKind::Note, note.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overflowed_listener_refetches_collection() {
        let mut fx = fixture(SyncConfig::default().with_listener_buffer(1));
        fx.worker
            .configure("u1".to_string(), fx.store.clone())
            .await
            .unwrap();

        // The profile snapshot fills the queue, so this write overflows it
        let (note, document) = remote_note("from another device");
        fx.remote
            .put(&CollectionPath::new("u1", RecordKind::Note), document);
        assert!(fx.store.get(RecordKind::Note, note.id).await.unwrap().is_none());

        fx.worker.recover_overflow().await;
        let stored = fx.store.get(RecordKind::Note, note.id).await.unwrap();
        assert_eq!(stored, Some(Record::Note(note)));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_removes_listeners() {
        let mut fx = fixture(SyncConfig::default());
        fx.worker
            .configure("u1".to_string(), fx.store.clone())
            .await
            .unwrap();
        assert_eq!(fx.remote.listener_count(), 2);

        fx.worker.stop_session().await;
        fx.worker.stop_session().await;
        assert_eq!(fx.remote.listener_count(), 0);
        assert!(fx.worker.session.is_none());
        assert_eq!(fx.worker.snapshot.borrow().status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn empty_user_id_is_rejected() {
        let mut fx = fixture(SyncConfig::default());
        let result = fx.worker.configure("  ".to_string(), fx.store.clone()).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
