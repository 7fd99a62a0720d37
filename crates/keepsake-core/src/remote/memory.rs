//! In-process remote document store

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    ChangeHandler, CollectionPath, Document, RemoteDocumentStore, RemoteError, RemoteResult,
    Subscription,
};
use crate::models::RecordKind;

type Collection = BTreeMap<String, Document>;

/// Persisted shape of the whole document tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DocumentTree {
    pub users: BTreeMap<String, BTreeMap<RecordKind, Collection>>,
}

struct Listener {
    path: CollectionPath,
    handler: ChangeHandler,
}

#[derive(Default)]
struct State {
    tree: DocumentTree,
    listeners: HashMap<u64, Listener>,
    next_listener: u64,
    offline: bool,
    rejected: HashSet<String>,
    writes: usize,
}

impl State {
    fn ensure_online(&self) -> RemoteResult<()> {
        if self.offline {
            return Err(RemoteError::Unavailable("remote store is offline".to_string()));
        }
        Ok(())
    }

    fn ensure_accepted(&self, path: &CollectionPath, id: &str) -> RemoteResult<()> {
        if self.rejected.contains(id) {
            return Err(RemoteError::Rejected(path.document(id)));
        }
        Ok(())
    }

    fn collection(&self, path: &CollectionPath) -> Option<&Collection> {
        self.tree.users.get(&path.user_id)?.get(&path.kind)
    }

    fn snapshot(&self, path: &CollectionPath) -> Vec<Document> {
        self.collection(path)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default()
    }

    fn deliveries(&self, path: &CollectionPath) -> Vec<(ChangeHandler, Vec<Document>)> {
        if self.offline {
            return Vec::new();
        }
        self.listeners
            .values()
            .filter(|listener| &listener.path == path)
            .map(|listener| (Arc::clone(&listener.handler), self.snapshot(path)))
            .collect()
    }

    fn remove_document(&mut self, path: &CollectionPath, id: &str) -> RemoteResult<bool> {
        self.ensure_accepted(path, id)?;
        let removed = self
            .tree
            .users
            .get_mut(&path.user_id)
            .and_then(|collections| collections.get_mut(&path.kind))
            .and_then(|documents| documents.remove(id))
            .is_some();
        if removed {
            self.writes += 1;
        }
        Ok(removed)
    }
}

/// In-memory document store with snapshot listeners.
///
/// Cloning shares the underlying tree, so clones behave like several devices
/// connected to the same backend.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<State>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tree(tree: DocumentTree) -> Self {
        let store = Self::default();
        store.lock().tree = tree;
        store
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn replace_tree(&self, tree: DocumentTree) {
        self.lock().tree = tree;
    }

    pub(crate) fn export(&self) -> DocumentTree {
        self.lock().tree.clone()
    }

    /// Simulate losing (or regaining) connectivity.
    ///
    /// Coming back online re-delivers a snapshot to every listener.
    pub fn set_offline(&self, offline: bool) {
        let deliveries = {
            let mut state = self.lock();
            let was_offline = state.offline;
            state.offline = offline;
            if was_offline && !offline {
                let paths: Vec<CollectionPath> = state
                    .listeners
                    .values()
                    .map(|listener| listener.path.clone())
                    .collect();
                paths
                    .iter()
                    .flat_map(|path| state.deliveries(path))
                    .collect()
            } else {
                Vec::new()
            }
        };
        deliver(deliveries);
    }

    /// Make writes and deletes of this document id fail
    pub fn reject_document(&self, id: &str) {
        self.lock().rejected.insert(id.to_string());
    }

    pub fn accept_document(&self, id: &str) {
        self.lock().rejected.remove(id);
    }

    /// Whether any data is stored under `users/{uid}`
    pub fn user_exists(&self, user_id: &str) -> bool {
        self.lock().tree.users.contains_key(user_id)
    }

    /// Number of successful document writes and deletes
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Number of active listener registrations
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Write a document directly, as another device would
    pub fn put(&self, path: &CollectionPath, document: Document) {
        let deliveries = {
            let mut state = self.lock();
            state
                .tree
                .users
                .entry(path.user_id.clone())
                .or_default()
                .entry(path.kind)
                .or_default()
                .insert(document.id.clone(), document);
            state.deliveries(path)
        };
        deliver(deliveries);
    }

    /// Read a document without going through the async contract
    pub fn document(&self, path: &CollectionPath, id: &str) -> Option<Document> {
        self.lock()
            .collection(path)
            .and_then(|documents| documents.get(id).cloned())
    }
}

fn deliver(deliveries: Vec<(ChangeHandler, Vec<Document>)>) {
    for (handler, snapshot) in deliveries {
        handler(snapshot);
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> RemoteResult<Option<Document>> {
        let state = self.lock();
        state.ensure_online()?;
        Ok(state
            .collection(path)
            .and_then(|documents| documents.get(id).cloned()))
    }

    async fn list(&self, path: &CollectionPath) -> RemoteResult<Vec<Document>> {
        let state = self.lock();
        state.ensure_online()?;
        Ok(state.snapshot(path))
    }

    async fn set(
        &self,
        path: &CollectionPath,
        id: &str,
        mut document: Document,
        merge: bool,
    ) -> RemoteResult<()> {
        let deliveries = {
            let mut state = self.lock();
            state.ensure_online()?;
            state.ensure_accepted(path, id)?;
            document.id = id.to_string();
            let documents = state
                .tree
                .users
                .entry(path.user_id.clone())
                .or_default()
                .entry(path.kind)
                .or_default();
            match documents.entry(id.to_string()) {
                Entry::Occupied(mut entry) if merge => entry.get_mut().merge_from(document),
                Entry::Occupied(mut entry) => {
                    entry.insert(document);
                }
                Entry::Vacant(entry) => {
                    entry.insert(document);
                }
            }
            state.writes += 1;
            state.deliveries(path)
        };
        deliver(deliveries);
        Ok(())
    }

    async fn delete(&self, path: &CollectionPath, id: &str) -> RemoteResult<()> {
        let deliveries = {
            let mut state = self.lock();
            state.ensure_online()?;
            if !state.remove_document(path, id)? {
                return Ok(());
            }
            state.deliveries(path)
        };
        deliver(deliveries);
        Ok(())
    }

    fn listen(&self, path: &CollectionPath, handler: ChangeHandler) -> RemoteResult<Subscription> {
        let (key, initial) = {
            let mut state = self.lock();
            let key = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(
                key,
                Listener {
                    path: path.clone(),
                    handler: Arc::clone(&handler),
                },
            );
            let initial = (!state.offline).then(|| state.snapshot(path));
            (key, initial)
        };

        if let Some(snapshot) = initial {
            handler(snapshot);
        }

        let state = Arc::clone(&self.state);
        Ok(Subscription::new(move || {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .listeners
                .remove(&key);
        }))
    }

    async fn delete_all(&self, user_id: &str) -> RemoteResult<()> {
        let notes = CollectionPath::new(user_id, RecordKind::Note);
        let profile = CollectionPath::new(user_id, RecordKind::Profile);

        let (failed, deliveries) = {
            let mut state = self.lock();
            state.ensure_online()?;

            let note_ids: Vec<String> = state
                .collection(&notes)
                .map(|documents| documents.keys().cloned().collect())
                .unwrap_or_default();
            let profile_ids: Vec<String> = state
                .collection(&profile)
                .map(|documents| documents.keys().cloned().collect())
                .unwrap_or_default();

            let mut failed = Vec::new();
            for (path, id) in note_ids
                .iter()
                .map(|id| (&notes, id))
                .chain(profile_ids.iter().map(|id| (&profile, id)))
            {
                if let Err(error) = state.remove_document(path, id) {
                    tracing::warn!("Cascade delete failed for {}: {error}", path.document(id));
                    failed.push(path.document(id));
                }
            }

            if failed.is_empty() {
                state.tree.users.remove(user_id);
            }

            let mut deliveries = state.deliveries(&notes);
            deliveries.extend(state.deliveries(&profile));
            (failed, deliveries)
        };
        deliver(deliveries);

        if failed.is_empty() {
            Ok(())
        } else {
            Err(RemoteError::CascadeIncomplete { failed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(id: &str, value: Value) -> Document {
        let Value::Object(fields) = value else {
            unreachable!()
        };
        Document::new(id.to_string(), fields)
    }

    fn counting_handler() -> (ChangeHandler, Arc<Mutex<Vec<usize>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: ChangeHandler = Arc::new(move |documents: Vec<Document>| {
            sink.lock().unwrap().push(documents.len());
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn set_then_get_round_trip() {
        let store = MemoryDocumentStore::new();
        let path = CollectionPath::new("u1", RecordKind::Note);
        store
            .set(&path, "a", doc("a", json!({"title": "x"})), true)
            .await
            .unwrap();
        let fetched = store.get(&path, "a").await.unwrap().unwrap();
        assert_eq!(fetched.fields["title"], json!("x"));
        assert!(store.get(&path, "missing").await.unwrap().is_none());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn merge_keeps_unknown_fields_and_replace_drops_them() {
        let store = MemoryDocumentStore::new();
        let path = CollectionPath::new("u1", RecordKind::Note);
        store
            .set(&path, "a", doc("a", json!({"title": "x", "extra": 1})), false)
            .await
            .unwrap();
        store
            .set(&path, "a", doc("a", json!({"title": "y"})), true)
            .await
            .unwrap();
        let merged = store.get(&path, "a").await.unwrap().unwrap();
        assert_eq!(merged.fields["title"], json!("y"));
        assert_eq!(merged.fields["extra"], json!(1));

        store
            .set(&path, "a", doc("a", json!({"title": "z"})), false)
            .await
            .unwrap();
        let replaced = store.get(&path, "a").await.unwrap().unwrap();
        assert!(!replaced.fields.contains_key("extra"));
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryDocumentStore::new();
        let path = CollectionPath::new("u1", RecordKind::Note);
        store.set_offline(true);
        let error = store.list(&path).await.unwrap_err();
        assert!(matches!(error, RemoteError::Unavailable(_)));
        assert!(store
            .set(&path, "a", Document::new("a".into(), Map::new()), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn listeners_receive_initial_and_change_snapshots() {
        let store = MemoryDocumentStore::new();
        let path = CollectionPath::new("u1", RecordKind::Note);
        let (handler, seen) = counting_handler();
        let subscription = store.listen(&path, handler).unwrap();

        store
            .set(&path, "a", doc("a", json!({})), true)
            .await
            .unwrap();
        store
            .set(&path, "b", doc("b", json!({})), true)
            .await
            .unwrap();
        store.delete(&path, "a").await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 1]);

        drop(subscription);
        assert_eq!(store.listener_count(), 0);
        store
            .set(&path, "c", doc("c", json!({})), true)
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn reconnect_redelivers_snapshots() {
        let store = MemoryDocumentStore::new();
        let path = CollectionPath::new("u1", RecordKind::Note);
        store.set_offline(true);
        let (handler, seen) = counting_handler();
        let _subscription = store.listen(&path, handler).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        store.put(&path, doc("a", json!({})));
        store.set_offline(false);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn delete_all_removes_user_tree() {
        let store = MemoryDocumentStore::new();
        let notes = CollectionPath::new("u1", RecordKind::Note);
        let profile = CollectionPath::new("u1", RecordKind::Profile);
        store.put(&notes, doc("a", json!({})));
        store.put(&notes, doc("b", json!({})));
        store.put(&profile, doc("data", json!({})));
        store.put(&CollectionPath::new("u2", RecordKind::Note), doc("c", json!({})));

        store.delete_all("u1").await.unwrap();
        assert!(!store.user_exists("u1"));
        assert!(store.user_exists("u2"));
    }

    #[tokio::test]
    async fn partial_cascade_failure_keeps_user_root() {
        let store = MemoryDocumentStore::new();
        let notes = CollectionPath::new("u1", RecordKind::Note);
        let profile = CollectionPath::new("u1", RecordKind::Profile);
        store.put(&notes, doc("a", json!({})));
        store.put(&notes, doc("b", json!({})));
        store.put(&profile, doc("data", json!({})));
        store.reject_document("b");

        let error = store.delete_all("u1").await.unwrap_err();
        let RemoteError::CascadeIncomplete { failed } = error else {
            panic!("expected CascadeIncomplete, got {error:?}");
        };
        assert_eq!(failed, vec!["users/u1/notes/b".to_string()]);
        assert!(store.user_exists("u1"));
        assert!(store.document(&notes, "a").is_none());
        assert!(store.document(&profile, "data").is_none());

        store.accept_document("b");
        store.delete_all("u1").await.unwrap();
        assert!(!store.user_exists("u1"));
    }

    #[tokio::test]
    async fn clones_share_one_backend() {
        let device_a = MemoryDocumentStore::new();
        let device_b = device_a.clone();
        let path = CollectionPath::new("u1", RecordKind::Note);
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&writes);
        let _subscription = device_b
            .listen(
                &path,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        device_a
            .set(&path, "a", doc("a", json!({})), true)
            .await
            .unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 2);
        assert!(device_b.get(&path, "a").await.unwrap().is_some());
    }
}
