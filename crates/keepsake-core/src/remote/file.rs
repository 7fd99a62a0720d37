//! File-backed remote document store
//!
//! Keeps the whole document tree in a single JSON file so that several local
//! databases on one machine can act as separate devices sharing a backend.
//! Every call re-reads the file first, so processes see each other's writes.
//! Writes are not locked across processes: two writes landing in the same
//! read-modify-write window keep only the later one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::memory::DocumentTree;
use super::{
    ChangeHandler, CollectionPath, Document, MemoryDocumentStore, RemoteDocumentStore,
    RemoteResult, Subscription,
};

/// Remote store persisted to a JSON file after every write
#[derive(Clone)]
pub struct FileDocumentStore {
    path: PathBuf,
    inner: MemoryDocumentStore,
}

impl FileDocumentStore {
    /// Open the store, starting empty when the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> RemoteResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tree = read_tree(&path)?;

        tracing::debug!("Opened remote document file at {}", path.display());
        Ok(Self {
            path,
            inner: MemoryDocumentStore::from_tree(tree),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user_exists(&self, user_id: &str) -> bool {
        self.inner.user_exists(user_id)
    }

    /// Pick up writes made by other processes since the last call
    fn reload(&self) -> RemoteResult<()> {
        self.inner.replace_tree(read_tree(&self.path)?);
        Ok(())
    }

    fn persist(&self) -> RemoteResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let payload = serde_json::to_string_pretty(&self.inner.export())?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, payload)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

fn read_tree(path: &Path) -> RemoteResult<DocumentTree> {
    if !path.exists() {
        return Ok(DocumentTree::default());
    }
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(DocumentTree::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

#[async_trait]
impl RemoteDocumentStore for FileDocumentStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> RemoteResult<Option<Document>> {
        self.reload()?;
        self.inner.get(path, id).await
    }

    async fn list(&self, path: &CollectionPath) -> RemoteResult<Vec<Document>> {
        self.reload()?;
        self.inner.list(path).await
    }

    async fn set(
        &self,
        path: &CollectionPath,
        id: &str,
        document: Document,
        merge: bool,
    ) -> RemoteResult<()> {
        self.reload()?;
        self.inner.set(path, id, document, merge).await?;
        self.persist()
    }

    async fn delete(&self, path: &CollectionPath, id: &str) -> RemoteResult<()> {
        self.reload()?;
        self.inner.delete(path, id).await?;
        self.persist()
    }

    fn listen(&self, path: &CollectionPath, handler: ChangeHandler) -> RemoteResult<Subscription> {
        self.inner.listen(path, handler)
    }

    async fn delete_all(&self, user_id: &str) -> RemoteResult<()> {
        self.reload()?;
        let result = self.inner.delete_all(user_id).await;
        self.persist()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, Record, RecordKind};

    #[tokio::test]
    async fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("remote").join("documents.json");
        let path = CollectionPath::new("u1", RecordKind::Note);
        let record = Record::Note(Note::new("Shared", "across devices"));

        let store = FileDocumentStore::open(&file).unwrap();
        store
            .set(&path, &record.document_id(), record.to_document().unwrap(), true)
            .await
            .unwrap();
        assert!(file.exists());

        let reopened = FileDocumentStore::open(&file).unwrap();
        let document = reopened
            .get(&path, &record.document_id())
            .await
            .unwrap()
            .unwrap();
        let decoded = Record::from_document(RecordKind::Note, &document).unwrap();
        assert_eq!(decoded.id(), record.id());
        assert!(!decoded.needs_sync());
    }

    #[tokio::test]
    async fn delete_all_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("documents.json");
        let path = CollectionPath::new("u1", RecordKind::Note);
        let record = Record::Note(Note::new("Gone", ""));

        let store = FileDocumentStore::open(&file).unwrap();
        store
            .set(&path, &record.document_id(), record.to_document().unwrap(), true)
            .await
            .unwrap();
        store.delete_all("u1").await.unwrap();

        let reopened = FileDocumentStore::open(&file).unwrap();
        assert!(!reopened.user_exists("u1"));
    }

    #[tokio::test]
    async fn concurrent_handles_keep_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("documents.json");
        let path = CollectionPath::new("u1", RecordKind::Note);
        let laptop = FileDocumentStore::open(&file).unwrap();
        let phone = FileDocumentStore::open(&file).unwrap();

        let first = Record::Note(Note::new("from laptop", ""));
        laptop
            .set(&path, &first.document_id(), first.to_document().unwrap(), true)
            .await
            .unwrap();
        let second = Record::Note(Note::new("from phone", ""));
        phone
            .set(&path, &second.document_id(), second.to_document().unwrap(), true)
            .await
            .unwrap();

        assert_eq!(laptop.list(&path).await.unwrap().len(), 2);
        let reopened = FileDocumentStore::open(&file).unwrap();
        assert!(reopened.get(&path, &first.document_id()).await.unwrap().is_some());
        assert!(reopened.get(&path, &second.document_id()).await.unwrap().is_some());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("documents.json");
        std::fs::write(&file, "{ not json").unwrap();
        assert!(FileDocumentStore::open(&file).is_err());
    }
}
