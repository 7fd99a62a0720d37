//! Upload pass: push dirty records to the remote store

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::{Record, RecordId, RecordKind};
use crate::remote::{CollectionPath, RemoteDocumentStore};

/// A record confirmed by the remote store at a given `updated_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Uploaded {
    pub kind: RecordKind,
    pub id: RecordId,
    pub updated_at: i64,
}

/// Outcome of one pass, sent back to the worker
#[derive(Debug)]
pub(crate) struct UploadReport {
    /// Session the pass was started for
    pub generation: u64,
    pub uploaded: Vec<Uploaded>,
    pub failed: usize,
}

/// Merge-write each record independently; one failure does not stop the pass
pub(crate) async fn run_pass(
    remote: Arc<dyn RemoteDocumentStore>,
    user_id: String,
    generation: u64,
    records: Vec<Record>,
    reports: mpsc::UnboundedSender<UploadReport>,
) {
    let mut uploaded = Vec::with_capacity(records.len());
    let mut failed = 0;

    for record in records {
        let path = CollectionPath::new(user_id.as_str(), record.kind());
        let result = match record.to_document() {
            Ok(document) => {
                remote
                    .set(&path, &record.document_id(), document, true)
                    .await
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => uploaded.push(Uploaded {
                kind: record.kind(),
                id: record.id(),
                updated_at: record.updated_at(),
            }),
            Err(error) => {
                failed += 1;
                tracing::warn!(
                    "Upload of {} {} failed, will retry: {error}",
                    record.kind(),
                    record.id()
                );
            }
        }
    }

    tracing::debug!(
        "Upload pass finished: {} uploaded, {failed} failed",
        uploaded.len()
    );
    if reports
        .send(UploadReport {
            generation,
            uploaded,
            failed,
        })
        .is_err()
    {
        tracing::debug!("Sync engine stopped before upload report was delivered");
    }
}
