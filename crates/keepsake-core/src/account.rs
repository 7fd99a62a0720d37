//! Account deletion across the remote store, identity provider and device

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::db::{LocalRecordStore, RecordQuery};
use crate::error::{Error, Result};
use crate::remote::RemoteDocumentStore;
use crate::sync::{bootstrap_key, SyncEngine};

/// The authentication backend, as far as sync is concerned
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Currently signed-in user, if any
    async fn current_user_id(&self) -> Option<String>;

    /// Permanently delete the signed-in user
    async fn delete_current_user(&self) -> Result<()>;
}

/// Identity held in process, for the CLI and tests
#[derive(Debug, Default)]
pub struct LocalIdentity {
    user_id: Mutex<Option<String>>,
}

impl LocalIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Mutex::new(Some(user_id.into())),
        }
    }

    pub fn sign_out(&self) {
        *self.user_id.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn current_user_id(&self) -> Option<String> {
        self.user_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn delete_current_user(&self) -> Result<()> {
        self.user_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|_| ())
            .ok_or(Error::NotSignedIn)
    }
}

/// Delete the signed-in user's data everywhere.
///
/// Remote data goes first; the identity is only deleted once the cascade
/// succeeded, so a partial failure can be retried by the same user. Local
/// records and the bootstrap flag are wiped last.
pub async fn delete_account(
    engine: &SyncEngine,
    remote: &dyn RemoteDocumentStore,
    identity: &dyn IdentityProvider,
    store: &dyn LocalRecordStore,
) -> Result<()> {
    let user_id = identity
        .current_user_id()
        .await
        .ok_or(Error::NotSignedIn)?;

    engine.stop().await?;
    tracing::info!("Deleting remote data for user {user_id}");
    remote.delete_all(&user_id).await?;
    identity.delete_current_user().await?;

    let records = store.fetch(&RecordQuery::all()).await?;
    let wiped = records.len();
    for record in records {
        store.delete(record.kind(), record.id()).await?;
    }
    store.clear_setting(&bootstrap_key(&user_id)).await?;
    store.save().await?;
    engine.profile_cache().reset();

    tracing::info!("Deleted account {user_id} and {wiped} local record(s)");
    Ok(())
}
