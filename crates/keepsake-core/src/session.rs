//! Drive the sync engine from sign-in and sign-out events

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::db::LocalRecordStore;
use crate::error::Error;
use crate::sync::SyncEngine;

/// Identity changes published by the auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    SignedOut,
}

/// Configure the engine on sign-in and stop it on sign-out.
///
/// Returns when the event channel closes or the engine shuts down.
pub async fn run_session_loop(
    engine: SyncEngine,
    store: Arc<dyn LocalRecordStore>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Session loop missed {skipped} identity event(s)");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let result = match event {
            SessionEvent::SignedIn { user_id } => {
                tracing::info!("User {user_id} signed in, starting sync");
                engine.configure(user_id, Arc::clone(&store)).await
            }
            SessionEvent::SignedOut => {
                tracing::info!("User signed out, stopping sync");
                engine.stop().await
            }
        };

        match result {
            Ok(()) => {}
            Err(Error::EngineStopped) => {
                tracing::debug!("Sync engine stopped, leaving session loop");
                return;
            }
            Err(error) => tracing::error!("Failed to apply session change: {error}"),
        }
    }
    tracing::debug!("Identity event channel closed, leaving session loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProfileCache;
    use crate::config::SyncConfig;
    use crate::db::SqliteRecordStore;
    use crate::remote::MemoryDocumentStore;
    use crate::state::SyncStatus;

    fn engine(remote: &MemoryDocumentStore) -> SyncEngine {
        SyncEngine::new(
            Arc::new(remote.clone()),
            ProfileCache::default(),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn sign_in_configures_and_sign_out_stops() {
        let remote = MemoryDocumentStore::new();
        let engine = engine(&remote);
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let (events, receiver) = broadcast::channel(8);
        let driver = tokio::spawn(run_session_loop(engine.clone(), store, receiver));

        events
            .send(SessionEvent::SignedIn {
                user_id: "u1".to_string(),
            })
            .unwrap();
        events.send(SessionEvent::SignedOut).unwrap();
        drop(events);
        driver.await.unwrap();

        assert_eq!(remote.listener_count(), 0);
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert!(engine.profile_cache().is_initialized());
        assert!(matches!(engine.flush().await, Err(Error::NotConfigured)));
    }

    #[tokio::test]
    async fn sign_in_leaves_engine_running() {
        let remote = MemoryDocumentStore::new();
        let engine = engine(&remote);
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let (events, receiver) = broadcast::channel(8);
        let driver = tokio::spawn(run_session_loop(engine.clone(), store, receiver));

        events
            .send(SessionEvent::SignedIn {
                user_id: "u1".to_string(),
            })
            .unwrap();
        drop(events);
        driver.await.unwrap();

        assert_eq!(remote.listener_count(), 2);
        engine.flush().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_sign_in_does_not_end_the_loop() {
        let remote = MemoryDocumentStore::new();
        let engine = engine(&remote);
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let (events, receiver) = broadcast::channel(8);
        let driver = tokio::spawn(run_session_loop(engine.clone(), store, receiver));

        events
            .send(SessionEvent::SignedIn {
                user_id: " ".to_string(),
            })
            .unwrap();
        events
            .send(SessionEvent::SignedIn {
                user_id: "u2".to_string(),
            })
            .unwrap();
        drop(events);
        driver.await.unwrap();

        assert_eq!(remote.listener_count(), 2);
    }
}
