//! Short-lived in-memory cache of the profile singleton

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::db::{ensure_profile, LocalRecordStore, RecordQuery};
use crate::error::{Error, Result};
use crate::models::{Profile, Record, RecordKind, DEFAULT_PROFILE_NAME};

#[derive(Default)]
struct CacheState {
    store: Option<Arc<dyn LocalRecordStore>>,
    profile: Option<Profile>,
    fetched_at: Option<Instant>,
    initialized: bool,
}

/// Profile cache shared by the UI and the sync engine.
///
/// Reads within the TTL are served from memory; the store is only written by
/// the fetch-or-create in [`configure`](Self::configure).
#[derive(Clone)]
pub struct ProfileCache {
    state: Arc<Mutex<CacheState>>,
    ttl: Duration,
}

impl ProfileCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            ttl,
        }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.profile_cache_ttl())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind to a store, creating the profile if it does not exist yet
    pub async fn configure(&self, store: Arc<dyn LocalRecordStore>) -> Result<Profile> {
        let profile = ensure_profile(store.as_ref()).await?;
        let mut state = self.lock();
        state.store = Some(store);
        state.profile = Some(profile.clone());
        state.fetched_at = Some(Instant::now());
        state.initialized = true;
        Ok(profile)
    }

    /// Cached profile, re-read from the store once the TTL has expired or
    /// when `force` is set
    pub async fn read(&self, force: bool) -> Result<Profile> {
        let store = {
            let state = self.lock();
            if !force {
                if let (Some(profile), Some(fetched_at)) = (&state.profile, state.fetched_at) {
                    if fetched_at.elapsed() < self.ttl {
                        return Ok(profile.clone());
                    }
                }
            }
            state.store.clone().ok_or(Error::NotConfigured)?
        };
        self.refresh(store.as_ref()).await
    }

    /// Drop the freshness timer and re-read immediately.
    ///
    /// A cache that was never configured has nothing to refresh.
    pub async fn invalidate(&self) -> Result<()> {
        let store = {
            let mut state = self.lock();
            state.fetched_at = None;
            state.store.clone()
        };
        if let Some(store) = store {
            self.refresh(store.as_ref()).await?;
        }
        Ok(())
    }

    /// Replace the cached value with one known to be current
    pub fn update(&self, profile: Profile) {
        let mut state = self.lock();
        state.profile = Some(profile);
        state.fetched_at = Some(Instant::now());
    }

    /// Forget the bound store and cached value
    pub fn reset(&self) {
        *self.lock() = CacheState::default();
    }

    pub fn current(&self) -> Option<Profile> {
        self.lock().profile.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Display name, falling back to the default before the first load
    pub fn name(&self) -> String {
        self.current()
            .map_or_else(|| DEFAULT_PROFILE_NAME.to_string(), |profile| profile.name)
    }

    async fn refresh(&self, store: &dyn LocalRecordStore) -> Result<Profile> {
        let profile = store
            .fetch(&RecordQuery::of_kind(RecordKind::Profile).with_limit(1))
            .await?
            .into_iter()
            .find_map(|record| match record {
                Record::Profile(profile) => Some(profile),
                Record::Note(_) => None,
            })
            .ok_or_else(|| Error::NotFound("profile".to_string()))?;

        self.update(profile.clone());
        Ok(profile)
    }
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRecordStore;

    async fn setup() -> (ProfileCache, Arc<SqliteRecordStore>) {
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let cache = ProfileCache::new(Duration::from_secs(5));
        cache.configure(store.clone()).await.unwrap();
        (cache, store)
    }

    async fn rename_in_store(store: &SqliteRecordStore, profile: &Profile, name: &str) {
        let mut renamed = profile.clone();
        renamed.name = name.to_string();
        store.insert(&Record::Profile(renamed)).await.unwrap();
        store.save().await.unwrap();
    }

    #[tokio::test]
    async fn unconfigured_cache_uses_default_name() {
        let cache = ProfileCache::default();
        assert!(!cache.is_initialized());
        assert_eq!(cache.name(), "User");
        assert!(matches!(cache.read(false).await, Err(Error::NotConfigured)));
        cache.invalidate().await.unwrap();
    }

    #[tokio::test]
    async fn configure_creates_profile() {
        let (cache, _store) = setup().await;
        assert!(cache.is_initialized());
        assert_eq!(cache.name(), "User");
    }

    #[tokio::test(start_paused = true)]
    async fn read_serves_cache_within_ttl() {
        let (cache, store) = setup().await;
        let profile = cache.current().unwrap();
        rename_in_store(&store, &profile, "Alice").await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.read(false).await.unwrap().name, "User");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.read(false).await.unwrap().name, "Alice");
    }

    #[tokio::test(start_paused = true)]
    async fn force_and_invalidate_bypass_ttl() {
        let (cache, store) = setup().await;
        let profile = cache.current().unwrap();

        rename_in_store(&store, &profile, "Alice").await;
        assert_eq!(cache.read(true).await.unwrap().name, "Alice");

        rename_in_store(&store, &profile, "Bob").await;
        cache.invalidate().await.unwrap();
        assert_eq!(cache.name(), "Bob");
    }

    #[tokio::test]
    async fn update_pushes_value_without_refetch() {
        let (cache, _store) = setup().await;
        let mut profile = cache.current().unwrap();
        profile.name = "Local edit".to_string();
        cache.update(profile);
        assert_eq!(cache.read(false).await.unwrap().name, "Local edit");
    }
}
