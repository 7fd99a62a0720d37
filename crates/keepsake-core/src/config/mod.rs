//! Sync engine configuration.
//!
//! Provides a `SyncConfig` struct shared by the engine, the profile cache and
//! the CLI. Values can be loaded from a JSON file; missing keys fall back to
//! the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_PROFILE_CACHE_TTL_MS: u64 = 5_000;
const DEFAULT_LISTENER_BUFFER: usize = 64;

/// Tunables for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Quiet period after the last local edit before an upload pass starts
    pub debounce_ms: u64,
    /// How long a cached profile is served without re-reading the store
    pub profile_cache_ttl_ms: u64,
    /// Capacity of the queue between remote listeners and the engine
    pub listener_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            profile_cache_ttl_ms: DEFAULT_PROFILE_CACHE_TTL_MS,
            listener_buffer: DEFAULT_LISTENER_BUFFER,
        }
    }
}

impl SyncConfig {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub const fn profile_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.profile_cache_ttl_ms)
    }

    /// Set the debounce window
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = duration_millis(debounce);
        self
    }

    /// Set the profile cache TTL
    #[must_use]
    pub const fn with_profile_cache_ttl(mut self, ttl: Duration) -> Self {
        self.profile_cache_ttl_ms = duration_millis(ttl);
        self
    }

    /// Set the listener queue capacity
    #[must_use]
    pub const fn with_listener_buffer(mut self, capacity: usize) -> Self {
        self.listener_buffer = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            return Err(Error::Config("debounce_ms must be greater than 0".to_string()));
        }
        if self.profile_cache_ttl_ms == 0 {
            return Err(Error::Config(
                "profile_cache_ttl_ms must be greater than 0".to_string(),
            ));
        }
        if self.listener_buffer == 0 {
            return Err(Error::Config(
                "listener_buffer must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON config payload.
    pub fn parse(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid sync config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from disk, using defaults when the file does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No sync config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }
}

const fn duration_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_timings() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce(), Duration::from_secs(2));
        assert_eq!(config.profile_cache_ttl(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_fills_missing_fields_with_defaults() {
        let config = SyncConfig::parse(r#"{ "debounce_ms": 250 }"#).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.listener_buffer, DEFAULT_LISTENER_BUFFER);
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = SyncConfig::parse(r#"{ "debounce": 250 }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parse_rejects_zero_values() {
        let error = SyncConfig::parse(r#"{ "listener_buffer": 0 }"#).unwrap_err();
        assert!(error.to_string().contains("listener_buffer"));
    }

    #[test]
    fn load_from_missing_path_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_from_path(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn builders_override_timings() {
        let config = SyncConfig::default()
            .with_debounce(Duration::from_millis(10))
            .with_profile_cache_ttl(Duration::from_millis(20))
            .with_listener_buffer(4);
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.profile_cache_ttl_ms, 20);
        assert_eq!(config.listener_buffer, 4);
    }
}
