//! Module I — Cache Version Service.
//!
//! A separate KV namespace mapping a sanitized cache key to `{version}`.
//! Bumped on cache-miss to invalidate downstream caches, per the policy
//! in spec §4.I.

use crate::cache::key::sanitize_for_version_namespace;
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

/// Sled's practical key-length comfort zone before we hash instead.
const MAX_VERSION_KEY_LEN: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRecord {
    version: u32,
}

pub struct VersionService {
    db: Db,
}

impl VersionService {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = sled::open(path).map_err(|e| CacheError::VersioningFailure(e.to_string()))?;
        Ok(Self { db })
    }

    /// Returns 1 when no prior record exists. When a record exists: if
    /// `version > 1`, always increments; if `version == 1`, increments
    /// only when `force_increment` is set.
    pub fn get_next_version(&self, key: &str, force_increment: bool) -> Result<u32, CacheError> {
        let ns_key = sanitize_for_version_namespace(key, MAX_VERSION_KEY_LEN);
        let existing = self
            .db
            .get(ns_key.as_bytes())
            .map_err(|e| CacheError::VersioningFailure(e.to_string()))?
            .and_then(|v| serde_json::from_slice::<VersionRecord>(&v).ok());

        let next = match existing {
            None => 1,
            Some(record) if record.version > 1 => record.version + 1,
            Some(record) if force_increment => record.version + 1,
            Some(record) => record.version,
        };

        let record = VersionRecord { version: next };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| CacheError::VersioningFailure(e.to_string()))?;
        self.db
            .insert(ns_key.as_bytes(), bytes)
            .map_err(|e| CacheError::VersioningFailure(e.to_string()))?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (VersionService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (VersionService::open(dir.path()).unwrap(), dir)
    }

    #[test]
    fn first_call_returns_one() {
        let (svc, _dir) = service();
        assert_eq!(svc.get_next_version("video:a.mp4", false).unwrap(), 1);
    }

    #[test]
    fn stays_at_one_without_force_increment() {
        let (svc, _dir) = service();
        svc.get_next_version("video:a.mp4", false).unwrap();
        assert_eq!(svc.get_next_version("video:a.mp4", false).unwrap(), 1);
    }

    #[test]
    fn force_increment_advances_past_one_and_then_always_advances() {
        let (svc, _dir) = service();
        svc.get_next_version("video:a.mp4", false).unwrap();
        assert_eq!(svc.get_next_version("video:a.mp4", true).unwrap(), 2);
        assert_eq!(svc.get_next_version("video:a.mp4", false).unwrap(), 3);
        assert_eq!(svc.get_next_version("video:a.mp4", false).unwrap(), 4);
    }

    #[test]
    fn monotonic_non_decreasing_across_calls() {
        let (svc, _dir) = service();
        let mut last = 0;
        for i in 0..5 {
            let v = svc.get_next_version("video:a.mp4", i % 2 == 0).unwrap();
            assert!(v >= last);
            last = v;
        }
    }
}
