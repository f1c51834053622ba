//! Module F — KV Chunked Store.
//!
//! Splits large bodies into ≤`STANDARD_CHUNK_SIZE` pieces behind an
//! authoritative manifest, verifying sizes on readback. Grounded on the
//! teacher's `SledCache` (metadata-alongside-data, LRU bookkeeping) but
//! restructured around a manifest-then-chunks write order instead of a
//! single blob per key.

use crate::error::CacheError;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::time::Duration;

/// Implementation-defined, per spec §9's open question.
pub const STANDARD_CHUNK_SIZE: usize = 20 * 1024 * 1024;
/// Below this, a buffered single-put is acceptable; at/above it a
/// streaming write path would be used by a full runtime integration.
pub const STREAMING_THRESHOLD: usize = 40 * 1024 * 1024;
/// Writes larger than this are skipped outright.
pub const SAFETY_CAP: usize = 128 * 1024 * 1024;

const MAX_WRITE_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "totalSize")]
    pub total_size: u64,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "chunkCount")]
    pub chunk_count: usize,
    #[serde(rename = "standardChunkSize")]
    pub standard_chunk_size: usize,
    #[serde(rename = "actualChunkSizes")]
    pub actual_chunk_sizes: Vec<usize>,
    #[serde(rename = "cacheTags")]
    pub cache_tags: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    #[serde(rename = "ttlSeconds")]
    pub ttl_seconds: u64,
    pub version: u32,
    /// Present only when `chunkCount == 1`; the spec's "inline body".
    #[serde(rename = "inlineBody", skip_serializing_if = "Option::is_none")]
    pub inline_body: Option<Vec<u8>>,
}

impl Manifest {
    pub fn is_chunked(&self) -> bool {
        self.chunk_count > 1
    }
}

pub struct KvReadResult {
    pub manifest: Manifest,
    pub body: Bytes,
}

pub struct KvStats {
    pub entry_count: usize,
    pub approx_bytes: u64,
}

/// Why a write was skipped, recorded rather than surfaced as an error
/// (spec §4.F: "write is skipped with a recorded reason").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored { chunk_count: usize },
    SkippedTooLarge { size: usize },
}

pub struct KvChunkedStore {
    db: Db,
}

impl KvChunkedStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = sled::open(path).map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self { db })
    }

    fn chunk_key(key: &str, index: usize) -> String {
        format!("{}_chunk_{}", key, index)
    }

    /// Derive cache tags from the stored path and an optional derivative
    /// name, e.g. `video-path-videos/a.mp4`, `video-path-videos/a.mp4-derivative-mobile`.
    pub fn tags_for(prefix: &str, path: &str, derivative: Option<&str>) -> Vec<String> {
        let mut tags = vec![format!("{}-path-{}", prefix, path)];
        if let Some(d) = derivative {
            tags.push(format!("{}-path-{}-derivative-{}", prefix, path, d));
        }
        tags
    }

    /// Write path (spec §4.F). `created_at` is supplied by the caller
    /// since this module does not call `SystemTime::now()` itself.
    pub async fn write(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        ttl_seconds: u64,
        version: u32,
        cache_tags: Vec<String>,
        created_at: u64,
    ) -> Result<WriteOutcome, CacheError> {
        let total_size = body.len();
        if total_size > SAFETY_CAP {
            tracing::warn!(key, total_size, "write exceeds safety cap, skipping");
            return Ok(WriteOutcome::SkippedTooLarge { size: total_size });
        }

        let chunk_count = total_size.div_ceil(STANDARD_CHUNK_SIZE).max(1);
        let mut actual_chunk_sizes = Vec::with_capacity(chunk_count);
        let mut remaining = total_size;
        for _ in 0..chunk_count {
            let this = remaining.min(STANDARD_CHUNK_SIZE);
            actual_chunk_sizes.push(this);
            remaining -= this;
        }
        debug_assert_eq!(actual_chunk_sizes.iter().sum::<usize>(), total_size);

        let inline_body = if chunk_count == 1 {
            Some(body.to_vec())
        } else {
            let mut offset = 0;
            for (i, &size) in actual_chunk_sizes.iter().enumerate() {
                let chunk = body.slice(offset..offset + size);
                self.write_with_retry(&Self::chunk_key(key, i), &chunk).await?;
                offset += size;
            }
            None
        };

        let manifest = Manifest {
            total_size: total_size as u64,
            content_type: content_type.to_string(),
            chunk_count,
            standard_chunk_size: STANDARD_CHUNK_SIZE,
            actual_chunk_sizes,
            cache_tags,
            created_at,
            ttl_seconds,
            version,
            inline_body,
        };
        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|e| CacheError::ManifestParseError(e.to_string()))?;
        self.write_with_retry(key, &manifest_bytes).await?;

        Ok(WriteOutcome::Stored { chunk_count })
    }

    async fn write_with_retry(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.db.insert(key.as_bytes(), data) {
                Ok(_) => return Ok(()),
                Err(e) if attempt < MAX_WRITE_ATTEMPTS && is_transient(&e) => {
                    let backoff = (BACKOFF_BASE * 2u32.pow(attempt - 1)).min(BACKOFF_CAP);
                    tracing::warn!(key, attempt, ?backoff, "transient KV write error, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(CacheError::Backend(e.to_string())),
            }
        }
    }

    /// Read path (spec §4.F). Returns `Ok(None)` on a manifest miss;
    /// fails the whole read with `ChunkSizeMismatch` if any chunk's
    /// length disagrees with the manifest.
    pub async fn read(&self, key: &str) -> Result<Option<KvReadResult>, CacheError> {
        let Some(raw) = self.db.get(key.as_bytes()).map_err(|e| CacheError::Backend(e.to_string()))? else {
            return Ok(None);
        };
        let manifest: Manifest =
            serde_json::from_slice(&raw).map_err(|e| CacheError::ManifestParseError(e.to_string()))?;

        if manifest.chunk_count <= 1 {
            let body = manifest
                .inline_body
                .clone()
                .map(Bytes::from)
                .unwrap_or_default();
            return Ok(Some(KvReadResult { manifest, body }));
        }

        let mut out = BytesMut::with_capacity(manifest.total_size as usize);
        for i in 0..manifest.chunk_count {
            let chunk_key = Self::chunk_key(key, i);
            let chunk = self
                .db
                .get(chunk_key.as_bytes())
                .map_err(|e| CacheError::Backend(e.to_string()))?
                .ok_or_else(|| CacheError::ManifestParseError(format!("missing chunk {}", i)))?;
            let expected = manifest.actual_chunk_sizes[i];
            if chunk.len() != expected {
                return Err(CacheError::ChunkSizeMismatch {
                    index: i,
                    expected,
                    actual: chunk.len(),
                });
            }
            out.extend_from_slice(&chunk);
        }

        Ok(Some(KvReadResult {
            body: out.freeze(),
            manifest,
        }))
    }

    pub fn stats(&self) -> KvStats {
        let mut entry_count = 0usize;
        let mut approx_bytes = 0u64;
        for item in self.db.iter() {
            let Ok((k, v)) = item else { continue };
            if std::str::from_utf8(&k).map(|s| s.contains("_chunk_")).unwrap_or(false) {
                continue;
            }
            if let Ok(m) = serde_json::from_slice::<Manifest>(&v) {
                entry_count += 1;
                approx_bytes += m.total_size;
            }
        }
        KvStats { entry_count, approx_bytes }
    }
}

fn is_transient(e: &sled::Error) -> bool {
    matches!(e, sled::Error::Io(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (KvChunkedStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (KvChunkedStore::open(dir.path()).unwrap(), dir)
    }

    #[tokio::test]
    async fn small_body_round_trips_inline() {
        let (store, _dir) = store();
        let body = Bytes::from_static(b"hello video");
        store
            .write("video:a.mp4:v1", body.clone(), "video/mp4", 300, 1, vec![], 0)
            .await
            .unwrap();
        let read = store.read("video:a.mp4:v1").await.unwrap().unwrap();
        assert_eq!(read.body, body);
        assert_eq!(read.manifest.chunk_count, 1);
        assert!(!read.manifest.is_chunked());
    }

    #[tokio::test]
    async fn chunked_body_round_trips_and_sizes_sum_correctly() {
        let (store, _dir) = store();
        let size = STANDARD_CHUNK_SIZE + 1024;
        let body = Bytes::from(vec![7u8; size]);
        let outcome = store
            .write("video:big.mp4:v1", body.clone(), "video/mp4", 300, 1, vec![], 0)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Stored { chunk_count: 2 });

        let read = store.read("video:big.mp4:v1").await.unwrap().unwrap();
        assert_eq!(read.body.len(), size);
        assert_eq!(read.body, body);
        assert_eq!(
            read.manifest.actual_chunk_sizes.iter().sum::<usize>() as u64,
            read.manifest.total_size
        );
        assert!(read.manifest.is_chunked());
    }

    #[tokio::test]
    async fn oversized_write_is_skipped_not_errored() {
        let (store, _dir) = store();
        let body = Bytes::from(vec![0u8; SAFETY_CAP + 1]);
        let outcome = store
            .write("video:huge.mp4:v1", body, "video/mp4", 300, 1, vec![], 0)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::SkippedTooLarge { size: SAFETY_CAP + 1 });
        assert!(store.read("video:huge.mp4:v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let (store, _dir) = store();
        assert!(store.read("video:missing:v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunk_size_mismatch_fails_the_read() {
        let (store, _dir) = store();
        let size = STANDARD_CHUNK_SIZE + 1024;
        let body = Bytes::from(vec![1u8; size]);
        store
            .write("video:corrupt.mp4:v1", body, "video/mp4", 300, 1, vec![], 0)
            .await
            .unwrap();

        // Corrupt chunk 1 directly to simulate a truncated write.
        store
            .db
            .insert(
                KvChunkedStore::chunk_key("video:corrupt.mp4:v1", 1).as_bytes(),
                &b"short"[..],
            )
            .unwrap();

        let err = store.read("video:corrupt.mp4:v1").await.unwrap_err();
        assert!(matches!(err, CacheError::ChunkSizeMismatch { index: 1, .. }));
    }
}
