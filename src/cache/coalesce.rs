//! Module E — Request Coalescer.
//!
//! Single-flight deduplication of concurrent origin fetches sharing a
//! cache key. Grounded on the teacher's `dashmap`-free design generalized
//! with `dashmap` (already a pack dependency elsewhere) for the
//! concurrent in-flight map and `futures::future::Shared` for the joined
//! future, the idiomatic Rust analogue of a promise cache.

use crate::error::GatewayError;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const MAX_IN_FLIGHT: usize = 1000;
pub const IN_FLIGHT_TTL: Duration = Duration::from_secs(5 * 60);
pub const MAX_CONCURRENT_FETCHES: usize = 100;

/// A fully-buffered origin response, cheap to clone (refcounted body)
/// so every joiner can own a copy of the single shared result.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<OriginResponse>, GatewayError>>>;

struct InFlightEntry {
    shared: SharedFetch,
    start_time: Instant,
    request_key: String,
    reference_count: AtomicUsize,
    initiator_id: String,
    is_range_request: bool,
}

/// Process-wide in-flight map, bounded LRU with per-entry TTL (spec §4.E).
pub struct Coalescer {
    entries: DashMap<String, Arc<InFlightEntry>>,
    concurrency: Arc<Semaphore>,
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl Coalescer {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            concurrency: Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES)),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries.len()
    }

    /// Run `origin_fetch` at most once for `key` among all concurrent
    /// callers; returns the shared result and whether this caller was
    /// the initiator (spec S3's `isFirstRequest`).
    pub async fn execute_with_coalescing<F>(
        &self,
        key: &str,
        initiator_id: &str,
        is_range_request: bool,
        origin_fetch: F,
    ) -> Result<(Arc<OriginResponse>, bool), GatewayError>
    where
        F: Future<Output = Result<OriginResponse, GatewayError>> + Send + 'static,
    {
        self.sweep_expired();

        if let Some(entry) = self.entries.get(key) {
            let entry = entry.value().clone();
            entry.reference_count.fetch_add(1, Ordering::SeqCst);
            let _guard = JoinGuard {
                entries: &self.entries,
                key: key.to_string(),
                entry: entry.clone(),
            };
            let result = entry.shared.clone().await;
            return result.map(|r| (r, false));
        }

        if self.entries.len() >= MAX_IN_FLIGHT {
            return Err(GatewayError::Network(
                "in-flight map at capacity; request rejected".to_string(),
            ));
        }

        let permit = self.concurrency.clone().try_acquire_owned().map_err(|_| {
            GatewayError::Network("concurrent origin fetch limit exceeded".to_string())
        })?;

        let boxed: BoxFuture<'static, Result<Arc<OriginResponse>, GatewayError>> = async move {
            let _permit = permit;
            origin_fetch.await.map(Arc::new)
        }
        .boxed();
        let shared = boxed.shared();

        let entry = Arc::new(InFlightEntry {
            shared: shared.clone(),
            start_time: Instant::now(),
            request_key: key.to_string(),
            reference_count: AtomicUsize::new(1),
            initiator_id: initiator_id.to_string(),
            is_range_request,
        });
        self.entries.insert(key.to_string(), entry.clone());

        let _guard = JoinGuard {
            entries: &self.entries,
            key: key.to_string(),
            entry: entry.clone(),
        };
        let result = shared.await;
        result.map(|r| (r, entry.initiator_id == initiator_id))
    }

    /// Remove entries past their TTL. A still-referenced expiring entry
    /// is a bug indicator and MUST be logged (spec §4.E, §5).
    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now.duration_since(e.value().start_time) > IN_FLIGHT_TTL)
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            if let Some((_, entry)) = self.entries.remove(&key) {
                let refs = entry.reference_count.load(Ordering::SeqCst);
                if refs > 0 {
                    tracing::warn!(
                        cache_key = %entry.request_key,
                        reference_count = refs,
                        "evicting in-flight entry past TTL while still referenced"
                    );
                }
            }
        }
    }
}

/// Decrements the entry's reference count on drop and removes it from
/// the map once it reaches zero, per the coalescer's join/leave contract.
struct JoinGuard<'a> {
    entries: &'a DashMap<String, Arc<InFlightEntry>>,
    key: String,
    entry: Arc<InFlightEntry>,
}

impl Drop for JoinGuard<'_> {
    fn drop(&mut self) {
        let prev = self.entry.reference_count.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.entries.remove_if(&self.key, |_, v| Arc::ptr_eq(v, &self.entry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn resp(body: &str) -> OriginResponse {
        OriginResponse {
            status: 200,
            content_type: "video/mp4".to_string(),
            headers: vec![],
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn single_flight_handler_runs_once() {
        let coalescer = Arc::new(Coalescer::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..3 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .execute_with_coalescing(
                        "video:a.mp4:v1",
                        &format!("caller-{i}"),
                        false,
                        {
                            let calls = calls.clone();
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                Ok(resp("payload"))
                            }
                        },
                    )
                    .await
            }));
        }

        let mut bodies = Vec::new();
        for h in handles {
            let (r, _first) = h.await.unwrap().unwrap();
            bodies.push(r.body.clone());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(bodies.iter().all(|b| b == &Bytes::from("payload")));
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn error_propagates_to_all_joiners() {
        let coalescer = Arc::new(Coalescer::new());
        let mut handles = Vec::new();
        for i in 0..3 {
            let coalescer = coalescer.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .execute_with_coalescing("k", &format!("c{i}"), false, async {
                        Err(GatewayError::Network("boom".to_string()))
                    })
                    .await
            }));
        }
        for h in handles {
            let result = h.await.unwrap();
            assert!(matches!(result, Err(GatewayError::Network(ref m)) if m == "boom"));
        }
    }
}
