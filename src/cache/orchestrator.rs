//! Module G — Cache Orchestrator.
//!
//! The public entry point for a cacheable request: bypass policy,
//! read-through KV lookup, coalesced origin fetch on miss, and
//! deferred (fire-and-forget) write-back.

use crate::cache::coalesce::{Coalescer, OriginResponse};
use crate::cache::kv::KvChunkedStore;
use crate::cache::version::VersionService;
use crate::error::GatewayError;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

pub struct CacheOutcome {
    pub status: CacheStatus,
    pub version: u32,
    pub response: OriginResponse,
    /// Whether this caller was the one that actually ran the origin
    /// fetch, as opposed to joining an in-flight request someone else
    /// started (spec S3). `None` when no coalescing took place (a KV
    /// hit or a bypass never reach the coalescer).
    pub is_first_request: Option<bool>,
}

pub struct CacheOrchestrator {
    kv: Arc<KvChunkedStore>,
    coalescer: Arc<Coalescer>,
    version_service: Arc<VersionService>,
}

impl CacheOrchestrator {
    pub fn new(kv: Arc<KvChunkedStore>, coalescer: Arc<Coalescer>, version_service: Arc<VersionService>) -> Self {
        Self { kv, coalescer, version_service }
    }

    pub fn coalescer_len(&self) -> usize {
        self.coalescer.in_flight_count()
    }

    pub fn kv_stats(&self) -> crate::cache::kv::KvStats {
        self.kv.stats()
    }

    pub fn kv_store(&self) -> Arc<KvChunkedStore> {
        self.kv.clone()
    }

    pub fn version_service(&self) -> Arc<VersionService> {
        self.version_service.clone()
    }

    /// `withCaching` (spec §4.G). `handler` is invoked at most once per
    /// concurrent burst of identical misses (via the coalescer).
    #[allow(clippy::too_many_arguments)]
    pub async fn with_caching<F, Fut>(
        &self,
        key: &str,
        method: &str,
        query: &BTreeMap<String, String>,
        bypass_query_keys: &[String],
        ttl_seconds: u64,
        cache_tags: Vec<String>,
        initiator_id: &str,
        is_range_request: bool,
        created_at: u64,
        handler: F,
    ) -> Result<CacheOutcome, GatewayError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<OriginResponse, GatewayError>> + Send + 'static,
    {
        if method != "GET" || bypass_query_keys.iter().any(|k| query.contains_key(k)) {
            let response = handler().await?;
            return Ok(CacheOutcome { status: CacheStatus::Bypass, version: 1, response, is_first_request: None });
        }

        match self.kv.read(key).await {
            Ok(Some(hit)) => {
                let response = OriginResponse {
                    status: 200,
                    content_type: hit.manifest.content_type.clone(),
                    headers: vec![],
                    body: hit.body,
                };
                return Ok(CacheOutcome {
                    status: CacheStatus::Hit,
                    version: hit.manifest.version,
                    response,
                    is_first_request: None,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, key, "cache read error, falling through to origin");
            }
        }

        let (origin_response, is_first) = self
            .coalescer
            .execute_with_coalescing(key, initiator_id, is_range_request, handler())
            .await?;

        let version = self
            .version_service
            .get_next_version(key, false)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, key, "version service error, defaulting to v1");
                1
            });

        let kv = self.kv.clone();
        let key_owned = key.to_string();
        let body = origin_response.body.clone();
        let content_type = origin_response.content_type.clone();
        tokio::spawn(async move {
            if let Err(e) = kv
                .write(&key_owned, body, &content_type, ttl_seconds, version, cache_tags, created_at)
                .await
            {
                tracing::warn!(error = %e, key = %key_owned, "deferred KV persistence failed");
            }
        });

        Ok(CacheOutcome {
            status: CacheStatus::Miss,
            version,
            response: (*origin_response).clone(),
            is_first_request: Some(is_first),
        })
    }
}
