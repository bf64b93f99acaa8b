//! Strategy executors: cache-first, network-first, stale-while-revalidate.
//!
//! Each strategy resolves one request to one response. A cache lookup never
//! fails a request by itself; an empty cache is a normal state. A strategy
//! only errors when no response can be produced by any means.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use wayfarer_net::{Fetcher, Request, Response};
use wayfarer_store::{CacheEntry, CacheStorage};

use crate::classify::RequestClass;
use crate::WorkerError;

/// Resolves classified requests against the caches and the network.
pub struct StrategyExecutor {
    caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    precache_name: String,
    runtime_name: String,
}

impl StrategyExecutor {
    /// Create an executor bound to the current cache names.
    pub fn new(
        caches: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
        precache_name: String,
        runtime_name: String,
    ) -> Self {
        Self {
            caches,
            fetcher,
            precache_name,
            runtime_name,
        }
    }

    /// Resolve a request with the strategy for its class.
    pub async fn resolve(
        &self,
        class: RequestClass,
        request: &Request,
    ) -> Result<Response, WorkerError> {
        match class {
            RequestClass::StaticAsset => self.cache_first(request).await,
            RequestClass::Dynamic => self.network_first(request).await,
            RequestClass::ExternalResource => self.stale_while_revalidate(request).await,
        }
    }

    /// A precache hit is returned without touching the network; static
    /// assets are immutable per deployed version, so no freshness check. On
    /// a miss the network response is stored for next time. Network failure
    /// is final for this class.
    async fn cache_first(&self, request: &Request) -> Result<Response, WorkerError> {
        if let Some(entry) = self.lookup(&self.precache_name, request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(entry.to_response()?);
        }

        let response = self.fetcher.fetch(request).await?;
        self.store(&self.precache_name, &response).await;
        Ok(response)
    }

    /// Network wins when reachable; the runtime cache is the fallback.
    /// Non-2xx responses are returned uncached. Only a transport failure
    /// triggers the fallback, and a fallback miss propagates the original
    /// error.
    async fn network_first(&self, request: &Request) -> Result<Response, WorkerError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store(&self.runtime_name, &response).await;
                Ok(response)
            }
            Err(err) => {
                debug!(url = %request.url, error = %err, "Network failed, trying cache");
                match self.lookup(&self.runtime_name, request).await {
                    Some(entry) => Ok(entry.to_response()?),
                    None => Err(err.into()),
                }
            }
        }
    }

    /// A cached copy is returned immediately while a background fetch
    /// refreshes the cache for future requests. Only a cold cache waits for
    /// the network.
    async fn stale_while_revalidate(&self, request: &Request) -> Result<Response, WorkerError> {
        if let Some(entry) = self.lookup(&self.runtime_name, request).await {
            self.spawn_revalidate(request.clone());
            return Ok(entry.to_response()?);
        }

        let response = self.fetcher.fetch(request).await?;
        self.store(&self.runtime_name, &response).await;
        Ok(response)
    }

    async fn lookup(&self, cache_name: &str, request: &Request) -> Option<CacheEntry> {
        let mut caches = self.caches.write().await;
        caches.open(cache_name).lookup(request.url.as_str())
    }

    async fn store(&self, cache_name: &str, response: &Response) {
        let mut caches = self.caches.write().await;
        caches.open(cache_name).put(response);
    }

    /// Refresh a runtime entry in the background. The foreground return
    /// never waits on this write, and failures are logged and swallowed.
    fn spawn_revalidate(&self, request: Request) {
        let caches = Arc::clone(&self.caches);
        let fetcher = Arc::clone(&self.fetcher);
        let runtime_name = self.runtime_name.clone();

        tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if response.ok() => {
                    caches.write().await.open(&runtime_name).put(&response);
                    trace!(url = %request.url, "Revalidated cache entry");
                }
                Ok(response) => {
                    warn!(url = %request.url, status = %response.status,
                        "Background fetch returned non-success");
                }
                Err(err) => {
                    warn!(url = %request.url, error = %err, "Background fetch failed");
                }
            }
        });
    }
}
