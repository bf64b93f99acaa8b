//! # Wayfarer SW
//!
//! Offline worker for the Wayfarer travel-guide site. Intercepts the page's
//! GET requests and serves each one from a durable cache, the network, or
//! both, depending on its class.
//!
//! ## Architecture
//!
//! ```text
//! handle_fetch(request)
//!     |
//!     +-- Classifier
//!     |       +-- PassThrough (non-GET, non-http)
//!     |       +-- StaticAsset / ExternalResource / Dynamic
//!     |
//!     +-- StrategyExecutor
//!             +-- cache-first ............. precache
//!             +-- network-first ........... runtime cache fallback
//!             +-- stale-while-revalidate .. runtime cache + background fetch
//! ```
//!
//! ## Lifecycle
//!
//! A worker version installs by populating its precache atomically, then
//! activates by sweeping caches from superseded versions and claiming open
//! clients. Fetch handling is live only after activation completes.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use url::Url;
use wayfarer_net::{Fetcher, NetError, Request, Response};
use wayfarer_store::{now_ms, CacheStorage, StoreError};

pub mod classify;
pub mod message;
pub mod strategy;

pub use classify::{Classifier, FetchDecision, RequestClass};
pub use message::WorkerMessage;
pub use strategy::StrategyExecutor;

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A precache manifest URL could not be fetched; the whole install is
    /// rejected and this version never becomes active.
    #[error("Install failed for {url}: {source}")]
    InstallFailed {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Worker is not active")]
    NotActive,

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ==================== Types ====================

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Initial state.
    #[default]
    Parsed,
    /// Precache being populated.
    Installing,
    /// Precache populated, ready to take over immediately.
    Installed,
    /// Sweeping superseded caches and claiming clients.
    Activating,
    /// Handling fetches.
    Activated,
    /// Install failed; this version is dead.
    Redundant,
}

/// Result of dispatching one intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Send to the network untouched; the worker takes no part.
    PassThrough,
    /// Response produced by a strategy.
    Response(Response),
}

// ==================== Configuration ====================

/// Worker configuration. Cache names, the precache manifest, and the
/// external-origin allow-list are all constructor inputs; nothing lives in
/// module globals, so several versions can coexist in tests.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Deployed site version, e.g. "1.1.0". Bakes into the cache names.
    pub version: String,

    /// Cache name prefix.
    pub cache_prefix: String,

    /// Origin that relative manifest entries resolve against.
    pub scope: Url,

    /// App-shell URLs precached atomically at install.
    pub precache_manifest: Vec<String>,

    /// URL prefixes eligible for stale-while-revalidate.
    pub external_origins: Vec<String>,

    /// Retention window for runtime-cache entries.
    pub runtime_max_age: Duration,
}

impl WorkerConfig {
    /// Create a configuration for a deployed version.
    pub fn new(version: &str, scope: Url) -> Self {
        Self {
            version: version.to_string(),
            cache_prefix: "wayfarer".to_string(),
            scope,
            precache_manifest: Vec::new(),
            external_origins: Vec::new(),
            runtime_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Set the precache manifest.
    pub fn with_precache<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache_manifest = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the external-origin allow-list.
    pub fn with_external_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Set the runtime-cache retention window.
    pub fn with_runtime_max_age(mut self, max_age: Duration) -> Self {
        self.runtime_max_age = max_age;
        self
    }

    /// Name of the current precache.
    pub fn precache_name(&self) -> String {
        format!("{}-precache-v{}", self.cache_prefix, self.version)
    }

    /// Name of the current runtime cache.
    pub fn runtime_name(&self) -> String {
        format!("{}-runtime-v{}", self.cache_prefix, self.version)
    }

    /// Resolve a manifest entry against the worker scope.
    fn resolve(&self, entry: &str) -> Result<Url, NetError> {
        self.scope
            .join(entry)
            .map_err(|e| NetError::InvalidUrl(format!("{entry}: {e}")))
    }
}

// ==================== Clients ====================

/// A page controlled by (or eligible to be controlled by) the worker.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Page URL.
    pub url: Url,

    /// Whether this worker controls the page.
    pub controlled: bool,
}

/// Registry of open pages.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create a new registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page.
    pub fn add(&mut self, id: &str, url: Url) {
        self.clients.insert(
            id.to_string(),
            Client {
                id: id.to_string(),
                url,
                controlled: false,
            },
        );
    }

    /// Remove a page.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Take control of every registered page so the new version handles
    /// requests without a reload. Returns how many were claimed.
    pub fn claim(&mut self) -> usize {
        for client in self.clients.values_mut() {
            client.controlled = true;
        }
        self.clients.len()
    }

    /// Number of controlled pages.
    pub fn controlled_count(&self) -> usize {
        self.clients.values().filter(|c| c.controlled).count()
    }

    /// Number of registered pages.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Worker ====================

/// One deployed version of the offline worker.
pub struct OfflineWorker {
    config: WorkerConfig,
    classifier: Classifier,
    executor: StrategyExecutor,
    caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<WorkerState>,
    clients: RwLock<Clients>,
}

impl OfflineWorker {
    /// Create a worker for a deployed version.
    pub fn new(config: WorkerConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let caches = Arc::new(RwLock::new(CacheStorage::new()));
        let classifier = Classifier::new(config.external_origins.clone());
        let executor = StrategyExecutor::new(
            Arc::clone(&caches),
            Arc::clone(&fetcher),
            config.precache_name(),
            config.runtime_name(),
        );

        Self {
            config,
            classifier,
            executor,
            caches,
            fetcher,
            state: RwLock::new(WorkerState::Parsed),
            clients: RwLock::new(Clients::new()),
        }
    }

    /// Worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Shared cache storage handle.
    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Populate the precache with every manifest URL, all-or-nothing. On
    /// success the worker is immediately ready to supersede a previous
    /// version; on any single failure the precache is left untouched and
    /// this version becomes redundant.
    pub async fn install(&self) -> Result<(), WorkerError> {
        self.set_state(WorkerState::Installing).await;
        info!(
            version = %self.config.version,
            urls = self.config.precache_manifest.len(),
            "Installing"
        );

        // Stage every response before touching the precache so a failure
        // leaves no partial state behind.
        let mut staged = Vec::with_capacity(self.config.precache_manifest.len());
        for entry in &self.config.precache_manifest {
            let url = match self.config.resolve(entry) {
                Ok(url) => url,
                Err(err) => return self.fail_install(entry, err).await,
            };

            match self.fetcher.fetch(&Request::get(url)).await {
                Ok(response) if response.ok() => staged.push(response),
                Ok(response) => {
                    let err = NetError::RequestFailed(format!("status {}", response.status));
                    return self.fail_install(entry, err).await;
                }
                Err(err) => return self.fail_install(entry, err).await,
            }
        }

        let precache_name = self.config.precache_name();
        {
            let mut caches = self.caches.write().await;
            let precache = caches.open(&precache_name);
            for response in &staged {
                precache.put(response);
            }
        }

        info!(cache = %precache_name, entries = staged.len(), "Precache populated");
        // Equivalent of skipWaiting(): no waiting for open pages to close.
        self.set_state(WorkerState::Installed).await;
        Ok(())
    }

    async fn fail_install(&self, url: &str, source: NetError) -> Result<(), WorkerError> {
        warn!(url = %url, error = %source, "Install aborted");
        self.set_state(WorkerState::Redundant).await;
        Err(WorkerError::InstallFailed {
            url: url.to_string(),
            source,
        })
    }

    /// Make this version authoritative: delete every cache from superseded
    /// versions, prune expired runtime entries, and claim open clients.
    /// Fetch handling is live only once this completes.
    pub async fn activate(&self) -> Result<(), WorkerError> {
        self.set_state(WorkerState::Activating).await;

        let keep = [self.config.precache_name(), self.config.runtime_name()];
        {
            let mut caches = self.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| !keep.iter().any(|k| k == name))
                .map(String::from)
                .collect();
            for name in stale {
                caches.delete(&name);
                info!(cache = %name, "Deleted superseded cache");
            }

            let removed = caches
                .open(&self.config.runtime_name())
                .prune(self.config.runtime_max_age, now_ms());
            if removed > 0 {
                debug!(removed, "Pruned expired runtime entries");
            }
        }

        let claimed = self.clients.write().await.claim();
        debug!(claimed, "Claimed clients");

        self.set_state(WorkerState::Activated).await;
        info!(version = %self.config.version, "Activated");
        Ok(())
    }

    /// Resolve one intercepted request. The sole steady-state entry point.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
        if self.state().await != WorkerState::Activated {
            return Err(WorkerError::NotActive);
        }

        match self.classifier.decide(request) {
            FetchDecision::PassThrough => {
                trace!(url = %request.url, "Passing request through");
                Ok(FetchOutcome::PassThrough)
            }
            FetchDecision::Handle(class) => {
                trace!(url = %request.url, class = ?class, "Dispatching to strategy");
                let response = self.executor.resolve(class, request).await?;
                Ok(FetchOutcome::Response(response))
            }
        }
    }

    /// Handle a control message from a page. Unrecognized payloads are
    /// ignored.
    pub async fn on_message(&self, payload: &serde_json::Value) -> Result<(), WorkerError> {
        match WorkerMessage::from_json(payload) {
            None => {
                trace!("Ignoring unrecognized message");
                Ok(())
            }
            Some(WorkerMessage::SkipWaiting) => {
                if self.state().await == WorkerState::Installed {
                    self.activate().await
                } else {
                    Ok(())
                }
            }
            Some(WorkerMessage::CacheUrls { urls }) => {
                self.cache_urls(&urls).await;
                Ok(())
            }
        }
    }

    /// Add URLs to the runtime cache on demand. Best-effort: failing URLs
    /// are skipped, never surfaced to the sender.
    async fn cache_urls(&self, urls: &[String]) {
        let runtime_name = self.config.runtime_name();
        let mut stored = 0;
        for entry in urls {
            let url = match self.config.resolve(entry) {
                Ok(url) => url,
                Err(err) => {
                    warn!(url = %entry, error = %err, "Skipping unresolvable URL");
                    continue;
                }
            };

            match self.fetcher.fetch(&Request::get(url)).await {
                Ok(response) if response.ok() => {
                    self.caches.write().await.open(&runtime_name).put(&response);
                    stored += 1;
                }
                Ok(response) => {
                    warn!(url = %entry, status = %response.status, "Skipping non-success response");
                }
                Err(err) => {
                    warn!(url = %entry, error = %err, "Fetch failed, skipping");
                }
            }
        }
        debug!(stored, requested = urls.len(), "Cached URLs on demand");
    }

    /// Register an open page.
    pub async fn add_client(&self, id: &str, url: Url) {
        self.clients.write().await.add(id, url);
    }

    /// Remove a page.
    pub async fn remove_client(&self, id: &str) {
        self.clients.write().await.remove(id);
    }

    /// Number of pages this worker controls.
    pub async fn controlled_clients(&self) -> usize {
        self.clients.read().await.controlled_count()
    }

    async fn set_state(&self, state: WorkerState) {
        let mut current = self.state.write().await;
        trace!(from = ?*current, to = ?state, "State change");
        *current = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("https://guide.example.com/").unwrap()
    }

    #[test]
    fn test_config_cache_names() {
        let config = WorkerConfig::new("1.1.0", scope());
        assert_eq!(config.precache_name(), "wayfarer-precache-v1.1.0");
        assert_eq!(config.runtime_name(), "wayfarer-runtime-v1.1.0");
    }

    #[test]
    fn test_config_resolve() {
        let config = WorkerConfig::new("1.1.0", scope());
        let url = config.resolve("/css/main.css").unwrap();
        assert_eq!(url.as_str(), "https://guide.example.com/css/main.css");

        let absolute = config.resolve("https://fonts.example.com/inter.css").unwrap();
        assert_eq!(absolute.as_str(), "https://fonts.example.com/inter.css");
    }

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::new("1.0.0", scope());
        assert_eq!(config.runtime_max_age, Duration::from_secs(7 * 24 * 60 * 60));
        assert!(config.precache_manifest.is_empty());
    }

    #[test]
    fn test_clients_claim() {
        let mut clients = Clients::new();
        clients.add("tab-1", scope());
        clients.add("tab-2", scope().join("/budget.html").unwrap());

        assert_eq!(clients.controlled_count(), 0);
        assert_eq!(clients.claim(), 2);
        assert_eq!(clients.controlled_count(), 2);

        clients.remove("tab-1");
        assert_eq!(clients.controlled_count(), 1);
    }

    #[test]
    fn test_worker_state_default() {
        assert_eq!(WorkerState::default(), WorkerState::Parsed);
    }
}
