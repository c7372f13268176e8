//! The offline cache: install, activate and per-request routing.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::try_join_all;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OfflineConfig;

use super::fetcher::{AssetRequest, AssetResponse, FetchError, Fetcher};
use super::route::{RoutePolicy, RouteRules};
use super::storage::{CacheStorage, CachedAsset};

#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("Install failed fetching {url}: {source}")]
    InstallFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Install failed: {url} returned status {status}")]
    InstallStatus { url: String, status: u16 },

    #[error("Invalid URL {0}: {1}")]
    InvalidUrl(String, url::ParseError),

    #[error("Cannot {action} while the worker is {state:?}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },

    #[error("Cache storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Lifecycle of one cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting for activation
    Installed,
    Activating,
    Activated,
    /// Install failed; this version never takes over
    Redundant,
}

/// What route decided for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Not intercepted. The caller talks to the network itself.
    Bypass,
    Response(AssetResponse),
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
    skip_waiting: bool,
    controls_clients: bool,
}

pub struct OfflineCache<S, F> {
    version: String,
    origin: Url,
    assets: Vec<String>,
    rules: RouteRules,
    storage: Arc<S>,
    fetcher: Arc<F>,
    lifecycle: Mutex<Lifecycle>,
    revalidations: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage, F: Fetcher> OfflineCache<S, F> {
    pub fn new(config: &OfflineConfig, storage: S, fetcher: F) -> Result<Self, OfflineError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| OfflineError::InvalidUrl(config.origin.clone(), e))?;

        Ok(Self {
            version: config.version.clone(),
            origin,
            assets: config.assets.clone(),
            rules: config.rules.clone(),
            storage: Arc::new(storage),
            fetcher: Arc::new(fetcher),
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Parsed,
                skip_waiting: false,
                controls_clients: false,
            }),
            revalidations: Mutex::new(JoinSet::new()),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle().state
    }

    /// True once activation claimed the already-open clients.
    pub fn controls_clients(&self) -> bool {
        self.lifecycle().controls_clients
    }

    /// Ask to activate as soon as install finishes instead of waiting for
    /// the previous version's clients to go away.
    pub fn skip_waiting(&self) {
        self.lifecycle().skip_waiting = true;
    }

    /// Installed, and nothing holds activation back.
    pub fn wants_activation(&self) -> bool {
        let lifecycle = self.lifecycle();
        lifecycle.state == WorkerState::Installed && lifecycle.skip_waiting
    }

    /// Pick up a generation installed by an earlier run. The generation only
    /// counts as installed when it holds every precached asset; anything less
    /// is the remains of an interrupted install and is deleted. A complete
    /// generation moves the cache straight to `Installed`, waiting for
    /// activation. Returns true if a complete generation was found.
    pub fn resume(&self) -> Result<bool, OfflineError> {
        if !self.storage.generations()?.iter().any(|g| g == &self.version) {
            return Ok(false);
        }

        let stored = self.storage.keys(&self.version)?;
        let complete = self
            .asset_requests()?
            .iter()
            .all(|request| stored.contains(&request.cache_key()));
        if !complete {
            warn!(version = %self.version, "Discarding incomplete cache generation");
            self.storage.delete(&self.version)?;
            return Ok(false);
        }

        let mut lifecycle = self.lifecycle();
        if lifecycle.state == WorkerState::Parsed {
            lifecycle.state = WorkerState::Installed;
            debug!(version = %self.version, "Found installed cache generation");
        }
        Ok(true)
    }

    /// Populate the current generation with every precached asset.
    ///
    /// All assets are fetched before anything is written; one failure aborts
    /// the install and leaves the previous generation untouched.
    pub async fn install(&self) -> Result<(), OfflineError> {
        self.transition(
            &[WorkerState::Parsed, WorkerState::Redundant],
            WorkerState::Installing,
            "install",
        )?;

        match self.populate().await {
            Ok(count) => {
                let mut lifecycle = self.lifecycle();
                lifecycle.state = WorkerState::Installed;
                lifecycle.skip_waiting = true;
                info!(version = %self.version, assets = count, "Cached static assets");
                Ok(())
            }
            Err(e) => {
                self.lifecycle().state = WorkerState::Redundant;
                warn!(version = %self.version, error = %e, "Install aborted");
                Err(e)
            }
        }
    }

    fn asset_requests(&self) -> Result<Vec<AssetRequest>, OfflineError> {
        self.assets
            .iter()
            .map(|path| {
                self.origin
                    .join(path)
                    .map(AssetRequest::get)
                    .map_err(|e| OfflineError::InvalidUrl(path.clone(), e))
            })
            .collect()
    }

    async fn populate(&self) -> Result<usize, OfflineError> {
        let requests = self.asset_requests()?;
        let created = self.storage.open(&self.version)?;

        let fetched = try_join_all(requests.iter().map(|request| async move {
            let url = request.url.to_string();
            let response = self
                .fetcher
                .fetch(request)
                .await
                .map_err(|source| OfflineError::InstallFetch {
                    url: url.clone(),
                    source,
                })?;
            if !response.is_success() {
                return Err(OfflineError::InstallStatus {
                    url,
                    status: response.status,
                });
            }
            Ok(CachedAsset::from_response(request.cache_key(), &response))
        }))
        .await;

        let written = fetched.and_then(|assets| {
            let count = assets.len();
            for asset in assets {
                self.storage.put(&self.version, asset)?;
            }
            Ok(count)
        });

        if written.is_err() && created {
            self.storage.delete(&self.version)?;
        }
        written
    }

    /// Delete every generation except the current one and take control of
    /// open clients. Returns the names that were deleted.
    pub async fn activate(&self) -> Result<Vec<String>, OfflineError> {
        self.transition(&[WorkerState::Installed], WorkerState::Activating, "activate")?;

        let evicted = match self.evict_old_generations() {
            Ok(evicted) => evicted,
            Err(e) => {
                self.lifecycle().state = WorkerState::Installed;
                return Err(e);
            }
        };

        let mut lifecycle = self.lifecycle();
        lifecycle.state = WorkerState::Activated;
        lifecycle.controls_clients = true;
        Ok(evicted)
    }

    fn evict_old_generations(&self) -> Result<Vec<String>, OfflineError> {
        let mut evicted = Vec::new();
        for name in self.storage.generations()? {
            if name != self.version && self.storage.delete(&name)? {
                info!(generation = %name, "Removed old cache");
                evicted.push(name);
            }
        }
        Ok(evicted)
    }

    /// Answer one request according to its route policy.
    pub async fn route(&self, request: &AssetRequest) -> Result<Routed, FetchError> {
        if self.state() != WorkerState::Activated {
            return Ok(Routed::Bypass);
        }

        let policy = match self.rules.classify(&request.url) {
            RoutePolicy::Bypass => RoutePolicy::Bypass,
            // Only idempotent reads are cacheable
            _ if request.method != reqwest::Method::GET => RoutePolicy::NetworkOnly,
            policy => policy,
        };
        debug!(url = %request.url, ?policy, "Routing request");

        match policy {
            RoutePolicy::Bypass => Ok(Routed::Bypass),
            RoutePolicy::NetworkOnly => self.fetcher.fetch(request).await.map(Routed::Response),
            RoutePolicy::CacheFirst => self.cache_first(request).await,
            RoutePolicy::NetworkFirst => self.network_first(request).await,
        }
    }

    async fn cache_first(&self, request: &AssetRequest) -> Result<Routed, FetchError> {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(&key) {
            self.spawn_revalidation(request.clone());
            return Ok(Routed::Response(cached.into_response()));
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_success() {
            self.store(&key, &response);
        }
        Ok(Routed::Response(response))
    }

    async fn network_first(&self, request: &AssetRequest) -> Result<Routed, FetchError> {
        let key = request.cache_key();
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(&key, &response);
                }
                Ok(Routed::Response(response))
            }
            Err(e) => match self.lookup(&key) {
                Some(cached) => {
                    debug!(url = %request.url, error = %e, "Network failed, serving cached copy");
                    Ok(Routed::Response(cached.into_response()))
                }
                None => Err(e),
            },
        }
    }

    /// Refresh a cached entry in the background. The result is only visible
    /// to later requests.
    fn spawn_revalidation(&self, request: AssetRequest) {
        let storage = Arc::clone(&self.storage);
        let fetcher = Arc::clone(&self.fetcher);
        let generation = self.version.clone();

        let mut tasks = self
            .revalidations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    let asset = CachedAsset::from_response(request.cache_key(), &response);
                    if let Err(e) = storage.put(&generation, asset) {
                        warn!(url = %request.url, error = %e, "Failed to store revalidated asset");
                    }
                }
                Ok(response) => {
                    debug!(url = %request.url, status = response.status, "Revalidation skipped");
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Revalidation failed");
                }
            }
        });
    }

    /// Wait for every background revalidation started so far.
    pub async fn settle(&self) {
        let mut tasks = std::mem::take(
            &mut *self
                .revalidations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Revalidation task panicked");
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<CachedAsset> {
        match self.storage.get(&self.version, key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    fn store(&self, key: &str, response: &AssetResponse) {
        if let Err(e) = self
            .storage
            .put(&self.version, CachedAsset::from_response(key, response))
        {
            warn!(key, error = %e, "Failed to cache response");
        }
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        from: &[WorkerState],
        to: WorkerState,
        action: &'static str,
    ) -> Result<(), OfflineError> {
        let mut lifecycle = self.lifecycle();
        if !from.contains(&lifecycle.state) {
            return Err(OfflineError::InvalidState {
                action,
                state: lifecycle.state,
            });
        }
        lifecycle.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::offline::fetcher::ResponseSource;
    use crate::offline::storage::MemoryStorage;
    use crate::offline::testing::ScriptedFetcher;

    const ORIGIN: &str = "https://radio.example";

    fn config(version: &str) -> OfflineConfig {
        OfflineConfig {
            version: version.to_string(),
            origin: ORIGIN.to_string(),
            assets: vec!["/".to_string(), "/styles.css".to_string()],
            rules: RouteRules::default(),
        }
    }

    fn serving_bundle() -> ScriptedFetcher {
        let fetcher = ScriptedFetcher::new();
        fetcher.serve("https://radio.example/", 200, "<html>v1</html>");
        fetcher.serve("https://radio.example/styles.css", 200, "body{}");
        fetcher
    }

    fn store_asset(storage: &MemoryStorage, generation: &str, url: &str, body: &str) {
        let response = AssetResponse::network(200, None, body.as_bytes().to_vec());
        storage
            .put(generation, CachedAsset::from_response(url, &response))
            .unwrap();
    }

    /// Memory storage whose writes start failing after `allowed` puts.
    struct FailingPuts {
        inner: MemoryStorage,
        allowed: AtomicUsize,
    }

    impl CacheStorage for FailingPuts {
        fn open(&self, generation: &str) -> anyhow::Result<bool> {
            self.inner.open(generation)
        }

        fn generations(&self) -> anyhow::Result<Vec<String>> {
            self.inner.generations()
        }

        fn delete(&self, generation: &str) -> anyhow::Result<bool> {
            self.inner.delete(generation)
        }

        fn get(&self, generation: &str, key: &str) -> anyhow::Result<Option<CachedAsset>> {
            self.inner.get(generation, key)
        }

        fn put(&self, generation: &str, asset: CachedAsset) -> anyhow::Result<()> {
            let left = self.allowed.load(Ordering::SeqCst);
            if left == 0 {
                anyhow::bail!("disk full");
            }
            self.allowed.store(left - 1, Ordering::SeqCst);
            self.inner.put(generation, asset)
        }

        fn keys(&self, generation: &str) -> anyhow::Result<Vec<String>> {
            self.inner.keys(generation)
        }
    }

    fn get(url: &str) -> AssetRequest {
        AssetRequest::get(Url::parse(url).unwrap())
    }

    async fn active_cache(version: &str) -> OfflineCache<MemoryStorage, ScriptedFetcher> {
        let cache = OfflineCache::new(&config(version), MemoryStorage::new(), serving_bundle()).unwrap();
        cache.install().await.unwrap();
        cache.activate().await.unwrap();
        cache
    }

    fn body(routed: Routed) -> (Vec<u8>, ResponseSource) {
        match routed {
            Routed::Response(r) => (r.body, r.source),
            Routed::Bypass => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_install_caches_every_asset() {
        let cache = OfflineCache::new(&config("v6"), MemoryStorage::new(), serving_bundle()).unwrap();
        cache.install().await.unwrap();

        assert_eq!(cache.state(), WorkerState::Installed);
        assert!(cache.wants_activation());
        assert_eq!(
            cache.storage().keys("v6").unwrap(),
            vec!["https://radio.example/", "https://radio.example/styles.css"]
        );
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let fetcher = serving_bundle();
        fetcher.drop_route("https://radio.example/styles.css");
        let storage = MemoryStorage::new();
        storage.open("v6").unwrap();
        storage
            .put("v6", CachedAsset::from_response("https://radio.example/", &AssetResponse::network(200, None, b"old".to_vec())))
            .unwrap();

        let cache = OfflineCache::new(&config("v7"), storage, fetcher).unwrap();
        let err = cache.install().await.unwrap_err();

        assert!(matches!(err, OfflineError::InstallFetch { .. }));
        assert_eq!(cache.state(), WorkerState::Redundant);
        // The broken version left nothing behind and the old one survives
        assert_eq!(cache.storage().generations().unwrap(), vec!["v6"]);
        assert!(cache.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let fetcher = serving_bundle();
        fetcher.serve("https://radio.example/styles.css", 404, "missing");
        let cache = OfflineCache::new(&config("v6"), MemoryStorage::new(), fetcher).unwrap();

        let err = cache.install().await.unwrap_err();
        assert!(matches!(err, OfflineError::InstallStatus { status: 404, .. }));
        assert!(cache.storage().generations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_evicts_previous_generations() {
        let storage = MemoryStorage::new();
        storage.open("v6").unwrap();
        storage.open("v5").unwrap();

        let cache = OfflineCache::new(&config("v7"), storage, serving_bundle()).unwrap();
        cache.install().await.unwrap();
        let mut evicted = cache.activate().await.unwrap();
        evicted.sort();

        assert_eq!(evicted, vec!["v5", "v6"]);
        assert_eq!(cache.storage().generations().unwrap(), vec!["v7"]);
        assert_eq!(cache.state(), WorkerState::Activated);
        assert!(cache.controls_clients());
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let cache = OfflineCache::new(&config("v7"), MemoryStorage::new(), serving_bundle()).unwrap();
        let err = cache.activate().await.unwrap_err();
        assert!(matches!(
            err,
            OfflineError::InvalidState { state: WorkerState::Parsed, .. }
        ));
    }

    #[tokio::test]
    async fn test_resume_existing_generation() {
        let storage = MemoryStorage::new();
        store_asset(&storage, "v6", "https://radio.example/", "<html>v6</html>");
        store_asset(&storage, "v6", "https://radio.example/styles.css", "body{}");
        let cache = OfflineCache::new(&config("v6"), storage, serving_bundle()).unwrap();
        assert!(cache.resume().unwrap());
        assert_eq!(cache.state(), WorkerState::Installed);
        assert!(!cache.wants_activation());
        assert!(cache.activate().await.unwrap().is_empty());
        assert_eq!(cache.state(), WorkerState::Activated);

        let fresh = OfflineCache::new(&config("v7"), MemoryStorage::new(), serving_bundle()).unwrap();
        assert!(!fresh.resume().unwrap());
        assert_eq!(fresh.state(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_interrupted_install_never_replaces_working_cache() {
        // v6 is live; a killed install of v7 left an empty generation behind
        let storage = MemoryStorage::new();
        store_asset(&storage, "v6", "https://radio.example/", "<html>v6</html>");
        store_asset(&storage, "v6", "https://radio.example/styles.css", "body{}");
        storage.open("v7").unwrap();

        let cache = OfflineCache::new(&config("v7"), storage, serving_bundle()).unwrap();
        assert!(!cache.resume().unwrap());
        assert_eq!(cache.state(), WorkerState::Parsed);
        assert!(cache.activate().await.is_err());
        assert_eq!(cache.storage().generations().unwrap(), vec!["v6"]);
        assert_eq!(
            cache.storage().get("v6", "https://radio.example/").unwrap().unwrap().body,
            b"<html>v6</html>"
        );

        // A fresh install still works afterwards
        cache.install().await.unwrap();
        assert_eq!(cache.activate().await.unwrap(), vec!["v6"]);
    }

    #[tokio::test]
    async fn test_partial_generation_is_not_resumed() {
        let storage = MemoryStorage::new();
        store_asset(&storage, "v6", "https://radio.example/", "<html>v6</html>");
        store_asset(&storage, "v7", "https://radio.example/", "<html>v7</html>");

        let cache = OfflineCache::new(&config("v7"), storage, serving_bundle()).unwrap();
        assert!(!cache.resume().unwrap());
        assert_eq!(cache.storage().generations().unwrap(), vec!["v6"]);
    }

    #[tokio::test]
    async fn test_failed_write_removes_new_generation() {
        let storage = FailingPuts {
            inner: MemoryStorage::new(),
            allowed: AtomicUsize::new(1),
        };
        store_asset(&storage.inner, "v6", "https://radio.example/", "<html>v6</html>");

        let cache = OfflineCache::new(&config("v7"), storage, serving_bundle()).unwrap();
        let err = cache.install().await.unwrap_err();
        assert!(matches!(err, OfflineError::Storage(_)));
        assert_eq!(cache.state(), WorkerState::Redundant);
        assert_eq!(cache.storage().generations().unwrap(), vec!["v6"]);
        assert!(!cache.resume().unwrap());
    }

    #[tokio::test]
    async fn test_requests_pass_through_before_activation() {
        let cache = OfflineCache::new(&config("v6"), MemoryStorage::new(), serving_bundle()).unwrap();
        let routed = cache.route(&get("https://radio.example/styles.css")).await.unwrap();
        assert_eq!(routed, Routed::Bypass);
    }

    #[tokio::test]
    async fn test_stream_bypasses_even_with_static_extension() {
        let cache = active_cache("v6").await;
        let calls = cache.fetcher.calls();
        let routed = cache.route(&get("https://radio.example/stream/cover.png")).await.unwrap();
        assert_eq!(routed, Routed::Bypass);
        assert_eq!(cache.fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn test_cache_first_serves_without_waiting_and_revalidates() {
        let cache = active_cache("v6").await;
        cache.fetcher.serve("https://radio.example/styles.css", 200, "body{color:red}");
        cache.fetcher.hold();

        let routed = tokio::time::timeout(
            Duration::from_secs(1),
            cache.route(&get("https://radio.example/styles.css")),
        )
        .await
        .expect("cached asset must not wait for the network")
        .unwrap();
        assert_eq!(body(routed), (b"body{}".to_vec(), ResponseSource::Cache));

        cache.fetcher.release();
        cache.settle().await;

        let stored = cache
            .storage()
            .get("v6", "https://radio.example/styles.css")
            .unwrap()
            .unwrap();
        assert_eq!(stored.body, b"body{color:red}");
    }

    #[tokio::test]
    async fn test_cache_first_miss_stores_only_success() {
        let cache = active_cache("v6").await;
        cache.fetcher.serve("https://radio.example/app.js", 200, "js");
        cache.fetcher.serve("https://radio.example/gone.js", 404, "nope");

        let (bytes, source) = body(cache.route(&get("https://radio.example/app.js")).await.unwrap());
        assert_eq!((bytes.as_slice(), source), (b"js".as_slice(), ResponseSource::Network));
        assert!(cache.storage().get("v6", "https://radio.example/app.js").unwrap().is_some());

        let routed = cache.route(&get("https://radio.example/gone.js")).await.unwrap();
        assert!(matches!(routed, Routed::Response(ref r) if r.status == 404));
        assert!(cache.storage().get("v6", "https://radio.example/gone.js").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_revalidation_keeps_cached_copy() {
        let cache = active_cache("v6").await;
        cache.fetcher.drop_route("https://radio.example/styles.css");

        let (bytes, _) = body(cache.route(&get("https://radio.example/styles.css")).await.unwrap());
        assert_eq!(bytes, b"body{}");
        cache.settle().await;

        let stored = cache.storage().get("v6", "https://radio.example/styles.css").unwrap().unwrap();
        assert_eq!(stored.body, b"body{}");
    }

    #[tokio::test]
    async fn test_network_first_updates_cache_and_falls_back() {
        let cache = active_cache("v6").await;
        cache.fetcher.serve("https://radio.example/", 200, "<html>v2</html>");

        let (bytes, source) = body(cache.route(&get("https://radio.example/")).await.unwrap());
        assert_eq!(bytes, b"<html>v2</html>");
        assert_eq!(source, ResponseSource::Network);

        cache.fetcher.drop_route("https://radio.example/");
        let (bytes, source) = body(cache.route(&get("https://radio.example/")).await.unwrap());
        assert_eq!(bytes, b"<html>v2</html>");
        assert_eq!(source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn test_network_first_propagates_failure_without_copy() {
        let cache = active_cache("v6").await;
        let err = cache.route(&get("https://radio.example/about")).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }

    #[tokio::test]
    async fn test_api_requests_are_never_cached() {
        let cache = active_cache("v6").await;
        cache.fetcher.serve("https://radio.example/api/now.json", 200, "{}");

        let routed = cache.route(&get("https://radio.example/api/now.json")).await.unwrap();
        assert!(matches!(routed, Routed::Response(ref r) if r.source == ResponseSource::Network));
        assert!(cache.storage().get("v6", "https://radio.example/api/now.json").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_get_goes_to_network_only() {
        let cache = active_cache("v6").await;
        let request = AssetRequest {
            method: reqwest::Method::POST,
            url: Url::parse("https://radio.example/styles.css").unwrap(),
        };
        // Cached copy exists, but a POST must not be answered from it
        let err = cache.route(&request).await;
        assert!(matches!(err, Ok(Routed::Response(ref r)) if r.source == ResponseSource::Network));
    }
}
