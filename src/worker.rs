//! The offline worker: pre-cache on install, cache-first on fetch.

use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::event::{FetchEvent, InstallEvent};
use crate::network::Network;
use crate::request::{Request, Response};
use crate::store::{CacheStorage, CacheStore};

/// Event handlers a [`WorkerHost`](crate::WorkerHost) dispatches to.
///
/// Both handlers return immediately; asynchronous work is registered on the
/// event.
pub trait Worker: Send + Sync {
    /// Handles the install lifecycle event.
    fn on_install(&self, _event: &mut InstallEvent) {}

    /// Handles one intercepted request. Leaving the event without a response
    /// lets the host fall back to the network.
    fn on_fetch(&self, _event: &mut FetchEvent) {}
}

/// Pre-caches the asset manifest on install and answers every request from
/// the cache when it can, from the network otherwise.
#[derive(Clone)]
pub struct OfflineWorker {
    config: Arc<CacheConfig>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl OfflineWorker {
    /// Creates a worker over the given storage and network.
    #[must_use]
    pub fn new(config: CacheConfig, storage: Arc<dyn CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            network,
        }
    }

    /// Returns the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Opens the configured cache and adds every asset to it.
    ///
    /// # Errors
    ///
    /// Fails if any asset URL is invalid, any fetch fails, or any response is
    /// not ok. Nothing is stored in that case.
    pub async fn precache(&self) -> Result<()> {
        let origin = self.config.origin_url()?;
        let requests = self
            .config
            .assets
            .iter()
            .map(|path| Request::get_path(&origin, path))
            .collect::<Result<Vec<_>>>()?;

        let store = self.storage.open(&self.config.name).await?;
        store.add_all(self.network.as_ref(), requests).await?;
        log::info!(
            "Pre-cached {} assets into {}",
            self.config.assets.len(),
            self.config.name
        );
        Ok(())
    }

    /// Answers `request` from any cache store, falling back to the network.
    ///
    /// Stale entries are served as-is and network responses are never stored.
    ///
    /// # Errors
    ///
    /// Returns the network error unchanged when the request misses the cache
    /// and the network fails.
    pub async fn cache_first(&self, request: &Request) -> Result<Response> {
        if let Some(cached) = self.storage.match_request(request).await? {
            log::debug!("Cache hit: {request}");
            return Ok(cached);
        }
        log::debug!("Cache miss: {request}");
        self.network.fetch(request).await
    }
}

impl Worker for OfflineWorker {
    fn on_install(&self, event: &mut InstallEvent) {
        let worker = self.clone();
        event.wait_until(async move { worker.precache().await });
    }

    fn on_fetch(&self, event: &mut FetchEvent) {
        let worker = self.clone();
        let request = event.request().clone();
        if let Err(e) = event.respond_with(async move { worker.cache_first(&request).await }) {
            log::warn!("Fetch not intercepted: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::network::mock::MockNetwork;
    use crate::store::MemoryCacheStorage;
    use reqwest::{StatusCode, Url};

    const ORIGIN: &str = "http://money.test";

    fn setup(network: MockNetwork) -> (OfflineWorker, MemoryCacheStorage, Arc<MockNetwork>) {
        let storage = MemoryCacheStorage::new();
        let network = Arc::new(network);
        let worker = OfflineWorker::new(
            CacheConfig::new().with_origin(ORIGIN),
            Arc::new(storage.clone()),
            Arc::clone(&network) as Arc<dyn Network>,
        );
        (worker, storage, network)
    }

    fn req(path: &str) -> Request {
        Request::get_path(&Url::parse(ORIGIN).unwrap(), path).unwrap()
    }

    #[tokio::test]
    async fn precache_stores_exactly_the_manifest() {
        let (worker, storage, network) = setup(MockNetwork::new());
        worker.precache().await.unwrap();

        assert_eq!(network.calls(), 3);
        assert_eq!(storage.keys().await.unwrap(), vec!["money-app-v1"]);
        let store = storage.open("money-app-v1").await.unwrap();
        let keys: Vec<String> = store
            .keys()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url().path().to_string())
            .collect();
        assert_eq!(keys, vec!["/app/index.html", "/app/app.js", "/app/manifest.json"]);
    }

    #[tokio::test]
    async fn precache_fails_when_one_asset_fails() {
        let (worker, storage, _network) = setup(MockNetwork::new().failing("/app/app.js"));
        assert!(worker.precache().await.is_err());

        let store = storage.open("money-app-v1").await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn precache_rejects_bad_origin() {
        let storage = MemoryCacheStorage::new();
        let worker = OfflineWorker::new(
            CacheConfig::new().with_origin("not a url"),
            Arc::new(storage),
            Arc::new(MockNetwork::new()),
        );
        assert!(matches!(worker.precache().await, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn cache_first_serves_stale_entry_without_network() {
        let (worker, storage, network) = setup(MockNetwork::new());
        let store = storage.open("money-app-v1").await.unwrap();
        store
            .put(&req("/app/index.html"), Response::new(StatusCode::OK, "old build"))
            .await
            .unwrap();

        let resp = worker.cache_first(&req("/app/index.html")).await.unwrap();
        assert_eq!(resp.body, "old build");
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn cache_first_does_not_write_back() {
        let (worker, storage, network) = setup(MockNetwork::new());
        worker.cache_first(&req("/app/other.js")).await.unwrap();
        worker.cache_first(&req("/app/other.js")).await.unwrap();

        assert_eq!(network.calls(), 2);
        assert!(storage.match_request(&req("/app/other.js")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn on_fetch_responds() {
        let (worker, _storage, network) = setup(MockNetwork::new());
        let mut event = FetchEvent::new(req("/app/other.js"));
        worker.on_fetch(&mut event);
        assert!(event.has_response());

        let (_, response) = event.into_parts();
        let resp = response.unwrap().await.unwrap();
        assert_eq!(resp.body, "body of http://money.test/app/other.js");
        assert_eq!(network.calls(), 1);
    }

    #[tokio::test]
    async fn on_install_registers_work() {
        let (worker, _storage, network) = setup(MockNetwork::new());
        let mut event = InstallEvent::new();
        worker.on_install(&mut event);
        assert_eq!(event.pending(), 1);
        assert_eq!(network.calls(), 0);

        event.settle().await.unwrap();
        assert_eq!(network.calls(), 3);
    }
}
