//! Worker host: owns the worker's lifecycle state and dispatches events.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::event::{FetchEvent, InstallEvent};
use crate::network::Network;
use crate::request::{Request, Response};
use crate::store::{CacheStorage, CacheStore};
use crate::worker::Worker;

/// Lifecycle state of the hosted worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered, install not yet attempted.
    Parsed,
    /// Install event dispatched, waiting for it to settle.
    Installing,
    /// Installed; fetch events are intercepted.
    Installed,
    /// Install failed; the worker never controls requests.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The worker answered the fetch event.
    Worker,
    /// The request bypassed the worker and went to the network.
    Network,
}

/// Hosts one worker the way a browser hosts a service worker.
pub struct WorkerHost<W: Worker> {
    worker: W,
    network: Arc<dyn Network>,
    state: Mutex<WorkerState>,
}

impl<W: Worker> WorkerHost<W> {
    /// Creates a host. `network` serves requests the worker does not control.
    #[must_use]
    pub fn new(worker: W, network: Arc<dyn Network>) -> Self {
        Self {
            worker,
            network,
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    /// Returns the hosted worker.
    #[must_use]
    pub const fn worker(&self) -> &W {
        &self.worker
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    fn set_state(&self, state: WorkerState) {
        *self.lock_state() = state;
    }

    /// Dispatches the install event and waits for everything it registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if an install is already in flight, or
    /// [`Error::Install`] wrapping the first failure. The worker is then
    /// [`WorkerState::Redundant`].
    pub async fn install(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            if *state == WorkerState::Installing {
                return Err(Error::InvalidState("install already in progress".to_string()));
            }
            *state = WorkerState::Installing;
        }
        log::info!("Installing worker");

        let mut event = InstallEvent::new();
        self.worker.on_install(&mut event);

        match event.settle().await {
            Ok(()) => {
                self.set_state(WorkerState::Installed);
                log::info!("Worker installed");
                Ok(())
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant);
                log::error!("Worker install failed: {e}");
                Err(Error::Install(Box::new(e)))
            }
        }
    }

    /// Marks the worker installed if `cache_name` exists in `storage` and
    /// holds entries, as left by an earlier successful install.
    ///
    /// Returns true if the worker now controls requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be queried.
    pub async fn adopt_existing(&self, storage: &dyn CacheStorage, cache_name: &str) -> Result<bool> {
        if self.state() == WorkerState::Installed {
            return Ok(true);
        }
        let Some(store) = storage.open_existing(cache_name).await? else {
            return Ok(false);
        };
        if !store.keys().await?.is_empty() {
            self.set_state(WorkerState::Installed);
            log::info!("Adopted existing cache {cache_name}");
            return Ok(true);
        }
        Ok(false)
    }

    /// Produces the response for `request`.
    ///
    /// Until the worker is installed, requests go straight to the network.
    /// After that the worker's fetch handler decides; if it supplies no
    /// response the network is used.
    ///
    /// # Errors
    ///
    /// Whatever error produced the response is returned unchanged.
    pub async fn fetch(&self, request: Request) -> Result<(Response, ResponseSource)> {
        if self.state() != WorkerState::Installed {
            log::debug!("Not controlled ({}): {request}", self.state());
            let response = self.network.fetch(&request).await?;
            return Ok((response, ResponseSource::Network));
        }

        let mut event = FetchEvent::new(request);
        self.worker.on_fetch(&mut event);
        match event.into_parts() {
            (_, Some(response)) => Ok((response.await?, ResponseSource::Worker)),
            (request, None) => {
                let response = self.network.fetch(&request).await?;
                Ok((response, ResponseSource::Network))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use crate::config::CacheConfig;
    use crate::network::mock::MockNetwork;
    use crate::store::MemoryCacheStorage;
    use crate::worker::OfflineWorker;
    use reqwest::{StatusCode, Url};

    const ORIGIN: &str = "http://money.test";

    fn host(network: MockNetwork) -> (WorkerHost<OfflineWorker>, MemoryCacheStorage, Arc<MockNetwork>) {
        let storage = MemoryCacheStorage::new();
        let network = Arc::new(network);
        let worker = OfflineWorker::new(
            CacheConfig::new().with_origin(ORIGIN),
            Arc::new(storage.clone()),
            Arc::clone(&network) as Arc<dyn Network>,
        );
        (
            WorkerHost::new(worker, Arc::clone(&network) as Arc<dyn Network>),
            storage,
            network,
        )
    }

    fn req(path: &str) -> Request {
        Request::get_path(&Url::parse(ORIGIN).unwrap(), path).unwrap()
    }

    struct Silent;

    impl Worker for Silent {}

    /// Holds the first fetch until the gate opens; later fetches answer at once.
    struct GatedNetwork {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        calls: AtomicUsize,
    }

    impl GatedNetwork {
        fn new() -> (Self, oneshot::Sender<()>) {
            let (tx, rx) = oneshot::channel();
            let network = Self {
                gate: Mutex::new(Some(rx)),
                calls: AtomicUsize::new(0),
            };
            (network, tx)
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Network for GatedNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(Response::new(StatusCode::OK, format!("live {}", request.url().path())))
        }
    }

    /// Starts an install that stays pending until the returned sender fires.
    async fn pending_install() -> (
        Arc<WorkerHost<OfflineWorker>>,
        MemoryCacheStorage,
        Arc<GatedNetwork>,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let storage = MemoryCacheStorage::new();
        let (network, release) = GatedNetwork::new();
        let network = Arc::new(network);
        let worker = OfflineWorker::new(
            CacheConfig::new().with_origin(ORIGIN),
            Arc::new(storage.clone()),
            Arc::clone(&network) as Arc<dyn Network>,
        );
        let host = Arc::new(WorkerHost::new(worker, Arc::clone(&network) as Arc<dyn Network>));

        let installing = Arc::clone(&host);
        let install = tokio::spawn(async move { installing.install().await });
        while network.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(host.state(), WorkerState::Installing);
        (host, storage, network, release, install)
    }

    #[tokio::test]
    async fn install_moves_to_installed() {
        let (host, _storage, _network) = host(MockNetwork::new());
        assert_eq!(host.state(), WorkerState::Parsed);
        host.install().await.unwrap();
        assert_eq!(host.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn failed_install_is_redundant() {
        let (host, _storage, _network) = host(MockNetwork::new().failing("/app/manifest.json"));
        let result = host.install().await;
        assert!(matches!(result, Err(Error::Install(_))));
        assert_eq!(host.state(), WorkerState::Redundant);
    }

    #[tokio::test]
    async fn uncontrolled_fetch_goes_to_network() {
        let (host, storage, network) = host(MockNetwork::new());
        let store = storage.open("money-app-v1").await.unwrap();
        store
            .put(&req("/app/index.html"), Response::new(reqwest::StatusCode::OK, "cached"))
            .await
            .unwrap();

        let (resp, source) = host.fetch(req("/app/index.html")).await.unwrap();
        assert_eq!(source, ResponseSource::Network);
        assert_eq!(resp.body, "body of http://money.test/app/index.html");
        assert_eq!(network.calls(), 1);
    }

    #[tokio::test]
    async fn installed_fetch_hits_cache() {
        let (host, _storage, network) = host(MockNetwork::new());
        host.install().await.unwrap();
        let after_install = network.calls();

        let (resp, source) = host.fetch(req("/app/index.html")).await.unwrap();
        assert_eq!(source, ResponseSource::Worker);
        assert_eq!(resp.body, "body of http://money.test/app/index.html");
        assert_eq!(network.calls(), after_install);
    }

    #[tokio::test]
    async fn second_install_while_installing_is_rejected() {
        let (host, _storage, _network, release, install) = pending_install().await;

        let result = host.install().await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(host.state(), WorkerState::Installing);

        release.send(()).unwrap();
        install.await.unwrap().unwrap();
        assert_eq!(host.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn fetch_during_install_bypasses_cache() {
        let (host, storage, network, release, install) = pending_install().await;
        storage
            .open("money-app-v1")
            .await
            .unwrap()
            .put(&req("/app/index.html"), Response::new(StatusCode::OK, "cached"))
            .await
            .unwrap();
        let before = network.calls();

        let (resp, source) = host.fetch(req("/app/index.html")).await.unwrap();

        assert_eq!(source, ResponseSource::Network);
        assert_eq!(resp.body, "live /app/index.html");
        assert_eq!(network.calls(), before + 1);

        release.send(()).unwrap();
        install.await.unwrap().unwrap();
        let (_, source) = host.fetch(req("/app/index.html")).await.unwrap();
        assert_eq!(source, ResponseSource::Worker);
    }

    #[tokio::test]
    async fn silent_worker_falls_back_to_network() {
        let network = Arc::new(MockNetwork::new());
        let host = WorkerHost::new(Silent, Arc::clone(&network) as Arc<dyn Network>);
        host.install().await.unwrap();

        let (_, source) = host.fetch(req("/anything")).await.unwrap();
        assert_eq!(source, ResponseSource::Network);
        assert_eq!(network.calls(), 1);
    }

    #[tokio::test]
    async fn adopt_existing_requires_cache() {
        let (host, storage, network) = host(MockNetwork::new());
        assert!(!host.adopt_existing(&storage, "money-app-v1").await.unwrap());
        assert_eq!(host.state(), WorkerState::Parsed);

        let store = storage.open("money-app-v1").await.unwrap();
        assert!(!host.adopt_existing(&storage, "money-app-v1").await.unwrap());

        store
            .put(&req("/app/index.html"), Response::new(reqwest::StatusCode::OK, "cached"))
            .await
            .unwrap();
        assert!(host.adopt_existing(&storage, "money-app-v1").await.unwrap());
        assert_eq!(host.state(), WorkerState::Installed);
        assert_eq!(network.calls(), 0);
    }

    #[test]
    fn state_display() {
        assert_eq!(WorkerState::Installed.to_string(), "installed");
        assert_eq!(WorkerState::Redundant.to_string(), "redundant");
    }
}
