//! offline-shim - An offline cache for the money app's static front-end.
//!
//! On install the asset manifest is fetched and stored in a named cache
//! store; afterwards every request is answered from the cache when a stored
//! entry matches, and from the network otherwise.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_shim::{
//!     CacheConfig, DiskCacheStorage, HttpNetwork, NetworkConfig, OfflineWorker, Request,
//!     WorkerHost,
//! };
//!
//! # async fn example() -> offline_shim::Result<()> {
//! let config = CacheConfig::default();
//! let storage = Arc::new(DiskCacheStorage::new("/var/lib/offline-shim/caches"));
//! let network = Arc::new(HttpNetwork::new(&NetworkConfig::default())?);
//!
//! let origin = config.origin_url()?;
//! let worker = OfflineWorker::new(config, storage, network.clone());
//! let host = WorkerHost::new(worker, network);
//! host.install().await?;
//!
//! let (response, _source) = host.fetch(Request::get_path(&origin, "/app/index.html")?).await?;
//! println!("{} bytes", response.body.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod network;
#[cfg(feature = "proxy")]
pub mod proxy;
pub mod request;
pub mod store;
pub mod worker;

// Re-export main types for convenience
pub use config::{AppConfig, CACHE_NAME, CacheConfig, DEFAULT_ASSETS, NetworkConfig, ProxyConfig, StorageConfig};
pub use error::{Error, Result};
pub use event::{FetchEvent, InstallEvent};
pub use host::{ResponseSource, WorkerHost, WorkerState};
pub use network::{HttpNetwork, Network};
pub use request::{Request, Response};
pub use store::{CacheStorage, CacheStore, DiskCacheStorage, MemoryCacheStorage};
pub use worker::{OfflineWorker, Worker};
