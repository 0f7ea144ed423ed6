//! Cache storage abstraction.
//!
//! A [`CacheStorage`] is a set of named [`CacheStore`]s. Each store maps
//! request descriptors to response snapshots. Two implementations ship with
//! the crate: [`MemoryCacheStorage`] for tests and short-lived hosts, and
//! [`DiskCacheStorage`] which persists across process restarts.

mod disk;
mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::{Request, Response};

pub use disk::{DiskCacheStorage, DiskCacheStore};
pub use memory::{MemoryCacheStorage, MemoryCacheStore};

/// A single named cache store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the store's name.
    fn name(&self) -> &str;

    /// Returns the stored response for `request`, if any.
    ///
    /// Only `GET` requests can match.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>>;

    /// Stores `response` under `request`, replacing any existing entry.
    async fn put(&self, request: &Request, response: Response) -> Result<()>;

    /// Stores every entry, or none of them if the write fails part way.
    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<()>;

    /// Returns the requests currently stored, oldest first.
    async fn keys(&self) -> Result<Vec<Request>>;

    /// Fetches every request and stores the responses, all-or-nothing.
    ///
    /// Fails without writing anything if the list has duplicates, any fetch
    /// fails, or any response is not ok.
    async fn add_all(&self, network: &dyn Network, requests: Vec<Request>) -> Result<()> {
        let mut seen = HashSet::new();
        if let Some(dup) = requests.iter().find(|r| !seen.insert(r.cache_key())) {
            return Err(Error::DuplicateRequest {
                url: dup.url().to_string(),
            });
        }

        let responses = futures::future::try_join_all(requests.iter().map(|request| async move {
            let response = network.fetch(request).await?;
            if !response.is_ok() {
                return Err(Error::BadStatus {
                    url: request.url().to_string(),
                    status: response.status.as_u16(),
                });
            }
            Ok::<_, Error>(response)
        }))
        .await?;

        self.put_all(requests.into_iter().zip(responses).collect()).await
    }
}

/// A collection of named cache stores.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the store called `name`, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>>;

    /// Returns the store called `name` if it exists. Never creates one.
    async fn open_existing(&self, name: &str) -> Result<Option<Arc<dyn CacheStore>>>;

    /// Returns true if a store called `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Deletes the store called `name`. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Returns the store names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Searches every store, in creation order, for `request`.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        if !is_matchable(request) {
            return Ok(None);
        }
        for name in self.keys().await? {
            // Deleted since `keys`.
            let Some(store) = self.open_existing(&name).await? else {
                continue;
            };
            if let Some(response) = store.match_request(request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// Returns true if `request` is eligible for a cache match.
pub(crate) fn is_matchable(request: &Request) -> bool {
    *request.method() == Method::GET
}

/// Hex-encoded SHA-256 of `input`, used for on-disk names.
pub(crate) fn digest_hex(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
