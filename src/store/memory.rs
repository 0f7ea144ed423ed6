//! In-memory cache storage.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheStorage, CacheStore, is_matchable};
use crate::error::Result;
use crate::request::{Request, Response};

/// Cache storage held entirely in memory. Cloning shares the same stores.
#[derive(Clone, Default)]
pub struct MemoryCacheStorage {
    stores: Arc<RwLock<Vec<Arc<MemoryCacheStore>>>>,
}

impl MemoryCacheStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let mut stores = self.stores.write().await;
        if let Some(store) = stores.iter().find(|s| s.name == name) {
            return Ok(Arc::clone(store) as Arc<dyn CacheStore>);
        }
        let store = Arc::new(MemoryCacheStore::new(name));
        stores.push(Arc::clone(&store));
        Ok(store)
    }

    async fn open_existing(&self, name: &str) -> Result<Option<Arc<dyn CacheStore>>> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .find(|s| s.name == name)
            .map(|s| Arc::clone(s) as Arc<dyn CacheStore>))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.stores.read().await.iter().any(|s| s.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut stores = self.stores.write().await;
        let before = stores.len();
        stores.retain(|s| s.name != name);
        Ok(stores.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .stores
            .read()
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect())
    }
}

/// One in-memory store. Entries keep insertion order.
pub struct MemoryCacheStore {
    name: String,
    entries: RwLock<Vec<(Request, Response)>>,
}

impl MemoryCacheStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(Vec::new()),
        }
    }
}

fn upsert(entries: &mut Vec<(Request, Response)>, request: Request, response: Response) {
    if let Some(slot) = entries.iter_mut().find(|(r, _)| *r == request) {
        slot.1 = response;
    } else {
        entries.push((request.to_key(), response));
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        if !is_matchable(request) {
            return Ok(None);
        }
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|(r, _)| r == request)
            .map(|(_, resp)| resp.clone()))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        upsert(&mut *self.entries.write().await, request.clone(), response);
        Ok(())
    }

    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<()> {
        let mut stored = self.entries.write().await;
        for (request, response) in entries {
            upsert(&mut stored, request, response);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<Request>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(r, _)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{StatusCode, Url};

    fn req(path: &str) -> Request {
        Request::get(Url::parse("http://money.test").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let storage = MemoryCacheStorage::new();
        let a = storage.open("money-app-v1").await.unwrap();
        a.put(&req("/a"), Response::new(StatusCode::OK, "a"))
            .await
            .unwrap();

        let b = storage.open("money-app-v1").await.unwrap();
        assert!(b.match_request(&req("/a")).await.unwrap().is_some());
        assert_eq!(storage.keys().await.unwrap(), vec!["money-app-v1"]);
    }

    #[tokio::test]
    async fn put_replaces_same_key() {
        let storage = MemoryCacheStorage::new();
        let store = storage.open("c").await.unwrap();
        store
            .put(&req("/a"), Response::new(StatusCode::OK, "old"))
            .await
            .unwrap();
        store
            .put(&req("/a"), Response::new(StatusCode::OK, "new"))
            .await
            .unwrap();

        assert_eq!(store.keys().await.unwrap().len(), 1);
        let hit = store.match_request(&req("/a")).await.unwrap().unwrap();
        assert_eq!(hit.body, "new");
    }

    #[tokio::test]
    async fn delete_removes_store() {
        let storage = MemoryCacheStorage::new();
        storage.open("c").await.unwrap();

        assert!(storage.has("c").await.unwrap());
        assert!(storage.delete("c").await.unwrap());
        assert!(!storage.has("c").await.unwrap());
        assert!(!storage.delete("c").await.unwrap());
    }

    #[tokio::test]
    async fn open_existing_never_creates() {
        let storage = MemoryCacheStorage::new();
        assert!(storage.open_existing("c").await.unwrap().is_none());
        assert!(storage.keys().await.unwrap().is_empty());

        storage.open("c").await.unwrap();
        let store = storage.open_existing("c").await.unwrap().unwrap();
        assert_eq!(store.name(), "c");
    }

    #[tokio::test]
    async fn stored_key_drops_request_body() {
        let storage = MemoryCacheStorage::new();
        let store = storage.open("c").await.unwrap();
        store
            .put(&req("/a").with_body("payload"), Response::new(StatusCode::OK, "a"))
            .await
            .unwrap();
        assert!(store.keys().await.unwrap()[0].body().is_empty());
    }

    #[tokio::test]
    async fn clones_share_stores() {
        let storage = MemoryCacheStorage::new();
        let other = storage.clone();
        storage.open("shared").await.unwrap();
        assert!(other.has("shared").await.unwrap());
    }
}
