//! Persistent cache storage under a directory.
//!
//! Layout:
//!
//! ```text
//! <root>/<sha256(cache name)>/cache.json              store metadata
//! <root>/<sha256(cache name)>/<sha256(method url)>.json  one entry
//! ```
//!
//! Every file is written to a `.tmp` sibling and renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{CacheStorage, CacheStore, digest_hex, is_matchable};
use crate::error::{Error, Result};
use crate::request::{Request, Response};

const META_FILE: &str = "cache.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    name: String,
    created: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    method: String,
    url: String,
    status: u16,
    /// Header names with base64-encoded raw values.
    headers: Vec<(String, String)>,
    /// Base64-encoded body.
    body: String,
    stored_at: DateTime<Utc>,
}

impl EntryRecord {
    fn new(request: &Request, response: &Response) -> Self {
        Self {
            method: request.method().to_string(),
            url: request.url().to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), BASE64.encode(value.as_bytes())))
                .collect(),
            body: BASE64.encode(&response.body),
            stored_at: Utc::now(),
        }
    }

    fn request(&self, path: &Path) -> Result<Request> {
        let method = Method::from_bytes(self.method.as_bytes()).map_err(|e| corrupt(path, e))?;
        let url = Url::parse(&self.url).map_err(|e| corrupt(path, e))?;
        Ok(Request::new(method, url))
    }

    fn into_response(self, path: &Path) -> Result<Response> {
        let status = StatusCode::from_u16(self.status).map_err(|e| corrupt(path, e))?;
        let body = BASE64.decode(&self.body).map_err(|e| corrupt(path, e))?;
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| corrupt(path, e))?;
            let value = BASE64.decode(value).map_err(|e| corrupt(path, e))?;
            let value = HeaderValue::from_bytes(&value).map_err(|e| corrupt(path, e))?;
            headers.append(name, value);
        }
        Ok(Response {
            status,
            headers,
            body: body.into(),
        })
    }
}

fn corrupt(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, serde_json::to_vec(value)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| corrupt(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Cache storage persisted under a root directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. Nothing is created until a store
    /// is opened.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(digest_hex(name))
    }

    fn store(&self, name: &str) -> Arc<DiskCacheStore> {
        Arc::new(DiskCacheStore {
            name: name.to_string(),
            dir: self.store_dir(name),
        })
    }

    async fn metas(&self) -> Result<Vec<StoreMeta>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut metas = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let meta_path = entry.path().join(META_FILE);
            match read_json::<StoreMeta>(&meta_path).await {
                Ok(Some(meta)) => metas.push(meta),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable cache store: {e}"),
            }
        }
        metas.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(metas)
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>> {
        let dir = self.store_dir(name);
        let meta_path = dir.join(META_FILE);
        if !tokio::fs::try_exists(&meta_path).await? {
            tokio::fs::create_dir_all(&dir).await?;
            let meta = StoreMeta {
                name: name.to_string(),
                created: Utc::now(),
            };
            write_json(&meta_path, &meta).await?;
            log::debug!("Created cache store {name} at {}", dir.display());
        }
        Ok(self.store(name))
    }

    async fn open_existing(&self, name: &str) -> Result<Option<Arc<dyn CacheStore>>> {
        if self.has(name).await? {
            Ok(Some(self.store(name) as Arc<dyn CacheStore>))
        } else {
            Ok(None)
        }
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.store_dir(name).join(META_FILE)).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.store_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.metas().await?.into_iter().map(|m| m.name).collect())
    }
}

/// One store persisted as a directory of JSON entries.
#[derive(Debug)]
pub struct DiskCacheStore {
    name: String,
    dir: PathBuf,
}

impl DiskCacheStore {
    fn entry_path(&self, request: &Request) -> PathBuf {
        self.dir
            .join(format!("{}.json", digest_hex(&request.cache_key())))
    }

    async fn records(&self) -> Result<Vec<(PathBuf, EntryRecord)>> {
        let mut read_dir = tokio::fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let is_entry = path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|n| n != META_FILE);
            if !is_entry {
                continue;
            }
            if let Some(record) = read_json::<EntryRecord>(&path).await? {
                records.push((path, record));
            }
        }
        records.sort_by(|a, b| a.1.stored_at.cmp(&b.1.stored_at));
        Ok(records)
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        if !is_matchable(request) {
            return Ok(None);
        }
        let path = self.entry_path(request);
        match read_json::<EntryRecord>(&path).await? {
            Some(record) => record.into_response(&path).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        write_json(&self.entry_path(request), &EntryRecord::new(request, &response)).await
    }

    async fn put_all(&self, entries: Vec<(Request, Response)>) -> Result<()> {
        // Stage every entry before renaming any of them into place.
        let mut staged = Vec::with_capacity(entries.len());
        for (request, response) in &entries {
            let path = self.entry_path(request);
            let tmp = tmp_path(&path);
            let bytes = serde_json::to_vec(&EntryRecord::new(request, response))?;
            if let Err(e) = tokio::fs::write(&tmp, bytes).await {
                for (_, tmp) in &staged {
                    let _ = tokio::fs::remove_file(tmp).await;
                }
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            staged.push((path, tmp));
        }
        for (path, tmp) in staged {
            tokio::fs::rename(&tmp, &path).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<Request>> {
        self.records()
            .await?
            .iter()
            .map(|(path, record)| record.request(path))
            .collect()
    }
}
