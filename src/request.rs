//! Request descriptors and stored response snapshots.

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};

use crate::error::{Error, Result};

/// Connection-level headers that are never forwarded in either direction.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Returns true for headers that only describe a single connection.
pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// An outgoing request.
///
/// Equality and hashing only look at the method and URL, which form the
/// cache key. The URL fragment is never part of the key. Headers and body
/// travel with the request to the network but are not stored.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.url == other.url
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state);
        self.url.hash(state);
    }
}

impl Request {
    /// Creates a request with no headers and an empty body, dropping any
    /// fragment from `url`.
    #[must_use]
    pub fn new(method: Method, mut url: Url) -> Self {
        url.set_fragment(None);
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Replaces the request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Creates a `GET` request for an absolute URL.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a `GET` request for `path` resolved against `origin`.
    ///
    /// Absolute URLs are accepted as-is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `path` cannot be joined onto `origin`.
    pub fn get_path(origin: &Url, path: &str) -> Result<Self> {
        let url = origin
            .join(path)
            .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the key used to identify this request inside a store.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Returns a copy holding only the method and URL, as stores keep it.
    #[must_use]
    pub fn to_key(&self) -> Self {
        Self::new(self.method.clone(), self.url.clone())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A response snapshot: status, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response status.
    pub status: StatusCode,
    /// Response headers as received.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl Response {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns true if the status is in the 2xx range.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the first value of header `name` (case-insensitive) if it is
    /// visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
