//! Configuration types for the cache, storage, network and proxy.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the cache store the install handler populates.
pub const CACHE_NAME: &str = "money-app-v1";

/// Asset manifest pre-cached at install time.
pub const DEFAULT_ASSETS: [&str; 3] = ["/app/index.html", "/app/app.js", "/app/manifest.json"];

/// Origin the money app is served from by default.
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000";

/// Default port of the local proxy.
pub const DEFAULT_PROXY_PORT: u16 = 8765;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "OFFLINE_SHIM_CONFIG";

/// Cache name and asset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name of the cache store to open.
    pub name: String,
    /// Base URL that asset paths and proxied requests are resolved against.
    pub origin: String,
    /// Paths pre-cached on install, in order.
    pub assets: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: CACHE_NAME.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            assets: DEFAULT_ASSETS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Replaces the asset manifest.
    #[must_use]
    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Parses the origin as a URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the origin is not an absolute URL.
    pub fn origin_url(&self) -> Result<reqwest::Url> {
        reqwest::Url::parse(&self.origin).map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.origin)))
    }
}

/// Where cache stores are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per cache store.
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

/// Returns the default storage directory.
///
/// Uses `STATE_DIRECTORY` (set by systemd when `StateDirectory=` is configured),
/// falling back to `$XDG_DATA_HOME/offline-shim` for interactive use.
#[must_use]
pub fn default_storage_dir() -> PathBuf {
    if let Ok(state_dir) = std::env::var("STATE_DIRECTORY") {
        PathBuf::from(state_dir).join("caches")
    } else {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-shim")
            .join("caches")
    }
}

/// HTTP client settings for the network layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds. Zero disables the timeout.
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Local proxy server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy bind address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PROXY_PORT,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cache name and asset manifest.
    pub cache: CacheConfig,
    /// Storage location.
    pub storage: StorageConfig,
    /// Network layer settings.
    pub network: NetworkConfig,
    /// Proxy settings.
    pub proxy: ProxyConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the config file path: `$OFFLINE_SHIM_CONFIG`, else
    /// `<config_dir>/offline-shim/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(
            || {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("offline-shim")
                    .join("config.toml")
            },
            PathBuf::from,
        )
    }

    /// Parses a configuration from TOML text. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid TOML for this schema.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Loads the configuration at `path`, writing a default template first
    /// if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be written or the file cannot
    /// be parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        Self::load(path)
    }

    /// Saves the configuration to `path` atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml_str)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
