use miette::Result;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Default CDN prefix vendored engines are served from.
pub const DEFAULT_VENDORS_BASE_URL: &str = "https://cdn.jsdelivr.net/npm/@live-codes/browser-compilers@0.1.0/dist/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL that vendored engine resources are resolved against.
    pub vendors_base_url: String,
    /// Run primary compile passes in the isolated worker when one is available.
    pub use_worker: bool,
    /// Per-language engine options, keyed by language id.
    pub custom_settings: HashMap<String, serde_json::Value>,
    /// Worker-side compile result cache.
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 200,
            ttl_secs: 3600,
        }
    }
}

impl Config {
    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self> {
        Ok(loader.load().await?)
    }
    /// Saves the configuration using the provided saver.
    pub async fn save(&self, saver: &impl Saver) -> Result<()> {
        Ok(saver.save(self).await?)
    }

    /// Engine options for `language`, or an empty object when none are set.
    pub fn language_settings(&self, language: &str) -> serde_json::Value {
        self.custom_settings
            .get(language)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendors_base_url: DEFAULT_VENDORS_BASE_URL.to_owned(),
            use_worker: true,
            custom_settings: HashMap::new(),
            cache: CacheConfig::default(),
        }
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> impl Future<Output = core::result::Result<Config, ConfigError>> + Send;
}

/// The trait for saving configuration data.
pub trait Saver {
    /// Saves the configuration data.
    fn save(&self, config: &Config)
    -> impl Future<Output = core::result::Result<(), ConfigError>> + Send;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// [`Config`] data will be serialized and deserialized using the file extension,
    /// `.json` and `.toml` are supported.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Loader for FileStore {
    async fn load(&self) -> core::result::Result<Config, ConfigError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&std::fs::read_to_string(&self.path)?)?),
            Some("toml") => Ok(toml::from_str(&std::fs::read_to_string(&self.path)?)?),
            _ => Err(ConfigError::UnsupportedFormat {
                path: self.path.clone(),
            }),
        }
    }
}

impl Saver for FileStore {
    async fn save(&self, config: &Config) -> core::result::Result<(), ConfigError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(std::fs::write(
                &self.path,
                serde_json::to_string_pretty(config)?,
            )?),
            Some("toml") => Ok(std::fs::write(&self.path, toml::to_string_pretty(config)?)?),
            _ => Err(ConfigError::UnsupportedFormat {
                path: self.path.clone(),
            }),
        }
    }
}
