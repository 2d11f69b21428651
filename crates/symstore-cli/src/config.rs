//! TOML configuration files.
//!
//! Files are read from lowest to highest precedence: `/etc/symstore.toml`,
//! `~/.symstore.toml`, `$SYMSTORE_CFG`, then each `--config` path. A later
//! file overrides the keys it sets and leaves the others alone.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const SYSTEM_CONFIG: &str = "/etc/symstore.toml";
pub const USER_CONFIG: &str = ".symstore.toml";
pub const CONFIG_ENV: &str = "SYMSTORE_CFG";
pub const STORE_DIR_ENV: &str = "SYMSTORE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no store named {0:?} in configuration")]
    UnknownStore(String),

    #[error("store {0:?} has no store directory")]
    MissingStore(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymstoreConfig {
    pub global: GlobalSection,
    pub stores: BTreeMap<String, StoreSection>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSection {
    /// Store section used when `--config-id` is absent.
    pub default: Option<String>,
    pub keep: Option<usize>,
    pub compress: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub store: Option<PathBuf>,
    pub keep: Option<usize>,
    pub compress: Option<bool>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl StoreSection {
    fn merge(&mut self, other: StoreSection) {
        self.store = other.store.or(self.store.take());
        self.keep = other.keep.or(self.keep);
        self.compress = other.compress.or(self.compress);
        self.product = other.product.or(self.product.take());
        self.version = other.version.or(self.version.take());
    }
}

/// Values the configuration contributes to a command. Command-line
/// arguments take precedence over every field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub store: Option<PathBuf>,
    pub keep: Option<usize>,
    pub compress: Option<bool>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl Settings {
    /// `explicit`, else the configured store, else `$SYMSTORE_DIR`.
    pub fn store_dir(&self, explicit: Option<PathBuf>) -> Option<PathBuf> {
        explicit
            .or_else(|| self.store.clone())
            .or_else(|| env::var_os(STORE_DIR_ENV).map(PathBuf::from))
    }
}

impl SymstoreConfig {
    pub fn parse(path: &Path, text: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read the standard locations, then `explicit` in order.
    ///
    /// Missing standard files are skipped; a missing explicit file is an
    /// error.
    pub fn load(explicit: &[PathBuf]) -> ConfigResult<Self> {
        let mut config = Self::default();
        for path in candidate_paths() {
            if path.is_file() {
                config.merge(Self::read(&path)?);
            }
        }
        for path in explicit {
            config.merge(Self::read(path)?);
        }
        Ok(config)
    }

    fn read(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "configuration loaded");
        Self::parse(path, &text)
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: SymstoreConfig) {
        self.global.default = other.global.default.or(self.global.default.take());
        self.global.keep = other.global.keep.or(self.global.keep);
        self.global.compress = other.global.compress.or(self.global.compress);
        for (name, section) in other.stores {
            self.stores.entry(name).or_default().merge(section);
        }
    }

    /// Settings of store `config_id`, or of `global.default` when absent.
    pub fn resolve(&self, config_id: Option<&str>) -> ConfigResult<Settings> {
        let mut settings = Settings {
            keep: self.global.keep,
            compress: self.global.compress,
            ..Settings::default()
        };
        let Some(name) = config_id.or(self.global.default.as_deref()) else {
            return Ok(settings);
        };
        let section = self
            .stores
            .get(name)
            .ok_or_else(|| ConfigError::UnknownStore(name.to_string()))?;
        let store = section
            .store
            .clone()
            .ok_or_else(|| ConfigError::MissingStore(name.to_string()))?;
        settings.store = Some(store);
        settings.keep = section.keep.or(settings.keep);
        settings.compress = section.compress.or(settings.compress);
        settings.product = section.product.clone();
        settings.version = section.version.clone();
        Ok(settings)
    }
}

/// Standard configuration locations, lowest precedence first.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(home) = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        paths.push(PathBuf::from(home).join(USER_CONFIG));
    }
    if let Some(path) = env::var_os(CONFIG_ENV) {
        paths.push(PathBuf::from(path));
    }
    paths
}
