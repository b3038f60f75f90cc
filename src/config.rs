use crate::error::RouxError;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

/// Name of the per-root cache directory. Always excluded from scans.
pub const CACHE_DIR_NAME: &str = ".roux";
pub const CACHE_DB_NAME: &str = "cache.db";
pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;
pub const DEFAULT_LINK_EXTENSION: &str = "md";
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_WATCH_CHANNEL_CAPACITY: usize = 16;

pub fn default_excluded_dirs() -> BTreeSet<String> {
    [CACHE_DIR_NAME, ".git", "node_modules", ".obsidian", ".trash"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Engine configuration. Everything here is handed to constructors explicitly; there is no
/// process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouxConfig {
    pub source_root: PathBuf,
    /// Defaults to `<source_root>/.roux` when unset.
    pub cache_dir: Option<PathBuf>,
    pub excluded_dirs: BTreeSet<String>,
    pub debounce_ms: u64,
    pub default_link_extension: String,
    pub fuzzy_threshold: f64,
    pub watch_channel_capacity: usize,
}

impl Default for RouxConfig {
    fn default() -> Self {
        RouxConfig {
            source_root: PathBuf::from("."),
            cache_dir: None,
            excluded_dirs: default_excluded_dirs(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            default_link_extension: DEFAULT_LINK_EXTENSION.to_string(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            watch_channel_capacity: DEFAULT_WATCH_CHANNEL_CAPACITY,
        }
    }
}

impl RouxConfig {
    pub fn new<P: AsRef<Path>>(source_root: P) -> Self {
        RouxConfig {
            source_root: source_root.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Read a TOML config file. A missing file yields the defaults rooted at `source_root`.
    /// Relative `source_root`/`cache_dir` values are resolved against the file's directory.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, RouxError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read config from: {:?}", path);
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults rooted at {:?}", base);
            return Ok(RouxConfig::new(base));
        }
        let content = read_to_string(path)?;
        let mut config: RouxConfig = toml::from_str(&content)?;
        if config.source_root.is_relative() {
            config.source_root = base.join(&config.source_root);
        }
        if let Some(cache_dir) = config.cache_dir.as_mut() {
            if cache_dir.is_relative() {
                *cache_dir = base.join(&*cache_dir);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RouxError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(RouxError::Config(format!(
                "fuzzy_threshold must be within [0, 1], got {}",
                self.fuzzy_threshold
            )));
        }
        if self.watch_channel_capacity == 0 {
            return Err(RouxError::Config(
                "watch_channel_capacity must be positive".to_string(),
            ));
        }
        if self.default_link_extension.is_empty() || self.default_link_extension.contains('.') {
            return Err(RouxError::Config(format!(
                "default_link_extension must be a bare extension, got '{}'",
                self.default_link_extension
            )));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.source_root.join(CACHE_DIR_NAME))
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir().join(CACHE_DB_NAME)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
