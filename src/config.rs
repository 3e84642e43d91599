use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Schema property overriding the barrier timeout, in millis.
pub const TTL_PROPERTY: &str = "xapi.schema.index.ttl";
/// Environment variable overriding the barrier timeout, in millis.
pub const TTL_ENV: &str = "XAPI_SCHEMA_INDEX_TTL";
/// Schema property overriding the index location.
pub const INDEX_PATH_PROPERTY: &str = "xapi.index.path";

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexerConfig {
    pub index_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub strict: bool,
    /// Free-form schema properties (`live_*`, publish patterns, ...)
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("xindex.toml")
}

pub fn default_index_dir_in(root: &Path) -> PathBuf {
    root.join("build").join("xindex")
}

pub fn load_config(path: Option<&Path>) -> Result<IndexerConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(IndexerConfig::default());
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: IndexerConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Effective settings for one indexing run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub index_dir: PathBuf,
    pub workers: usize,
    pub timeout: Duration,
    pub strict: bool,
    pub properties: BTreeMap<String, String>,
}

impl Settings {
    /// Resolve against the process environment.
    pub fn resolve(config: &IndexerConfig, root_dir: &Path) -> Result<Self> {
        Self::resolve_with_env(config, root_dir, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    ///
    /// Timeout precedence: `xapi.schema.index.ttl` property, then
    /// `XAPI_SCHEMA_INDEX_TTL`, then `timeout_ms`, then 60s.
    pub fn resolve_with_env(
        config: &IndexerConfig,
        root_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let properties = config.properties.clone();

        let timeout_ms = if let Some(value) = non_empty(properties.get(TTL_PROPERTY).cloned()) {
            parse_millis(&value, TTL_PROPERTY)?
        } else if let Some(value) = non_empty(env(TTL_ENV)) {
            parse_millis(&value, TTL_ENV)?
        } else {
            config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
        };

        let index_dir = non_empty(properties.get(INDEX_PATH_PROPERTY).cloned())
            .map(PathBuf::from)
            .or_else(|| config.index_dir.clone())
            .unwrap_or_else(|| default_index_dir_in(root_dir));
        let index_dir = if index_dir.is_relative() {
            root_dir.join(index_dir)
        } else {
            index_dir
        };

        Ok(Self {
            index_dir,
            workers: config.workers.filter(|w| *w > 0).unwrap_or(DEFAULT_WORKERS),
            timeout: Duration::from_millis(timeout_ms),
            strict: config.strict,
            properties,
        })
    }

    /// Defaults rooted at `index_dir`, for embedding and tests.
    pub fn with_index_dir(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            workers: DEFAULT_WORKERS,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            strict: false,
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_millis(value: &str, source: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| {
        Error::Resolution(format!(
            "{} must be a number of milliseconds, got '{}'",
            source, value
        ))
    })
}
