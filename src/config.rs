use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::facade::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct FollowGraphConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub list_ttl_secs: u64,
    pub counter_ttl_secs: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub scan_page_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let settings = CacheSettings::default();
        Self {
            list_ttl_secs: settings.list_ttl.as_secs(),
            counter_ttl_secs: settings.counter_ttl.as_secs(),
            batch_size: settings.batch_size,
            batch_pause_ms: settings.batch_pause.as_millis() as u64,
            scan_page_size: settings.scan_page_size,
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            list_ttl: Duration::from_secs(self.list_ttl_secs),
            counter_ttl: Duration::from_secs(self.counter_ttl_secs),
            batch_size: self.batch_size,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
            scan_page_size: self.scan_page_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub default_page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl FollowGraphConfig {
    /// Store path from the config, falling back to the default under `base`.
    pub fn database_path_in(&self, base: &Path) -> PathBuf {
        self.store
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_database_path_in(base))
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("followgraph.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".followgraph").join("followgraph.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<FollowGraphConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: FollowGraphConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &FollowGraphConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
