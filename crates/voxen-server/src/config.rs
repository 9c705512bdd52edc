use std::path::{Path, PathBuf};

use serde::Deserialize;
use voxen_storage::{PluginReference, StorageConfig};

use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub world: WorldSection,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub workers: WorkersSection,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WorldSection {
    pub name: String,
    pub seed: i64,
    /// Regions loaded around the origin at startup, as a square radius.
    #[serde(default = "default_spawn_radius")]
    pub spawn_radius: u32,
    /// Auto-save interval in seconds. 0 = disabled. Default: 300 (5 minutes).
    #[serde(default = "default_auto_save_interval")]
    pub auto_save_interval: u64,
}

/// Largest accepted `spawn_radius`; the spawn square is `(2r + 1)^2` regions.
pub const MAX_SPAWN_RADIUS: u32 = 64;

fn default_spawn_radius() -> u32 {
    1
}

fn default_auto_save_interval() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkersSection {
    #[serde(default = "default_worker_threads")]
    pub threads: usize,
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            threads: default_worker_threads(),
        }
    }
}

/// A `[[plugins]]` entry. `artifact` is copied into the world by backends
/// that keep plugin files.
#[derive(Debug, Deserialize)]
pub struct PluginEntry {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub artifact: Option<PathBuf>,
}

impl PluginEntry {
    pub fn to_reference(&self) -> PluginReference {
        let plugin = PluginReference::new(&self.id, &self.version);
        match &self.artifact {
            Some(path) => plugin.with_artifact(path),
            None => plugin,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.world.spawn_radius > MAX_SPAWN_RADIUS {
            return Err(ServerError::InvalidConfig(format!(
                "spawn_radius {} exceeds the maximum of {MAX_SPAWN_RADIUS}",
                self.world.spawn_radius
            )));
        }
        Ok(())
    }

    pub fn plugin_references(&self) -> Vec<PluginReference> {
        self.plugins.iter().map(PluginEntry::to_reference).collect()
    }
}
