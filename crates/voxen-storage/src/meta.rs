//! World metadata shared by every backend.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::source::{PluginReference, ServerContext};

/// Current on-disk layout version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub format_version: u32,
    pub seed: i64,
    pub plugins: Vec<PluginReference>,
    /// Unix seconds.
    pub created_at: u64,
    /// Voxel type names by id, recorded on first open.
    #[serde(default)]
    pub palette: Vec<String>,
}

impl WorldMeta {
    pub fn new(seed: i64, plugins: &[PluginReference]) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            seed,
            plugins: plugins.to_vec(),
            created_at: unix_timestamp(),
            palette: Vec::new(),
        }
    }

    /// Decide whether `init(seed, ..)` may run against this existing world.
    pub fn check_reinit(&self, seed: i64, plugins: &[PluginReference]) -> Result<()> {
        if self.seed != seed {
            return Err(StorageError::init(format!(
                "world already initialized with seed {}, refusing seed {seed}",
                self.seed
            )));
        }
        if self.plugins.as_slice() != plugins {
            warn!("re-init with a different plugin list ignored; keeping the recorded one");
        }
        info!("world already initialized with seed {seed}; init is a no-op");
        Ok(())
    }

    /// Check the stored world against the running server.
    ///
    /// Every plugin recorded at creation must be present in `available`
    /// (version changes only warn). The registry must extend the recorded
    /// palette without renumbering it. Returns the palette to store when it
    /// is missing or was extended.
    pub fn validate(
        &self,
        ctx: &ServerContext,
        available: &[PluginReference],
    ) -> Result<Option<Vec<String>>> {
        if self.format_version > FORMAT_VERSION {
            return Err(StorageError::open(format!(
                "world format version {} is newer than supported {FORMAT_VERSION}",
                self.format_version
            )));
        }

        for plugin in &self.plugins {
            match available.iter().find(|p| p.id == plugin.id) {
                None => {
                    return Err(StorageError::open(format!(
                        "world requires plugin {} {} which is not loaded",
                        plugin.id, plugin.version
                    )))
                }
                Some(p) if p.version != plugin.version => warn!(
                    "plugin {} was {} at world creation, now {}",
                    plugin.id, plugin.version, p.version
                ),
                Some(_) => {}
            }
        }

        let names = ctx.registry.names();
        if names.len() < self.palette.len() {
            return Err(StorageError::open(format!(
                "world knows {} voxel types but only {} are registered",
                self.palette.len(),
                names.len()
            )));
        }
        if let Some((id, (stored, current))) = self
            .palette
            .iter()
            .zip(&names)
            .enumerate()
            .find(|(_, (a, b))| a != b)
        {
            return Err(StorageError::open(format!(
                "voxel id {id} is {stored} in this world but {current} in the registry"
            )));
        }

        Ok((names.len() != self.palette.len()).then_some(names))
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
