use std::path::PathBuf;

use thiserror::Error;
use voxen_storage::StorageError;
use voxen_terrain::TerrainError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Terrain(#[from] TerrainError),

    #[error("region worker panicked")]
    WorkerPanicked,
}
