//! Terrain error types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TerrainError {
    #[error("unknown voxel type id: {0}")]
    UnknownTypeId(u32),

    #[error("voxel type already registered: {0}")]
    DuplicateName(String),

    #[error("voxel registry is full")]
    RegistryFull,
}
