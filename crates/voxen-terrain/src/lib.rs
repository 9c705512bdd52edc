//! In-memory voxel terrain: type registry, packed block values, and
//! lock-guarded regions.

pub mod column;
pub mod error;
pub mod lock;
pub mod packed;
pub mod region;
pub mod registry;
pub mod terrain;

pub use column::ColumnBuffer;
pub use error::TerrainError;
pub use lock::{TerrainGuard, TerrainLock};
pub use packed::{Block, PackedBlock};
pub use region::{Change, MutableTerrain, Region, RegionData, RegionGuard, RegionPos};
pub use registry::{DataFlag, VoxelDescriptor, VoxelRegistry, VoxelType};
pub use terrain::{lock_ordered, Terrain};
