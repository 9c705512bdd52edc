//! Flat world region generator.
//!
//! Every column gets the same layers:
//! - Y = 0: Bedrock
//! - Y = 1-2: Dirt
//! - Y = 3: Grass
//! - Y = 4+: Air

use voxen_terrain::region::REGION_WIDTH;
use voxen_terrain::{
    ColumnBuffer, DataFlag, PackedBlock, RegionGuard, TerrainError, VoxelDescriptor,
    VoxelRegistry,
};

/// Packed values of the blocks placed by the flat generator.
#[derive(Debug, Clone, Copy)]
pub struct FlatBlocks {
    pub bedrock: PackedBlock,
    pub dirt: PackedBlock,
    pub grass: PackedBlock,
}

/// Register the voxel types the server itself places.
pub fn register_content(registry: &mut VoxelRegistry) -> Result<FlatBlocks, TerrainError> {
    let bedrock = registry.register(VoxelDescriptor::solid("core:bedrock"))?;
    let dirt = registry.register(VoxelDescriptor::solid("core:dirt"))?;
    // Grass spreads, and the snowy variant (data bit 0) lets light through.
    let grass = registry.register(
        VoxelDescriptor::solid("core:grass")
            .with_transparent(DataFlag::WhenBitSet(0))
            .with_tile_update(true),
    )?;
    Ok(FlatBlocks {
        bedrock: PackedBlock::new(bedrock, 0),
        dirt: PackedBlock::new(dirt, 0),
        grass: PackedBlock::new(grass, 0),
    })
}

/// Fill the buffer with one flat column.
pub fn flat_column(blocks: &FlatBlocks, column: &mut ColumnBuffer) {
    column.fill(PackedBlock::AIR);
    column.set(0, blocks.bedrock);
    column.fill_range(1..3, blocks.dirt);
    column.set(3, blocks.grass);
}

/// Write flat terrain into a locked region, reusing `column` for every column.
/// Returns how many written voxels ask for a tile update.
pub fn generate_region(
    guard: &RegionGuard<'_>,
    blocks: &FlatBlocks,
    column: &mut ColumnBuffer,
) -> Result<usize, TerrainError> {
    flat_column(blocks, column);
    let mut updates = 0;
    for x in 0..REGION_WIDTH {
        for z in 0..REGION_WIDTH {
            updates += guard.write_column(x, z, column)?;
        }
    }
    Ok(updates)
}
