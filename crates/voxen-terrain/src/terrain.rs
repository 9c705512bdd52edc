//! Map of loaded regions.
//!
//! Regions are created when first loaded and dropped when evicted. Operations
//! that must touch several regions at once lock them through
//! [`lock_ordered`], which always acquires in ascending [`RegionPos`] order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::packed::PackedBlock;
use crate::region::{Region, RegionData, RegionGuard, RegionPos, REGION_HEIGHT, REGION_WIDTH};
use crate::registry::VoxelRegistry;

pub struct Terrain {
    registry: Arc<VoxelRegistry>,
    regions: RwLock<HashMap<RegionPos, Arc<Region>>>,
}

impl Terrain {
    pub fn new(registry: Arc<VoxelRegistry>) -> Self {
        Self {
            registry,
            regions: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<VoxelRegistry> {
        &self.registry
    }

    pub fn region(&self, pos: RegionPos) -> Option<Arc<Region>> {
        self.regions.read().get(&pos).cloned()
    }

    /// Return the loaded region or insert a fresh air region.
    pub fn get_or_create(&self, pos: RegionPos) -> Arc<Region> {
        if let Some(region) = self.region(pos) {
            return region;
        }
        let mut regions = self.regions.write();
        Arc::clone(regions.entry(pos).or_insert_with(|| {
            debug!("created region ({}, {})", pos.x, pos.z);
            Arc::new(Region::new(pos, Arc::clone(&self.registry)))
        }))
    }

    /// Insert a region restored from storage. An already loaded region wins.
    pub fn insert_loaded(&self, pos: RegionPos, data: RegionData) -> Arc<Region> {
        let mut regions = self.regions.write();
        Arc::clone(regions.entry(pos).or_insert_with(|| {
            Arc::new(Region::from_data(pos, Arc::clone(&self.registry), data))
        }))
    }

    /// Drop a region from the map. Holders of its `Arc` keep it alive.
    pub fn evict(&self, pos: RegionPos) -> Option<Arc<Region>> {
        let evicted = self.regions.write().remove(&pos);
        if evicted.is_some() {
            debug!("evicted region ({}, {})", pos.x, pos.z);
        }
        evicted
    }

    pub fn loaded(&self) -> Vec<RegionPos> {
        let mut positions: Vec<_> = self.regions.read().keys().copied().collect();
        positions.sort_unstable();
        positions
    }

    pub fn dirty_regions(&self) -> Vec<Arc<Region>> {
        let mut dirty: Vec<_> = self
            .regions
            .read()
            .values()
            .filter(|r| r.is_dirty())
            .cloned()
            .collect();
        dirty.sort_unstable_by_key(|r| r.pos());
        dirty
    }

    /// Unlocked single-voxel read in world coordinates. Returns the sentinel for
    /// unloaded regions and heights outside the column.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> PackedBlock {
        if !(0..REGION_HEIGHT as i32).contains(&y) {
            return PackedBlock::ABSENT;
        }
        let pos = RegionPos::containing(x, z);
        let w = REGION_WIDTH as i32;
        match self.region(pos) {
            Some(region) => region.get(
                x.rem_euclid(w) as usize,
                y as usize,
                z.rem_euclid(w) as usize,
            ),
            None => PackedBlock::ABSENT,
        }
    }
}

/// Lock several regions in ascending position order. The same region passed
/// twice is locked once; distinct regions sharing a position (one evicted and
/// recreated) are both locked, ordered by address.
/// The returned guards are sorted by position.
pub fn lock_ordered(regions: &[Arc<Region>]) -> Vec<RegionGuard<'_>> {
    let mut sorted: Vec<&Arc<Region>> = regions.iter().collect();
    sorted.sort_unstable_by_key(|r| (r.pos(), Arc::as_ptr(r) as usize));
    sorted.dedup_by(|a, b| Arc::ptr_eq(a, b));
    sorted.into_iter().map(|r| r.lock()).collect()
}
