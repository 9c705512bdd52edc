//! Terrain regions and the mutable terrain interface.
//!
//! A region is a 16x256x16 column of packed block values and is the unit of
//! locking and persistence. Cells are stored in XZY order:
//! `(x * 16 + z) * 256 + y`. Each cell is an `AtomicU64`, so a single voxel can
//! be read without the lock and is never torn; every write and every read that
//! must be consistent across several voxels goes through a [`RegionGuard`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::column::ColumnBuffer;
use crate::error::TerrainError;
use crate::lock::{TerrainGuard, TerrainLock};
use crate::packed::{self, PackedBlock};
use crate::registry::{VoxelRegistry, VoxelType};

/// Horizontal edge length of a region.
pub const REGION_WIDTH: usize = 16;

/// Vertical extent of a region.
pub const REGION_HEIGHT: usize = 256;

/// Number of voxels in a region.
pub const REGION_VOLUME: usize = REGION_WIDTH * REGION_WIDTH * REGION_HEIGHT;

/// Region coordinates in units of regions.
///
/// The derived ordering (by `x`, then `z`) is the lock acquisition order for
/// operations spanning several regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Region containing the given world column.
    pub fn containing(world_x: i32, world_z: i32) -> Self {
        let w = REGION_WIDTH as i32;
        Self::new(world_x.div_euclid(w), world_z.div_euclid(w))
    }

    /// World coordinates of the region's minimum corner column.
    pub fn origin(self) -> (i32, i32) {
        let w = REGION_WIDTH as i32;
        (self.x * w, self.z * w)
    }
}

/// Cell index for local coordinates.
///
/// # Panics
///
/// Panics if a coordinate lies outside the region. An out-of-range write
/// would otherwise land in a neighbouring column.
#[inline]
pub fn cell_index(x: usize, y: usize, z: usize) -> usize {
    assert!(
        x < REGION_WIDTH && y < REGION_HEIGHT && z < REGION_WIDTH,
        "voxel ({x}, {y}, {z}) is outside the region"
    );
    (x * REGION_WIDTH + z) * REGION_HEIGHT + y
}

/// Owned copy of a region's cells, used for persistence.
#[derive(Clone, PartialEq, Eq)]
pub struct RegionData {
    cells: Box<[u64]>,
}

impl RegionData {
    pub fn filled(block: PackedBlock) -> Self {
        Self {
            cells: vec![block.to_raw(); REGION_VOLUME].into_boxed_slice(),
        }
    }

    /// Wrap raw cells. Returns `None` unless exactly `REGION_VOLUME` values are given.
    pub fn from_raw(cells: Vec<u64>) -> Option<Self> {
        (cells.len() == REGION_VOLUME).then(|| Self {
            cells: cells.into_boxed_slice(),
        })
    }

    pub fn as_raw(&self) -> &[u64] {
        &self.cells
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> PackedBlock {
        PackedBlock::from_raw(self.cells[cell_index(x, y, z)])
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, block: PackedBlock) {
        self.cells[cell_index(x, y, z)] = block.to_raw();
    }
}

impl std::fmt::Debug for RegionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionData")
            .field("cells", &self.cells.len())
            .finish()
    }
}

/// Outcome of a single voxel write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub previous: PackedBlock,
    /// The written type asks for a follow-up tile update. Nothing is scheduled here.
    pub tile_update: bool,
}

/// Write operations available while a region is locked.
pub trait MutableTerrain {
    /// Replace the type, keeping the data word. An absent voxel gets data `0`.
    fn set_type(&self, x: usize, y: usize, z: usize, type_id: u32)
        -> Result<Change, TerrainError>;

    /// Replace the data word, keeping the type.
    ///
    /// # Panics
    ///
    /// Panics if the voxel is absent.
    fn set_data(&self, x: usize, y: usize, z: usize, data: u32) -> Result<Change, TerrainError>;

    /// Replace type and data in one store.
    fn set_type_data(
        &self,
        x: usize,
        y: usize,
        z: usize,
        type_id: u32,
        data: u32,
    ) -> Result<Change, TerrainError>;

    /// Decode `raw` and write it with [`MutableTerrain::set_type_data`].
    /// The sentinel clears the voxel to absent.
    fn block(&self, x: usize, y: usize, z: usize, raw: u64) -> Result<Change, TerrainError>;
}

/// An in-memory terrain region with its own lock.
pub struct Region {
    pos: RegionPos,
    lock: TerrainLock,
    cells: Box<[AtomicU64]>,
    dirty: AtomicBool,
    registry: Arc<VoxelRegistry>,
}

impl Region {
    /// A region filled with air.
    pub fn new(pos: RegionPos, registry: Arc<VoxelRegistry>) -> Self {
        Self::from_data(pos, registry, RegionData::filled(PackedBlock::AIR))
    }

    /// A region restored from persisted cells. Starts clean.
    pub fn from_data(pos: RegionPos, registry: Arc<VoxelRegistry>, data: RegionData) -> Self {
        let cells = data
            .cells
            .iter()
            .map(|&raw| AtomicU64::new(raw))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            pos,
            lock: TerrainLock::new(),
            cells,
            dirty: AtomicBool::new(false),
            registry,
        }
    }

    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    pub fn registry(&self) -> &Arc<VoxelRegistry> {
        &self.registry
    }

    /// Block until the region is exclusively held by this thread.
    pub fn lock(&self) -> RegionGuard<'_> {
        RegionGuard {
            region: self,
            guard: self.lock.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<RegionGuard<'_>> {
        self.lock.try_lock().map(|guard| RegionGuard {
            region: self,
            guard,
        })
    }

    pub fn locked(&self) -> bool {
        self.lock.locked()
    }

    /// Read one voxel without locking.
    pub fn get(&self, x: usize, y: usize, z: usize) -> PackedBlock {
        PackedBlock::from_raw(self.cells[cell_index(x, y, z)].load(Ordering::Relaxed))
    }

    /// Whether the region changed since it was loaded or last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Flag the region for saving again, e.g. after a failed write.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

/// Exclusive access to a [`Region`]. Dropping it unlocks the region.
pub struct RegionGuard<'a> {
    region: &'a Region,
    guard: TerrainGuard<'a>,
}

impl<'a> RegionGuard<'a> {
    pub fn region(&self) -> &'a Region {
        self.region
    }

    pub fn pos(&self) -> RegionPos {
        self.region.pos
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> PackedBlock {
        self.region.get(x, y, z)
    }

    /// Type metadata for the voxel, with absent voxels resolved to the registry default.
    pub fn type_at(&self, x: usize, y: usize, z: usize) -> Result<&'a VoxelType, TerrainError> {
        self.region.registry.type_or_default(self.get(x, y, z))
    }

    /// Copy one column into a caller-owned buffer.
    pub fn read_column(&self, x: usize, z: usize, buf: &mut ColumnBuffer) {
        let base = cell_index(x, 0, z);
        for (y, slot) in buf.as_mut_slice().iter_mut().enumerate() {
            *slot = PackedBlock::from_raw(self.region.cells[base + y].load(Ordering::Relaxed));
        }
    }

    /// Write a whole column from a buffer. Every non-absent type is validated
    /// before anything is stored, so an unknown id leaves the column untouched.
    /// Returns how many written voxels ask for a tile update.
    pub fn write_column(
        &self,
        x: usize,
        z: usize,
        buf: &ColumnBuffer,
    ) -> Result<usize, TerrainError> {
        let registry = &self.region.registry;
        let mut updates = 0;
        for block in buf.as_slice().iter().filter(|b| !b.is_absent()) {
            if registry.lookup(block.type_id())?.causes_tile_update {
                updates += 1;
            }
        }
        let base = cell_index(x, 0, z);
        for (y, block) in buf.as_slice().iter().enumerate() {
            self.store(base + y, *block);
        }
        Ok(updates)
    }

    /// Set every voxel to `block`.
    pub fn fill(&self, block: PackedBlock) -> Result<(), TerrainError> {
        if !block.is_absent() {
            self.region.registry.lookup(block.type_id())?;
        }
        for idx in 0..REGION_VOLUME {
            self.store(idx, block);
        }
        Ok(())
    }

    /// Consistent copy of every cell.
    pub fn snapshot(&self) -> RegionData {
        let cells = self
            .region
            .cells
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RegionData { cells }
    }

    /// Clear the dirty flag, typically right after [`RegionGuard::snapshot`].
    pub fn mark_clean(&self) {
        self.region.dirty.store(false, Ordering::Release);
    }

    /// Release the lock. Same as dropping the guard.
    pub fn unlock(self) {
        drop(self);
    }

    fn store(&self, idx: usize, block: PackedBlock) -> PackedBlock {
        debug_assert!(self.guard.guards(&self.region.lock));
        self.region.lock.assert_held();
        let previous = self.region.cells[idx].swap(block.to_raw(), Ordering::Relaxed);
        self.region.dirty.store(true, Ordering::Release);
        PackedBlock::from_raw(previous)
    }

    fn tile_update(&self, type_id: u32) -> Result<bool, TerrainError> {
        Ok(self.region.registry.lookup(type_id)?.causes_tile_update)
    }
}

impl MutableTerrain for RegionGuard<'_> {
    fn set_type(
        &self,
        x: usize,
        y: usize,
        z: usize,
        type_id: u32,
    ) -> Result<Change, TerrainError> {
        let tile_update = self.tile_update(type_id)?;
        let current = self.get(x, y, z);
        let data = current.block().map_or(0, |b| b.data);
        let previous = self.store(cell_index(x, y, z), PackedBlock::new(type_id, data));
        Ok(Change {
            previous,
            tile_update,
        })
    }

    fn set_data(&self, x: usize, y: usize, z: usize, data: u32) -> Result<Change, TerrainError> {
        let current = self.get(x, y, z);
        assert!(
            !current.is_absent(),
            "set_data on absent voxel at ({x}, {y}, {z}) in region {:?}",
            self.pos()
        );
        let tile_update = self.tile_update(current.type_id())?;
        let previous = self.store(
            cell_index(x, y, z),
            PackedBlock::new(current.type_id(), data),
        );
        Ok(Change {
            previous,
            tile_update,
        })
    }

    fn set_type_data(
        &self,
        x: usize,
        y: usize,
        z: usize,
        type_id: u32,
        data: u32,
    ) -> Result<Change, TerrainError> {
        let tile_update = self.tile_update(type_id)?;
        let previous = self.store(cell_index(x, y, z), PackedBlock::new(type_id, data));
        Ok(Change {
            previous,
            tile_update,
        })
    }

    fn block(&self, x: usize, y: usize, z: usize, raw: u64) -> Result<Change, TerrainError> {
        if packed::is_absent(raw) {
            let previous = self.store(cell_index(x, y, z), PackedBlock::ABSENT);
            return Ok(Change {
                previous,
                tile_update: false,
            });
        }
        self.set_type_data(x, y, z, packed::decode_type(raw), packed::decode_data(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VoxelDescriptor;
    use std::thread;

    struct Ids {
        stone: u32,
        sand: u32,
    }

    fn registry() -> (Arc<VoxelRegistry>, Ids) {
        let mut reg = VoxelRegistry::new();
        let stone = reg.register(VoxelDescriptor::solid("core:stone")).unwrap();
        let sand = reg
            .register(VoxelDescriptor::solid("core:sand").with_tile_update(true))
            .unwrap();
        (Arc::new(reg), Ids { stone, sand })
    }

    #[test]
    fn new_region_is_air_and_clean() {
        let (reg, _) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        assert_eq!(region.get(0, 0, 0), PackedBlock::AIR);
        assert_eq!(region.get(15, 255, 15), PackedBlock::AIR);
        assert!(!region.is_dirty());
        assert!(!region.locked());
    }

    #[test]
    fn xzy_ordering() {
        // (1*16 + 3)*256 + 2
        assert_eq!(cell_index(1, 2, 3), 4866);
        assert_eq!(cell_index(0, 0, 0), 0);
        assert_eq!(cell_index(15, 255, 15), REGION_VOLUME - 1);
    }

    #[test]
    #[should_panic(expected = "outside the region")]
    fn write_past_z_edge_panics() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let guard = region.lock();
        let _ = guard.set_type_data(0, 0, REGION_WIDTH, ids.stone, 7);
    }

    #[test]
    fn write_past_top_leaves_neighbours_untouched() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let attempt = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let guard = region.lock();
            let _ = guard.set_type_data(0, REGION_HEIGHT, 0, ids.stone, 9);
        }));
        assert!(attempt.is_err());
        assert_eq!(region.get(0, 0, 1), PackedBlock::AIR);
        assert!(!region.is_dirty());
        assert!(!region.locked());
    }

    #[test]
    #[should_panic(expected = "outside the region")]
    fn column_past_x_edge_panics() {
        let (reg, _) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let mut column = ColumnBuffer::new();
        region.lock().read_column(REGION_WIDTH, 0, &mut column);
    }

    #[test]
    fn set_type_preserves_data() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let guard = region.lock();
        guard.set_type_data(1, 2, 3, ids.stone, 9).unwrap();
        guard.set_type(1, 2, 3, ids.sand).unwrap();
        assert_eq!(guard.get(1, 2, 3), PackedBlock::new(ids.sand, 9));
        assert!(region.is_dirty());
    }

    #[test]
    fn set_data_preserves_type() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let guard = region.lock();
        guard.set_type(4, 5, 6, ids.stone).unwrap();
        let change = guard.set_data(4, 5, 6, 77).unwrap();
        assert_eq!(change.previous, PackedBlock::new(ids.stone, 0));
        assert_eq!(guard.get(4, 5, 6), PackedBlock::new(ids.stone, 77));
    }

    #[test]
    fn set_type_on_absent_starts_with_zero_data() {
        let (reg, ids) = registry();
        let region = Region::from_data(
            RegionPos::new(0, 0),
            reg,
            RegionData::filled(PackedBlock::ABSENT),
        );
        let guard = region.lock();
        guard.set_type(0, 0, 0, ids.stone).unwrap();
        assert_eq!(guard.get(0, 0, 0), PackedBlock::new(ids.stone, 0));
    }

    #[test]
    #[should_panic(expected = "absent voxel")]
    fn set_data_on_absent_panics() {
        let (reg, _) = registry();
        let region = Region::from_data(
            RegionPos::new(0, 0),
            reg,
            RegionData::filled(PackedBlock::ABSENT),
        );
        let guard = region.lock();
        let _ = guard.set_data(0, 0, 0, 1);
    }

    #[test]
    fn tile_update_flag_reported() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let guard = region.lock();
        assert!(!guard.set_type(0, 0, 0, ids.stone).unwrap().tile_update);
        assert!(guard.set_type(0, 1, 0, ids.sand).unwrap().tile_update);
    }

    #[test]
    fn unknown_type_rejected_without_write() {
        let (reg, _) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let guard = region.lock();
        let err = guard.set_type_data(0, 0, 0, 999, 1).unwrap_err();
        assert_eq!(err, TerrainError::UnknownTypeId(999));
        assert_eq!(guard.get(0, 0, 0), PackedBlock::AIR);
        assert!(!region.is_dirty());
    }

    #[test]
    fn raw_block_dispatch() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let guard = region.lock();
        guard
            .block(2, 2, 2, packed::encode(ids.stone, 5))
            .unwrap();
        assert_eq!(guard.get(2, 2, 2), PackedBlock::new(ids.stone, 5));

        let change = guard.block(2, 2, 2, packed::ABSENT).unwrap();
        assert_eq!(change.previous, PackedBlock::new(ids.stone, 5));
        assert!(guard.get(2, 2, 2).is_absent());
        assert_eq!(guard.type_at(2, 2, 2).unwrap().id, 0);
    }

    #[test]
    fn snapshot_and_restore() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(3, -2), Arc::clone(&reg));
        let data = {
            let guard = region.lock();
            guard.set_type_data(7, 100, 8, ids.stone, 3).unwrap();
            let data = guard.snapshot();
            guard.mark_clean();
            data
        };
        assert!(!region.is_dirty());

        let restored = Region::from_data(RegionPos::new(3, -2), reg, data);
        assert_eq!(restored.get(7, 100, 8), PackedBlock::new(ids.stone, 3));
        assert!(!restored.is_dirty());
    }

    #[test]
    fn region_data_size_checked() {
        assert!(RegionData::from_raw(vec![0; 10]).is_none());
        assert!(RegionData::from_raw(vec![0; REGION_VOLUME]).is_some());
    }

    #[test]
    fn column_round_trip_via_buffer() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let mut buf = ColumnBuffer::new();
        buf.fill(PackedBlock::AIR);
        for y in 0..4 {
            buf.set(y, PackedBlock::new(ids.stone, 0));
        }
        buf.set(4, PackedBlock::new(ids.sand, 0));

        let guard = region.lock();
        assert_eq!(guard.write_column(3, 4, &buf).unwrap(), 1);

        let mut out = ColumnBuffer::new();
        guard.read_column(3, 4, &mut out);
        assert_eq!(out.as_slice(), buf.as_slice());
        assert_eq!(guard.get(3, 0, 4), PackedBlock::new(ids.stone, 0));
        assert_eq!(guard.get(3, 5, 4), PackedBlock::AIR);
    }

    #[test]
    fn write_column_validates_first() {
        let (reg, ids) = registry();
        let region = Region::new(RegionPos::new(0, 0), reg);
        let mut buf = ColumnBuffer::new();
        buf.set(0, PackedBlock::new(ids.stone, 0));
        buf.set(10, PackedBlock::new(4242, 0));
        let guard = region.lock();
        assert!(guard.write_column(0, 0, &buf).is_err());
        assert_eq!(guard.get(0, 0, 0), PackedBlock::AIR);
    }

    #[test]
    fn concurrent_writers_same_region_no_lost_updates() {
        let (reg, ids) = registry();
        let region = Arc::new(Region::new(RegionPos::new(0, 0), reg));
        {
            let g = region.lock();
            g.set_type_data(0, 0, 0, ids.stone, 0).unwrap();
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    for _ in 0..250 {
                        let guard = region.lock();
                        let data = guard.get(0, 0, 0).data();
                        guard.set_data(0, 0, 0, data + 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(region.get(0, 0, 0), PackedBlock::new(ids.stone, 1000));
    }
}
