//! Caller-owned scratch buffer holding one region column.
//!
//! Generation tasks keep one buffer and reuse it for every column they touch
//! instead of allocating per call.

use crate::packed::PackedBlock;
use crate::region::REGION_HEIGHT;

pub struct ColumnBuffer {
    cells: Box<[PackedBlock]>,
}

impl Default for ColumnBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnBuffer {
    /// A buffer of `REGION_HEIGHT` air voxels.
    pub fn new() -> Self {
        Self {
            cells: vec![PackedBlock::AIR; REGION_HEIGHT].into_boxed_slice(),
        }
    }

    pub fn fill(&mut self, block: PackedBlock) {
        self.cells.fill(block);
    }

    /// Fill `y_range` with `block`, clamped to the column height.
    pub fn fill_range(&mut self, y_range: std::ops::Range<usize>, block: PackedBlock) {
        let end = y_range.end.min(REGION_HEIGHT);
        let start = y_range.start.min(end);
        self.cells[start..end].fill(block);
    }

    pub fn get(&self, y: usize) -> PackedBlock {
        self.cells[y]
    }

    pub fn set(&mut self, y: usize, block: PackedBlock) {
        self.cells[y] = block;
    }

    pub fn as_slice(&self) -> &[PackedBlock] {
        &self.cells
    }

    pub fn as_mut_slice(&mut self) -> &mut [PackedBlock] {
        &mut self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_to_region_height() {
        let buf = ColumnBuffer::new();
        assert_eq!(buf.as_slice().len(), REGION_HEIGHT);
        assert!(buf.as_slice().iter().all(|b| *b == PackedBlock::AIR));
    }

    #[test]
    fn fill_range_clamps() {
        let mut buf = ColumnBuffer::new();
        let stone = PackedBlock::new(1, 0);
        buf.fill_range(250..400, stone);
        assert_eq!(buf.get(249), PackedBlock::AIR);
        assert_eq!(buf.get(250), stone);
        assert_eq!(buf.get(REGION_HEIGHT - 1), stone);
        buf.fill_range(300..310, PackedBlock::ABSENT);
        assert_eq!(buf.get(REGION_HEIGHT - 1), stone);
    }

    #[test]
    fn reuse_across_columns() {
        let mut buf = ColumnBuffer::new();
        buf.set(0, PackedBlock::new(2, 1));
        buf.fill(PackedBlock::ABSENT);
        assert!(buf.get(0).is_absent());
    }
}
