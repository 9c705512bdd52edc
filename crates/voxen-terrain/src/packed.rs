//! Packed 64-bit block values.
//!
//! A block is stored as one `u64`: the low word holds the voxel type id and the
//! high word holds auxiliary data (orientation, growth stage, sub-variant).
//! A low word with every bit set is the reserved "absent" sentinel.

use std::fmt;

/// Type id reserved for the absent sentinel.
pub const SENTINEL: u32 = u32::MAX;

/// Raw sentinel value (`-1` as a signed 64-bit integer).
pub const ABSENT: u64 = u64::MAX;

/// Pack a type id and data word into one value.
#[inline]
pub const fn encode(type_id: u32, data: u32) -> u64 {
    ((data as u64) << 32) | type_id as u64
}

/// Type id stored in the low word.
#[inline]
pub const fn decode_type(value: u64) -> u32 {
    value as u32
}

/// Data stored in the high word.
///
/// # Panics
///
/// Panics if `value` is absent. Data attached to the sentinel is meaningless and
/// reading it usually means terrain state was corrupted upstream.
#[inline]
pub fn decode_data(value: u64) -> u32 {
    assert!(
        !is_absent(value),
        "decode_data called on absent block value {value:#018x}"
    );
    (value >> 32) as u32
}

/// Whether `value` is the absent sentinel.
#[inline]
pub const fn is_absent(value: u64) -> bool {
    decode_type(value) == SENTINEL
}

/// A concrete block: type id plus data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    pub type_id: u32,
    pub data: u32,
}

impl Block {
    pub const fn new(type_id: u32, data: u32) -> Self {
        Self { type_id, data }
    }
}

/// Dense block value as stored in regions.
///
/// Use [`PackedBlock::block`] to get the tagged form at API boundaries.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PackedBlock(u64);

impl PackedBlock {
    pub const ABSENT: Self = Self(ABSENT);
    pub const AIR: Self = Self(encode(0, 0));

    #[inline]
    pub const fn new(type_id: u32, data: u32) -> Self {
        Self(encode(type_id, data))
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn type_id(self) -> u32 {
        decode_type(self.0)
    }

    /// See [`decode_data`].
    #[inline]
    pub fn data(self) -> u32 {
        decode_data(self.0)
    }

    #[inline]
    pub const fn is_absent(self) -> bool {
        is_absent(self.0)
    }

    /// `None` for the sentinel, otherwise the decoded block.
    pub fn block(self) -> Option<Block> {
        if self.is_absent() {
            None
        } else {
            Some(Block::new(self.type_id(), (self.0 >> 32) as u32))
        }
    }
}

impl From<Block> for PackedBlock {
    fn from(block: Block) -> Self {
        Self::new(block.type_id, block.data)
    }
}

impl From<Option<Block>> for PackedBlock {
    fn from(block: Option<Block>) -> Self {
        block.map_or(Self::ABSENT, Self::from)
    }
}

impl fmt::Debug for PackedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block() {
            Some(b) => write!(f, "PackedBlock({}:{})", b.type_id, b.data),
            None => f.write_str("PackedBlock(absent)"),
        }
    }
}
