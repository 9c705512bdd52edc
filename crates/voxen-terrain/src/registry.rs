//! Voxel type registry mapping small integer ids to type descriptors.
//!
//! Ids are handed out in registration order starting at 0 (`air`) and are never
//! reused. The registry is built once while content loads and is then shared
//! immutably behind an `Arc`.

use std::collections::HashMap;

use tracing::debug;

use crate::error::TerrainError;
use crate::packed::{PackedBlock, SENTINEL};

/// Name of the built-in empty voxel type.
pub const AIR_NAME: &str = "core:air";

/// Id of the built-in empty voxel type.
pub const AIR_ID: u32 = 0;

/// A boolean property that may depend on the block's data word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFlag {
    Never,
    Always,
    /// Set when the given bit (0..32) of the data word is set.
    WhenBitSet(u8),
}

impl DataFlag {
    #[inline]
    pub fn test(self, data: u32) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::WhenBitSet(bit) => bit < 32 && data & (1 << bit) != 0,
        }
    }
}

impl From<bool> for DataFlag {
    fn from(value: bool) -> Self {
        if value {
            Self::Always
        } else {
            Self::Never
        }
    }
}

/// Input to [`VoxelRegistry::register`].
#[derive(Debug, Clone)]
pub struct VoxelDescriptor {
    /// Namespaced identifier, e.g. `"core:stone"`.
    pub name: String,
    /// Light units emitted.
    pub light_emit: i8,
    /// Light attenuation when passing through.
    pub light_through: i8,
    pub solid: DataFlag,
    pub transparent: DataFlag,
    /// Whether placing this type should schedule a follow-up tile update.
    pub causes_tile_update: bool,
}

impl VoxelDescriptor {
    /// A solid, opaque, non-emitting type.
    pub fn solid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            light_emit: 0,
            light_through: 15,
            solid: DataFlag::Always,
            transparent: DataFlag::Never,
            causes_tile_update: false,
        }
    }

    pub fn with_light(mut self, emit: i8, through: i8) -> Self {
        self.light_emit = emit;
        self.light_through = through;
        self
    }

    pub fn with_solid(mut self, flag: impl Into<DataFlag>) -> Self {
        self.solid = flag.into();
        self
    }

    pub fn with_transparent(mut self, flag: impl Into<DataFlag>) -> Self {
        self.transparent = flag.into();
        self
    }

    pub fn with_tile_update(mut self, enabled: bool) -> Self {
        self.causes_tile_update = enabled;
        self
    }
}

/// A registered voxel type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelType {
    pub id: u32,
    pub name: String,
    pub light_emit: i8,
    pub light_through: i8,
    pub solid: DataFlag,
    pub transparent: DataFlag,
    pub causes_tile_update: bool,
}

impl VoxelType {
    fn from_descriptor(id: u32, desc: VoxelDescriptor) -> Self {
        Self {
            id,
            name: desc.name,
            light_emit: desc.light_emit,
            light_through: desc.light_through,
            solid: desc.solid,
            transparent: desc.transparent,
            causes_tile_update: desc.causes_tile_update,
        }
    }

    pub fn is_solid(&self, data: u32) -> bool {
        self.solid.test(data)
    }

    pub fn is_transparent(&self, data: u32) -> bool {
        self.transparent.test(data)
    }

    pub fn is_air(&self) -> bool {
        self.id == AIR_ID
    }
}

/// Registry of voxel types for one world.
pub struct VoxelRegistry {
    types: Vec<VoxelType>,
    by_name: HashMap<String, u32>,
    default_id: u32,
}

impl Default for VoxelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VoxelRegistry {
    /// Create a registry containing only `air`.
    pub fn new() -> Self {
        let air = VoxelType {
            id: AIR_ID,
            name: AIR_NAME.to_string(),
            light_emit: 0,
            light_through: 0,
            solid: DataFlag::Never,
            transparent: DataFlag::Always,
            causes_tile_update: false,
        };
        let mut by_name = HashMap::new();
        by_name.insert(air.name.clone(), AIR_ID);
        Self {
            types: vec![air],
            by_name,
            default_id: AIR_ID,
        }
    }

    /// Register a new type and return its id.
    pub fn register(&mut self, desc: VoxelDescriptor) -> Result<u32, TerrainError> {
        if self.by_name.contains_key(&desc.name) {
            return Err(TerrainError::DuplicateName(desc.name));
        }
        let id = u32::try_from(self.types.len()).map_err(|_| TerrainError::RegistryFull)?;
        if id == SENTINEL {
            return Err(TerrainError::RegistryFull);
        }
        debug!("registered voxel type {} as {id}", desc.name);
        self.by_name.insert(desc.name.clone(), id);
        self.types.push(VoxelType::from_descriptor(id, desc));
        Ok(id)
    }

    pub fn lookup(&self, id: u32) -> Result<&VoxelType, TerrainError> {
        self.types
            .get(id as usize)
            .ok_or(TerrainError::UnknownTypeId(id))
    }

    pub fn by_name(&self, name: &str) -> Option<&VoxelType> {
        self.by_name.get(name).map(|&id| &self.types[id as usize])
    }

    /// Resolve the type of a packed block, mapping the sentinel to the default type.
    pub fn type_or_default(&self, block: PackedBlock) -> Result<&VoxelType, TerrainError> {
        if block.is_absent() {
            Ok(&self.types[self.default_id as usize])
        } else {
            self.lookup(block.type_id())
        }
    }

    /// Change the type absent blocks resolve to.
    pub fn set_default(&mut self, id: u32) -> Result<(), TerrainError> {
        self.lookup(id)?;
        self.default_id = id;
        Ok(())
    }

    pub fn default_type(&self) -> &VoxelType {
        &self.types[self.default_id as usize]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoxelType> {
        self.types.iter()
    }

    /// Type names in id order.
    pub fn names(&self) -> Vec<String> {
        self.types.iter().map(|t| t.name.clone()).collect()
    }
}
