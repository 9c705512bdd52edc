//! Backend-agnostic world storage contracts.
//!
//! A [`WorldSource`] is a handle to one world's storage location and backend
//! connection. Opening it yields a [`WorldFormat`], the read/write channel for
//! regions, entities and players. The format borrows the source mutably, so at
//! most one live format exists per source and the source cannot be closed
//! while it is in use.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use voxen_terrain::{RegionData, RegionPos, VoxelRegistry};

use crate::error::Result;
use crate::meta::WorldMeta;

/// Number of images in a panorama.
pub const PANORAMA_SIZE: usize = 6;

/// File extension of stored panorama images.
pub const PANORAMA_EXT: &str = "png";

/// A plugin active when the world was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginReference {
    pub id: String,
    pub version: String,
    /// Plugin file to copy into the world's `plugins` directory, for backends that do.
    #[serde(skip)]
    pub artifact: Option<PathBuf>,
}

impl PluginReference {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self
    }
}

impl PartialEq for PluginReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl Eq for PluginReference {}

/// Fixed-size sequence of world preview images (encoded image files).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panorama {
    images: Vec<Vec<u8>>,
}

impl Panorama {
    /// Returns `None` unless exactly [`PANORAMA_SIZE`] images are given.
    pub fn new(images: Vec<Vec<u8>>) -> Option<Self> {
        (images.len() == PANORAMA_SIZE).then_some(Self { images })
    }

    pub fn image(&self, index: usize) -> Option<&[u8]> {
        self.images.get(index).map(Vec::as_slice)
    }

    pub fn images(&self) -> &[Vec<u8>] {
        &self.images
    }

    /// File name of the image at `index`, e.g. `Panorama0.png`.
    pub fn file_name(index: usize) -> String {
        format!("Panorama{index}.{PANORAMA_EXT}")
    }
}

/// What the running server brings to `open`.
#[derive(Clone)]
pub struct ServerContext {
    pub registry: Arc<VoxelRegistry>,
    pub plugins: Vec<PluginReference>,
}

impl ServerContext {
    pub fn new(registry: Arc<VoxelRegistry>, plugins: Vec<PluginReference>) -> Self {
        Self { registry, plugins }
    }
}

/// Persisted player state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub position: [f64; 3],
    pub yaw: f32,
    pub pitch: f32,
    /// Opaque game data owned by higher layers.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Persisted entity, owned by the region it was saved with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub kind: String,
    pub position: [f64; 3],
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Lifecycle of one world's durable storage.
pub trait WorldSource: Send {
    /// Provider that created this source.
    fn config_id(&self) -> &'static str;

    /// Human-readable storage location (directory or URL).
    fn location(&self) -> String;

    /// Whether `init` has already run against this storage.
    fn initialized(&self) -> Result<bool>;

    /// Create the schema and record the seed and plugin set.
    ///
    /// Running it again with the same seed is a no-op. A different seed is a
    /// `StorageError::Init`; existing data is never overwritten.
    fn init(&mut self, seed: i64, plugins: &[PluginReference]) -> Result<()>;

    /// Store preview images. Backends without asset storage ignore the call.
    fn set_panorama(&mut self, panorama: &Panorama) -> Result<()>;

    /// Stored preview images, or `None` if absent or unsupported.
    fn panorama(&self) -> Result<Option<Panorama>>;

    /// Validate the stored world against `ctx` and return its read/write handle.
    fn open(&mut self, ctx: &ServerContext) -> Result<Box<dyn WorldFormat + '_>>;

    /// Release the backend connection. Fails if it was already released.
    fn close(&mut self) -> Result<()>;
}

/// Transactional access to an opened world. Every call is one backend
/// transaction: it either commits fully or leaves the store untouched.
pub trait WorldFormat: Send + Sync {
    /// Metadata read when the world was opened.
    fn meta(&self) -> &WorldMeta;

    fn load_region(&self, pos: RegionPos) -> Result<Option<RegionData>>;

    fn region_exists(&self, pos: RegionPos) -> Result<bool>;

    fn save_region(&self, pos: RegionPos, data: &RegionData) -> Result<()> {
        self.save_regions(&[(pos, data)])
    }

    /// Save several regions atomically.
    fn save_regions(&self, regions: &[(RegionPos, &RegionData)]) -> Result<()>;

    /// Delete a region and every entity saved with it. Returns whether it existed.
    fn delete_region(&self, pos: RegionPos) -> Result<bool>;

    fn load_entities(&self, region: RegionPos) -> Result<Vec<EntityRecord>>;

    /// Replace the entity set of a saved region.
    fn save_entities(&self, region: RegionPos, entities: &[EntityRecord]) -> Result<()>;

    fn load_player(&self, id: &str) -> Result<Option<PlayerRecord>>;

    fn save_player(&self, id: &str, record: &PlayerRecord) -> Result<()>;
}
