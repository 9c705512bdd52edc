//! Platform-native backend on LevelDB.
//!
//! Reduced feature set: no panorama storage and a fixed, bundled plugin set.
//! `rusty_leveldb::DB` is not thread-safe, so the handle lives on a dedicated
//! owner thread and every request is serialized through a channel. Writes are
//! applied as one `WriteBatch`, which LevelDB commits atomically.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use rusty_leveldb::{WriteBatch, DB};
use tracing::{debug, info, warn};
use voxen_terrain::{RegionData, RegionPos};

use crate::codec::{decode_region, encode_region};
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::meta::WorldMeta;
use crate::provider::Provider;
use crate::source::{
    EntityRecord, Panorama, PlayerRecord, PluginReference, ServerContext, WorldFormat,
    WorldSource,
};

pub const LEVELDB_CONFIG_ID: &str = "LevelDB";

/// Plugins shipped with the platform build. Caller-supplied lists are ignored.
pub const BUNDLED_PLUGINS: &[(&str, &str)] = &[("core", "1.0.0")];

// ─── Key layout ─────────────────────────────────────────────────────────────

const TAG_REGION: u8 = 0x2F;
const TAG_ENTITIES: u8 = 0x31;
const META_KEY: &[u8] = b"~world";
const PLAYER_PREFIX: &[u8] = b"player_";

/// `[X:i32_le][Z:i32_le][tag]`
fn region_key(pos: RegionPos, tag: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.extend_from_slice(&pos.x.to_le_bytes());
    key.extend_from_slice(&pos.z.to_le_bytes());
    key.push(tag);
    key
}

fn player_key(id: &str) -> Vec<u8> {
    let mut key = PLAYER_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

pub fn bundled_plugins() -> Vec<PluginReference> {
    BUNDLED_PLUGINS
        .iter()
        .map(|(id, version)| PluginReference::new(*id, *version))
        .collect()
}

// ─── Owner thread ───────────────────────────────────────────────────────────

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A batch plus the key checks that must see the same state it is applied to.
/// The owner thread runs the checks and the batch back to back, so no other
/// request can interleave.
#[derive(Default)]
struct Batch {
    ops: Vec<BatchOp>,
    /// Skip the batch unless this key exists.
    require_present: Option<Vec<u8>>,
    /// Report whether this key existed before the batch.
    report_present: Option<Vec<u8>>,
}

impl Batch {
    fn new(ops: Vec<BatchOp>) -> Self {
        Self {
            ops,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    Applied { existed: bool },
    /// `require_present` was missing; nothing was written.
    Skipped,
}

enum Request {
    Get {
        key: Vec<u8>,
        reply: Sender<Option<Vec<u8>>>,
    },
    Write {
        batch: Batch,
        reply: Sender<std::result::Result<BatchOutcome, String>>,
    },
    Shutdown {
        reply: Sender<std::result::Result<(), String>>,
    },
}

struct DbThread {
    requests: Sender<Request>,
    handle: Option<JoinHandle<()>>,
}

impl DbThread {
    fn spawn(path: PathBuf) -> std::result::Result<Self, String> {
        let (requests, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("leveldb-owner".into())
            .spawn(move || {
                let opts = rusty_leveldb::Options {
                    create_if_missing: true,
                    ..rusty_leveldb::Options::default()
                };
                match DB::open(&path, opts) {
                    Ok(db) => {
                        let _ = ready_tx.send(Ok(()));
                        serve(db, inbox);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("Failed to open LevelDB: {e}")));
                    }
                }
            })
            .map_err(|e| format!("spawn LevelDB thread: {e}"))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                requests,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err("LevelDB thread exited during startup".into()),
        }
    }

    fn get(&self, key: Vec<u8>) -> std::result::Result<Option<Vec<u8>>, String> {
        let (reply, rx) = mpsc::channel();
        self.requests
            .send(Request::Get { key, reply })
            .map_err(|_| "LevelDB thread is gone".to_string())?;
        rx.recv().map_err(|_| "LevelDB thread is gone".to_string())
    }

    fn apply(&self, batch: Batch) -> std::result::Result<BatchOutcome, String> {
        let (reply, rx) = mpsc::channel();
        self.requests
            .send(Request::Write { batch, reply })
            .map_err(|_| "LevelDB thread is gone".to_string())?;
        rx.recv()
            .map_err(|_| "LevelDB thread is gone".to_string())?
    }

    fn write(&self, ops: Vec<BatchOp>) -> std::result::Result<(), String> {
        self.apply(Batch::new(ops)).map(|_| ())
    }

    fn shutdown(mut self) -> std::result::Result<(), String> {
        let (reply, rx) = mpsc::channel();
        let result = match self.requests.send(Request::Shutdown { reply }) {
            Ok(()) => rx
                .recv()
                .unwrap_or_else(|_| Err("LevelDB thread is gone".into())),
            Err(_) => Err("LevelDB thread is gone".into()),
        };
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }
}

impl Drop for DbThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let (reply, _rx) = mpsc::channel();
            if self.requests.send(Request::Shutdown { reply }).is_ok() {
                let _ = handle.join();
            }
        }
    }
}

fn serve(mut db: DB, inbox: Receiver<Request>) {
    for request in inbox {
        match request {
            Request::Get { key, reply } => {
                let _ = reply.send(db.get(&key));
            }
            Request::Write { batch, reply } => {
                let _ = reply.send(apply_batch(&mut db, batch));
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(db.flush().map_err(|e| format!("flush: {e}")));
                return;
            }
        }
    }
}

fn apply_batch(db: &mut DB, batch: Batch) -> std::result::Result<BatchOutcome, String> {
    if let Some(key) = &batch.require_present {
        if db.get(key).is_none() {
            return Ok(BatchOutcome::Skipped);
        }
    }
    let existed = match &batch.report_present {
        Some(key) => db.get(key).is_some(),
        None => false,
    };
    let mut write = WriteBatch::default();
    for op in &batch.ops {
        match op {
            BatchOp::Put(k, v) => write.put(k, v),
            BatchOp::Delete(k) => write.delete(k),
        }
    }
    db.write(write, true)
        .map_err(|e| format!("write batch: {e}"))?;
    Ok(BatchOutcome::Applied { existed })
}

// ─── Source ─────────────────────────────────────────────────────────────────

pub struct LevelDbProvider;

impl Provider for LevelDbProvider {
    fn config_id(&self) -> &'static str {
        LEVELDB_CONFIG_ID
    }

    fn available(&self) -> bool {
        true
    }

    fn create(&self, config: &StorageConfig) -> Result<Box<dyn WorldSource>> {
        Ok(Box::new(LevelDbSource::connect(&config.directory)?))
    }
}

pub struct LevelDbSource {
    dir: PathBuf,
    db: Option<DbThread>,
}

impl LevelDbSource {
    pub fn connect(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StorageError::connection(LEVELDB_CONFIG_ID, e))?;
        let db = DbThread::spawn(dir.to_path_buf())
            .map_err(|e| StorageError::connection(LEVELDB_CONFIG_ID, e))?;
        info!("opened LevelDB world store {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            db: Some(db),
        })
    }

    fn db(&self, context: &str) -> Result<&DbThread> {
        self.db.as_ref().ok_or_else(|| StorageError::closed(context))
    }

    fn read_meta(db: &DbThread) -> std::result::Result<Option<WorldMeta>, String> {
        match db.get(META_KEY.to_vec())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| format!("world metadata: {e}")),
            None => Ok(None),
        }
    }

    fn write_meta(db: &DbThread, meta: &WorldMeta) -> std::result::Result<(), String> {
        let json = serde_json::to_vec(meta).map_err(|e| format!("world metadata: {e}"))?;
        db.write(vec![BatchOp::Put(META_KEY.to_vec(), json)])
    }
}

impl WorldSource for LevelDbSource {
    fn config_id(&self) -> &'static str {
        LEVELDB_CONFIG_ID
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn initialized(&self) -> Result<bool> {
        let db = self.db("check initialization")?;
        Self::read_meta(db)
            .map(|m| m.is_some())
            .map_err(|e| StorageError::io("read world metadata", e))
    }

    fn init(&mut self, seed: i64, plugins: &[PluginReference]) -> Result<()> {
        let db = self.db("initialize world")?;
        let bundled = bundled_plugins();
        if !plugins.is_empty() && plugins != bundled.as_slice() {
            warn!("LevelDB worlds use the bundled plugin set; ignoring {} supplied plugin(s)", plugins.len());
        }
        if let Some(existing) =
            Self::read_meta(db).map_err(|e| StorageError::init_caused("read world metadata", e))?
        {
            return existing.check_reinit(seed, &bundled);
        }
        let meta = WorldMeta::new(seed, &bundled);
        Self::write_meta(db, &meta)
            .map_err(|e| StorageError::init_caused("write world metadata", e))?;
        info!("initialized LevelDB world {} with seed {seed}", self.dir.display());
        Ok(())
    }

    fn set_panorama(&mut self, _panorama: &Panorama) -> Result<()> {
        self.db("store panorama")?;
        debug!("LevelDB backend has no asset storage; panorama ignored");
        Ok(())
    }

    fn panorama(&self) -> Result<Option<Panorama>> {
        self.db("read panorama")?;
        Ok(None)
    }

    fn open(&mut self, ctx: &ServerContext) -> Result<Box<dyn WorldFormat + '_>> {
        let db = self
            .db
            .as_ref()
            .ok_or_else(|| StorageError::open("connection is closed"))?;
        let mut meta = Self::read_meta(db)
            .map_err(|e| StorageError::open_caused("read world metadata", e))?
            .ok_or_else(|| StorageError::open("world is not initialized"))?;
        if let Some(palette) = meta.validate(ctx, &bundled_plugins())? {
            meta.palette = palette;
            Self::write_meta(db, &meta)
                .map_err(|e| StorageError::open_caused("record voxel palette", e))?;
        }
        info!("opened LevelDB world {} (seed {})", self.dir.display(), meta.seed);
        Ok(Box::new(LevelDbFormat { db, meta }))
    }

    fn close(&mut self) -> Result<()> {
        let db = self.db.take().ok_or_else(|| StorageError::closed("close world"))?;
        db.shutdown()
            .map_err(|e| StorageError::io("close LevelDB", e))?;
        info!("closed LevelDB world {}", self.dir.display());
        Ok(())
    }
}

// ─── Format ─────────────────────────────────────────────────────────────────

struct LevelDbFormat<'a> {
    db: &'a DbThread,
    meta: WorldMeta,
}

impl LevelDbFormat<'_> {
    fn get(&self, key: Vec<u8>, context: impl FnOnce() -> String) -> Result<Option<Vec<u8>>> {
        self.db.get(key).map_err(|e| StorageError::io(context(), e))
    }

    fn write(&self, ops: Vec<BatchOp>, context: impl FnOnce() -> String) -> Result<()> {
        self.db.write(ops).map_err(|e| StorageError::io(context(), e))
    }

    fn apply(&self, batch: Batch, context: impl FnOnce() -> String) -> Result<BatchOutcome> {
        self.db.apply(batch).map_err(|e| StorageError::io(context(), e))
    }
}

fn region_context(verb: &str, pos: RegionPos) -> String {
    format!("{verb} region ({}, {})", pos.x, pos.z)
}

impl WorldFormat for LevelDbFormat<'_> {
    fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    fn load_region(&self, pos: RegionPos) -> Result<Option<RegionData>> {
        let blob = self.get(region_key(pos, TAG_REGION), || region_context("load", pos))?;
        blob.map(|b| {
            decode_region(&b).map_err(|e| StorageError::io(region_context("decode", pos), e))
        })
        .transpose()
    }

    fn region_exists(&self, pos: RegionPos) -> Result<bool> {
        self.get(region_key(pos, TAG_REGION), || region_context("look up", pos))
            .map(|v| v.is_some())
    }

    fn save_regions(&self, regions: &[(RegionPos, &RegionData)]) -> Result<()> {
        let ops = regions
            .iter()
            .map(|(pos, data)| {
                encode_region(data)
                    .map(|blob| BatchOp::Put(region_key(*pos, TAG_REGION), blob))
                    .map_err(|e| StorageError::io(region_context("encode", *pos), e))
            })
            .collect::<Result<Vec<_>>>()?;
        let count = ops.len();
        self.write(ops, || "save regions".into())?;
        debug!("saved {count} region(s)");
        Ok(())
    }

    fn delete_region(&self, pos: RegionPos) -> Result<bool> {
        let batch = Batch {
            ops: vec![
                BatchOp::Delete(region_key(pos, TAG_ENTITIES)),
                BatchOp::Delete(region_key(pos, TAG_REGION)),
            ],
            report_present: Some(region_key(pos, TAG_REGION)),
            ..Batch::default()
        };
        match self.apply(batch, || region_context("delete", pos))? {
            BatchOutcome::Applied { existed } => Ok(existed),
            BatchOutcome::Skipped => Ok(false),
        }
    }

    fn load_entities(&self, region: RegionPos) -> Result<Vec<EntityRecord>> {
        let context = || region_context("load entities of", region);
        match self.get(region_key(region, TAG_ENTITIES), context)? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::io(context(), e))
            }
            None => Ok(Vec::new()),
        }
    }

    fn save_entities(&self, region: RegionPos, entities: &[EntityRecord]) -> Result<()> {
        let context = || region_context("save entities of", region);
        let key = region_key(region, TAG_ENTITIES);
        let op = if entities.is_empty() {
            BatchOp::Delete(key)
        } else {
            let json = serde_json::to_vec(entities).map_err(|e| StorageError::io(context(), e))?;
            BatchOp::Put(key, json)
        };
        // The region check runs on the owner thread right before the write,
        // so a concurrent delete cannot leave entities behind.
        let batch = Batch {
            ops: vec![op],
            require_present: Some(region_key(region, TAG_REGION)),
            ..Batch::default()
        };
        match self.apply(batch, context)? {
            BatchOutcome::Applied { .. } => Ok(()),
            BatchOutcome::Skipped => Err(StorageError::io(context(), "region has not been saved")),
        }
    }

    fn load_player(&self, id: &str) -> Result<Option<PlayerRecord>> {
        let context = || format!("load player {id}");
        self.get(player_key(id), context)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(|e| StorageError::io(context(), e)))
            .transpose()
    }

    fn save_player(&self, id: &str, record: &PlayerRecord) -> Result<()> {
        let context = || format!("save player {id}");
        let json = serde_json::to_vec(record).map_err(|e| StorageError::io(context(), e))?;
        self.write(vec![BatchOp::Put(player_key(id), json)], context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voxen_terrain::{PackedBlock, VoxelDescriptor, VoxelRegistry};

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("voxen_leveldb_{}", rand::random::<u64>()))
    }

    fn context() -> ServerContext {
        let mut reg = VoxelRegistry::new();
        reg.register(VoxelDescriptor::solid("core:stone")).unwrap();
        ServerContext::new(Arc::new(reg), Vec::new())
    }

    #[test]
    fn region_key_bytes() {
        let key = region_key(RegionPos::new(10, -5), TAG_REGION);
        assert_eq!(key.len(), 9);
        assert_eq!(&key[0..4], &[0x0A, 0x00, 0x00, 0x00]);
        assert_eq!(&key[4..8], &[0xFB, 0xFF, 0xFF, 0xFF]);
        assert_eq!(key[8], TAG_REGION);
    }

    #[test]
    fn player_key_prefix() {
        assert_eq!(player_key("alex"), b"player_alex".to_vec());
    }

    #[test]
    fn init_uses_bundled_plugins() {
        let path = temp_db_path();
        let mut source = LevelDbSource::connect(&path).unwrap();
        assert!(!source.initialized().unwrap());
        source
            .init(42, &[PluginReference::new("farming", "1.0")])
            .unwrap();
        assert!(source.initialized().unwrap());
        let format = source.open(&context()).unwrap();
        assert_eq!(format.meta().seed, 42);
        assert_eq!(format.meta().plugins, bundled_plugins());
        assert_eq!(format.meta().palette, vec!["core:air", "core:stone"]);
        drop(format);
        source.close().unwrap();
        std::fs::remove_dir_all(&path).ok();
    }

    #[test]
    fn panorama_unsupported() {
        let path = temp_db_path();
        let mut source = LevelDbSource::connect(&path).unwrap();
        let panorama = Panorama::new(vec![vec![1]; crate::source::PANORAMA_SIZE]).unwrap();
        source.set_panorama(&panorama).unwrap();
        assert!(source.panorama().unwrap().is_none());
        source.close().unwrap();
        std::fs::remove_dir_all(&path).ok();
    }

    #[test]
    fn conflicting_reinit_rejected() {
        let path = temp_db_path();
        let mut source = LevelDbSource::connect(&path).unwrap();
        source.init(1, &[]).unwrap();
        source.init(1, &[]).unwrap();
        assert!(matches!(source.init(2, &[]), Err(StorageError::Init { .. })));
        source.close().unwrap();
        std::fs::remove_dir_all(&path).ok();
    }

    #[test]
    fn regions_entities_players() {
        let path = temp_db_path();
        let mut source = LevelDbSource::connect(&path).unwrap();
        source.init(7, &[]).unwrap();
        let format = source.open(&context()).unwrap();

        let pos = RegionPos::new(3, 7);
        let mut data = RegionData::filled(PackedBlock::AIR);
        data.set(1, 1, 1, PackedBlock::new(1, 99));
        let entity = EntityRecord {
            id: "bat-1".into(),
            kind: "core:bat".into(),
            position: [50.0, 30.0, 115.0],
            data: serde_json::Value::Null,
        };

        assert!(format.save_entities(pos, &[entity.clone()]).is_err());
        format.save_region(pos, &data).unwrap();
        format.save_entities(pos, &[entity.clone()]).unwrap();

        assert_eq!(format.load_region(pos).unwrap().unwrap(), data);
        assert_eq!(format.load_entities(pos).unwrap(), vec![entity]);
        assert!(format.load_region(RegionPos::new(7, 3)).unwrap().is_none());

        assert!(format.delete_region(pos).unwrap());
        assert!(!format.region_exists(pos).unwrap());
        assert!(format.load_entities(pos).unwrap().is_empty());

        let player = PlayerRecord {
            position: [1.0, 2.0, 3.0],
            yaw: 0.0,
            pitch: 0.0,
            data: serde_json::Value::Null,
        };
        format.save_player("alex", &player).unwrap();
        assert_eq!(format.load_player("alex").unwrap(), Some(player));
        assert!(format.load_player("steve").unwrap().is_none());

        drop(format);
        source.close().unwrap();
        std::fs::remove_dir_all(&path).ok();
    }

    #[test]
    fn entity_save_racing_region_delete_leaves_no_orphans() {
        let path = temp_db_path();
        let mut source = LevelDbSource::connect(&path).unwrap();
        source.init(11, &[]).unwrap();
        let opened = source.open(&context()).unwrap();
        let format = opened.as_ref();

        let pos = RegionPos::new(0, 0);
        let data = RegionData::filled(PackedBlock::AIR);
        let entity = EntityRecord {
            id: "zombie-1".into(),
            kind: "core:zombie".into(),
            position: [1.0, 2.0, 3.0],
            data: serde_json::Value::Null,
        };

        for _ in 0..100 {
            format.save_region(pos, &data).unwrap();
            let deleted = std::thread::scope(|scope| {
                let saver = scope.spawn(|| format.save_entities(pos, &[entity.clone()]));
                let deleter = scope.spawn(|| format.delete_region(pos));
                let _ = saver.join().unwrap();
                deleter.join().unwrap().unwrap()
            });
            assert!(deleted, "the region was saved just before the delete");
            assert!(!format.region_exists(pos).unwrap());
            assert!(
                format.load_entities(pos).unwrap().is_empty(),
                "entities outlived their region"
            );
        }

        assert!(!format.delete_region(pos).unwrap());
        drop(opened);
        source.close().unwrap();
        std::fs::remove_dir_all(&path).ok();
    }

    #[test]
    fn data_survives_reconnect() {
        let path = temp_db_path();
        let pos = RegionPos::new(-1, -1);
        let mut data = RegionData::filled(PackedBlock::AIR);
        data.set(0, 0, 0, PackedBlock::new(1, 0));
        {
            let mut source = LevelDbSource::connect(&path).unwrap();
            source.init(5, &[]).unwrap();
            let format = source.open(&context()).unwrap();
            format.save_region(pos, &data).unwrap();
            drop(format);
            source.close().unwrap();
        }
        let mut source = LevelDbSource::connect(&path).unwrap();
        let format = source.open(&context()).unwrap();
        assert_eq!(format.load_region(pos).unwrap().unwrap(), data);
        drop(format);
        source.close().unwrap();
        std::fs::remove_dir_all(&path).ok();
    }

    #[test]
    fn close_twice_is_io_error() {
        let path = temp_db_path();
        let mut source = LevelDbSource::connect(&path).unwrap();
        source.close().unwrap();
        assert!(matches!(source.close(), Err(StorageError::Io { .. })));
        assert!(matches!(source.initialized(), Err(StorageError::Io { .. })));
        std::fs::remove_dir_all(&path).ok();
    }
}
