//! Embedded file-backed backend on SQLite.
//!
//! One database file (`world.db`) lives in the world directory, with panorama
//! images written beside it. Durability (journal mode, synchronous level),
//! locking mode and foreign-key enforcement are applied before first use. The
//! connection is not `Sync`, so it sits behind a mutex shared by the source and
//! its format.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use voxen_terrain::{RegionData, RegionPos};

use crate::assets;
use crate::codec::{decode_region, encode_region};
use crate::config::{SqliteOptions, StorageConfig};
use crate::error::{Result, StorageError};
use crate::meta::WorldMeta;
use crate::provider::Provider;
use crate::source::{
    EntityRecord, Panorama, PlayerRecord, PluginReference, ServerContext, WorldFormat,
    WorldSource,
};

pub const SQLITE_CONFIG_ID: &str = "SQLite";

/// Database file name inside the world directory.
pub const DATABASE_FILE: &str = "world.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS world_meta (
    id             INTEGER PRIMARY KEY CHECK (id = 0),
    format_version INTEGER NOT NULL,
    seed           INTEGER NOT NULL,
    created_at     INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS plugins (
    id      TEXT PRIMARY KEY,
    version TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS voxel_palette (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS regions (
    x    INTEGER NOT NULL,
    z    INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (x, z)
);
CREATE TABLE IF NOT EXISTS entities (
    id       TEXT PRIMARY KEY,
    region_x INTEGER NOT NULL,
    region_z INTEGER NOT NULL,
    data     TEXT NOT NULL,
    FOREIGN KEY (region_x, region_z) REFERENCES regions (x, z) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS entities_by_region ON entities (region_x, region_z);
CREATE TABLE IF NOT EXISTS players (
    id   TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
";

const UPSERT_REGION: &str = "INSERT INTO regions (x, z, data) VALUES (?1, ?2, ?3)
     ON CONFLICT (x, z) DO UPDATE SET data = excluded.data";

const UPSERT_ENTITY: &str = "INSERT INTO entities (id, region_x, region_z, data) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT (id) DO UPDATE SET
         region_x = excluded.region_x, region_z = excluded.region_z, data = excluded.data";

const UPSERT_PLAYER: &str = "INSERT INTO players (id, data) VALUES (?1, ?2)
     ON CONFLICT (id) DO UPDATE SET data = excluded.data";

pub struct SqliteProvider;

impl Provider for SqliteProvider {
    fn config_id(&self) -> &'static str {
        SQLITE_CONFIG_ID
    }

    fn available(&self) -> bool {
        // The driver is compiled in.
        true
    }

    fn create(&self, config: &StorageConfig) -> Result<Box<dyn WorldSource>> {
        Ok(Box::new(SqliteSource::connect(
            &config.directory,
            &config.sqlite,
        )?))
    }
}

pub struct SqliteSource {
    dir: PathBuf,
    conn: Option<Mutex<Connection>>,
}

impl SqliteSource {
    /// Create the directory if needed, open or create the database and configure it.
    pub fn connect(dir: &Path, options: &SqliteOptions) -> Result<Self> {
        let connection_err = |e: rusqlite::Error| StorageError::connection(SQLITE_CONFIG_ID, e);
        fs::create_dir_all(dir).map_err(|e| StorageError::connection(SQLITE_CONFIG_ID, e))?;
        let path = dir.join(DATABASE_FILE);
        let conn = Connection::open(&path).map_err(connection_err)?;
        configure(&conn, options).map_err(connection_err)?;
        info!("opened SQLite world database {}", path.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            conn: Some(Mutex::new(conn)),
        })
    }

    fn conn(&self, context: &str) -> Result<&Mutex<Connection>> {
        self.conn
            .as_ref()
            .ok_or_else(|| StorageError::closed(context))
    }
}

fn configure(conn: &Connection, options: &SqliteOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
    // Locking mode first so WAL can run without shared memory in exclusive mode.
    let locking: String = conn.pragma_update_and_check(
        None,
        "locking_mode",
        &options.locking_mode,
        |row| row.get(0),
    )?;
    let journal: String = conn.pragma_update_and_check(
        None,
        "journal_mode",
        &options.journal_mode,
        |row| row.get(0),
    )?;
    conn.pragma_update(None, "synchronous", &options.synchronous)?;
    conn.pragma_update(None, "foreign_keys", options.foreign_keys)?;
    debug!(
        "SQLite configured: locking_mode={locking} journal_mode={journal} synchronous={} foreign_keys={}",
        options.synchronous, options.foreign_keys
    );
    Ok(())
}

fn schema_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'world_meta')",
        [],
        |row| row.get(0),
    )
}

fn read_meta(conn: &Connection) -> rusqlite::Result<Option<WorldMeta>> {
    if !schema_exists(conn)? {
        return Ok(None);
    }
    let head = conn
        .query_row(
            "SELECT format_version, seed, created_at FROM world_meta WHERE id = 0",
            [],
            |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((format_version, seed, created_at)) = head else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT id, version FROM plugins ORDER BY rowid")?;
    let plugins = stmt
        .query_map([], |row| {
            Ok(PluginReference::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT name FROM voxel_palette ORDER BY id")?;
    let palette = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    Ok(Some(WorldMeta {
        format_version,
        seed,
        plugins,
        created_at: created_at as u64,
        palette,
    }))
}

fn write_palette(conn: &mut Connection, palette: &[String]) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM voxel_palette", [])?;
    {
        let mut stmt = tx.prepare("INSERT INTO voxel_palette (id, name) VALUES (?1, ?2)")?;
        for (id, name) in palette.iter().enumerate() {
            stmt.execute(params![id as i64, name])?;
        }
    }
    tx.commit()
}

impl WorldSource for SqliteSource {
    fn config_id(&self) -> &'static str {
        SQLITE_CONFIG_ID
    }

    fn location(&self) -> String {
        self.dir.join(DATABASE_FILE).display().to_string()
    }

    fn initialized(&self) -> Result<bool> {
        let conn = self.conn("check initialization")?.lock();
        read_meta(&conn)
            .map(|meta| meta.is_some())
            .map_err(|e| StorageError::io("read world metadata", e))
    }

    fn init(&mut self, seed: i64, plugins: &[PluginReference]) -> Result<()> {
        let mut conn = self.conn("initialize world")?.lock();
        let init_err = |context: &'static str| {
            move |e: rusqlite::Error| StorageError::init_caused(context, e)
        };

        let tx = conn.transaction().map_err(init_err("begin transaction"))?;
        tx.execute_batch(SCHEMA)
            .map_err(init_err("create schema"))?;
        if let Some(existing) = read_meta(&tx).map_err(init_err("read world metadata"))? {
            return existing.check_reinit(seed, plugins);
        }

        let meta = WorldMeta::new(seed, plugins);
        tx.execute(
            "INSERT INTO world_meta (id, format_version, seed, created_at) VALUES (0, ?1, ?2, ?3)",
            params![meta.format_version, meta.seed, meta.created_at as i64],
        )
        .map_err(init_err("write world metadata"))?;
        for plugin in plugins {
            tx.execute(
                "INSERT INTO plugins (id, version) VALUES (?1, ?2)",
                params![plugin.id, plugin.version],
            )
            .map_err(init_err("record plugins"))?;
        }
        tx.commit().map_err(init_err("commit"))?;
        info!("initialized SQLite world {} with seed {seed}", self.dir.display());
        Ok(())
    }

    fn set_panorama(&mut self, panorama: &Panorama) -> Result<()> {
        self.conn("store panorama")?;
        assets::write_panorama(&self.dir, panorama)
    }

    fn panorama(&self) -> Result<Option<Panorama>> {
        self.conn("read panorama")?;
        assets::read_panorama(&self.dir)
    }

    fn open(&mut self, ctx: &ServerContext) -> Result<Box<dyn WorldFormat + '_>> {
        let lock = self
            .conn
            .as_ref()
            .ok_or_else(|| StorageError::open("connection is closed"))?;
        let meta = {
            let mut conn = lock.lock();
            let mut meta = read_meta(&conn)
                .map_err(|e| StorageError::open_caused("read world metadata", e))?
                .ok_or_else(|| StorageError::open("world is not initialized"))?;
            if let Some(palette) = meta.validate(ctx, &ctx.plugins)? {
                write_palette(&mut conn, &palette)
                    .map_err(|e| StorageError::open_caused("record voxel palette", e))?;
                meta.palette = palette;
            }
            meta
        };
        info!("opened SQLite world {} (seed {})", self.dir.display(), meta.seed);
        Ok(Box::new(SqliteFormat { conn: lock, meta }))
    }

    fn close(&mut self) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| StorageError::closed("close world"))?;
        conn.into_inner()
            .close()
            .map_err(|(_, e)| StorageError::io("close database", e))?;
        info!("closed SQLite world {}", self.dir.display());
        Ok(())
    }
}

struct SqliteFormat<'a> {
    conn: &'a Mutex<Connection>,
    meta: WorldMeta,
}

fn io_err(context: String) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |e| StorageError::io(context, e)
}

fn region_context(verb: &str, pos: RegionPos) -> String {
    format!("{verb} region ({}, {})", pos.x, pos.z)
}

impl WorldFormat for SqliteFormat<'_> {
    fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    fn load_region(&self, pos: RegionPos) -> Result<Option<RegionData>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .lock()
            .query_row(
                "SELECT data FROM regions WHERE x = ?1 AND z = ?2",
                params![pos.x, pos.z],
                |row| row.get(0),
            )
            .optional()
            .map_err(io_err(region_context("load", pos)))?;
        blob.map(|b| {
            decode_region(&b).map_err(|e| StorageError::io(region_context("decode", pos), e))
        })
        .transpose()
    }

    fn region_exists(&self, pos: RegionPos) -> Result<bool> {
        self.conn
            .lock()
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM regions WHERE x = ?1 AND z = ?2)",
                params![pos.x, pos.z],
                |row| row.get(0),
            )
            .map_err(io_err(region_context("look up", pos)))
    }

    fn save_regions(&self, regions: &[(RegionPos, &RegionData)]) -> Result<()> {
        let blobs = regions
            .iter()
            .map(|(pos, data)| {
                encode_region(data)
                    .map(|blob| (*pos, blob))
                    .map_err(|e| StorageError::io(region_context("encode", *pos), e))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(io_err("begin region save".into()))?;
        {
            let mut stmt = tx
                .prepare_cached(UPSERT_REGION)
                .map_err(io_err("prepare region save".into()))?;
            for (pos, blob) in &blobs {
                stmt.execute(params![pos.x, pos.z, blob])
                    .map_err(io_err(region_context("save", *pos)))?;
            }
        }
        tx.commit().map_err(io_err("commit region save".into()))?;
        debug!("saved {} region(s)", blobs.len());
        Ok(())
    }

    fn delete_region(&self, pos: RegionPos) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(io_err(region_context("delete", pos)))?;
        tx.execute(
            "DELETE FROM entities WHERE region_x = ?1 AND region_z = ?2",
            params![pos.x, pos.z],
        )
        .map_err(io_err(region_context("delete entities of", pos)))?;
        let removed = tx
            .execute(
                "DELETE FROM regions WHERE x = ?1 AND z = ?2",
                params![pos.x, pos.z],
            )
            .map_err(io_err(region_context("delete", pos)))?;
        tx.commit()
            .map_err(io_err(region_context("commit delete of", pos)))?;
        Ok(removed > 0)
    }

    fn load_entities(&self, region: RegionPos) -> Result<Vec<EntityRecord>> {
        let conn = self.conn.lock();
        let context = region_context("load entities of", region);
        let mut stmt = conn
            .prepare_cached(
                "SELECT data FROM entities WHERE region_x = ?1 AND region_z = ?2 ORDER BY id",
            )
            .map_err(io_err(context.clone()))?;
        let rows = stmt
            .query_map(params![region.x, region.z], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(io_err(context.clone()))?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(|e| StorageError::io(&context, e)))
            .collect()
    }

    fn save_entities(&self, region: RegionPos, entities: &[EntityRecord]) -> Result<()> {
        let context = region_context("save entities of", region);
        let rows = entities
            .iter()
            .map(|e| serde_json::to_string(e).map(|json| (e.id.as_str(), json)))
            .collect::<serde_json::Result<Vec<_>>>()
            .map_err(|e| StorageError::io(&context, e))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(io_err(context.clone()))?;
        tx.execute(
            "DELETE FROM entities WHERE region_x = ?1 AND region_z = ?2",
            params![region.x, region.z],
        )
        .map_err(io_err(context.clone()))?;
        {
            let mut stmt = tx
                .prepare_cached(UPSERT_ENTITY)
                .map_err(io_err(context.clone()))?;
            for (id, json) in &rows {
                stmt.execute(params![id, region.x, region.z, json])
                    .map_err(io_err(context.clone()))?;
            }
        }
        tx.commit().map_err(io_err(context))
    }

    fn load_player(&self, id: &str) -> Result<Option<PlayerRecord>> {
        let context = format!("load player {id}");
        let json: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT data FROM players WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(io_err(context.clone()))?;
        json.map(|j| serde_json::from_str(&j).map_err(|e| StorageError::io(&context, e)))
            .transpose()
    }

    fn save_player(&self, id: &str, record: &PlayerRecord) -> Result<()> {
        let context = format!("save player {id}");
        let json = serde_json::to_string(record).map_err(|e| StorageError::io(&context, e))?;
        self.conn
            .lock()
            .execute(UPSERT_PLAYER, params![id, json])
            .map_err(io_err(context))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PANORAMA_SIZE;
    use std::sync::Arc;
    use voxen_terrain::{PackedBlock, VoxelDescriptor, VoxelRegistry};

    fn temp_world() -> PathBuf {
        std::env::temp_dir().join(format!("voxen_sqlite_{}", rand::random::<u64>()))
    }

    fn context(types: &[&str]) -> ServerContext {
        let mut reg = VoxelRegistry::new();
        for t in types {
            reg.register(VoxelDescriptor::solid(*t)).unwrap();
        }
        ServerContext::new(Arc::new(reg), Vec::new())
    }

    fn connect(dir: &Path) -> SqliteSource {
        SqliteSource::connect(dir, &SqliteOptions::default()).unwrap()
    }

    fn stone_region() -> RegionData {
        let mut data = RegionData::filled(PackedBlock::AIR);
        data.set(1, 2, 3, PackedBlock::new(1, 7));
        data
    }

    #[test]
    fn connect_creates_directory_and_applies_pragmas() {
        let dir = temp_world();
        let source = connect(&dir);
        assert!(dir.join(DATABASE_FILE).exists());
        {
            let conn = source.conn.as_ref().unwrap().lock();
            let journal: String = conn
                .pragma_query_value(None, "journal_mode", |r| r.get(0))
                .unwrap();
            assert!(journal.eq_ignore_ascii_case("wal"));
            let fk: i64 = conn
                .pragma_query_value(None, "foreign_keys", |r| r.get(0))
                .unwrap();
            assert_eq!(fk, 1);
        }
        assert!(!source.initialized().unwrap());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn init_then_open_with_panorama() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.init(42, &[]).unwrap();
        assert!(source.initialized().unwrap());

        let images: Vec<Vec<u8>> = (0..PANORAMA_SIZE as u8)
            .map(|i| vec![0x89, b'P', b'N', b'G', i, 0xFF])
            .collect();
        source
            .set_panorama(&Panorama::new(images.clone()).unwrap())
            .unwrap();
        let stored = source.panorama().unwrap().unwrap();
        assert_eq!(stored.image(0).unwrap(), images[0].as_slice());
        assert!(dir.join("Panorama0.png").exists());

        {
            let format = source.open(&context(&[])).unwrap();
            assert_eq!(format.meta().seed, 42);
            assert!(format.meta().plugins.is_empty());
        }
        source.close().unwrap();
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn open_requires_init() {
        let dir = temp_world();
        let mut source = connect(&dir);
        let err = source.open(&context(&[])).err().unwrap();
        assert!(matches!(err, StorageError::Open { .. }));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reinit_conflicting_seed_keeps_world() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.init(42, &[]).unwrap();
        source.init(42, &[]).unwrap();
        let err = source.init(43, &[]).unwrap_err();
        assert!(matches!(err, StorageError::Init { .. }));
        let format = source.open(&context(&[])).unwrap();
        assert_eq!(format.meta().seed, 42);
        drop(format);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn duplicate_plugin_fails_init_atomically() {
        let dir = temp_world();
        let mut source = connect(&dir);
        let plugins = [PluginReference::new("core", "1"), PluginReference::new("core", "2")];
        assert!(matches!(
            source.init(1, &plugins),
            Err(StorageError::Init { .. })
        ));
        assert!(!source.initialized().unwrap());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn region_round_trip() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.init(1, &[]).unwrap();
        let format = source.open(&context(&["core:stone"])).unwrap();
        let pos = RegionPos::new(-3, 9);

        assert!(format.load_region(pos).unwrap().is_none());
        assert!(!format.region_exists(pos).unwrap());

        format.save_region(pos, &stone_region()).unwrap();
        assert!(format.region_exists(pos).unwrap());
        assert_eq!(format.load_region(pos).unwrap().unwrap(), stone_region());

        // Overwrite in place.
        let air = RegionData::filled(PackedBlock::AIR);
        format.save_region(pos, &air).unwrap();
        assert_eq!(format.load_region(pos).unwrap().unwrap(), air);
        drop(format);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failing_batch_rolls_back() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.init(1, &[]).unwrap();
        source
            .conn
            .as_ref()
            .unwrap()
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_far BEFORE INSERT ON regions WHEN NEW.x = 99
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let format = source.open(&context(&["core:stone"])).unwrap();
        let data = stone_region();
        let err = format
            .save_regions(&[(RegionPos::new(0, 0), &data), (RegionPos::new(99, 0), &data)])
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
        assert!(format.load_region(RegionPos::new(0, 0)).unwrap().is_none());
        drop(format);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn entities_follow_their_region() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.init(1, &[]).unwrap();
        let format = source.open(&context(&[])).unwrap();
        let pos = RegionPos::new(2, 2);
        let entity = EntityRecord {
            id: "e-1".into(),
            kind: "core:sheep".into(),
            position: [33.5, 70.0, 40.0],
            data: serde_json::json!({ "wool": "white" }),
        };

        // Foreign key: the region must be saved first.
        assert!(format.save_entities(pos, &[entity.clone()]).is_err());

        format
            .save_region(pos, &RegionData::filled(PackedBlock::AIR))
            .unwrap();
        format.save_entities(pos, &[entity.clone()]).unwrap();
        assert_eq!(format.load_entities(pos).unwrap(), vec![entity.clone()]);

        // Saving an empty set replaces the previous one.
        format.save_entities(pos, &[]).unwrap();
        assert!(format.load_entities(pos).unwrap().is_empty());

        format.save_entities(pos, &[entity]).unwrap();
        assert!(format.delete_region(pos).unwrap());
        assert!(format.load_entities(pos).unwrap().is_empty());
        assert!(!format.delete_region(pos).unwrap());
        drop(format);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn player_round_trip() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.init(1, &[]).unwrap();
        let format = source.open(&context(&[])).unwrap();
        assert!(format.load_player("steve").unwrap().is_none());
        let mut record = PlayerRecord {
            position: [0.5, 65.0, 0.5],
            yaw: 180.0,
            pitch: -10.0,
            data: serde_json::json!({ "health": 20 }),
        };
        format.save_player("steve", &record).unwrap();
        record.position[1] = 80.0;
        format.save_player("steve", &record).unwrap();
        assert_eq!(format.load_player("steve").unwrap(), Some(record));
        drop(format);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn close_twice_is_io_error() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.close().unwrap();
        assert!(matches!(source.close(), Err(StorageError::Io { .. })));
        assert!(matches!(source.init(1, &[]), Err(StorageError::Io { .. })));
        assert!(matches!(source.panorama(), Err(StorageError::Io { .. })));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopen_keeps_data_and_palette() {
        let dir = temp_world();
        let pos = RegionPos::new(0, 1);
        {
            let mut source = connect(&dir);
            source.init(9, &[]).unwrap();
            let format = source.open(&context(&["core:stone"])).unwrap();
            format.save_region(pos, &stone_region()).unwrap();
            drop(format);
            source.close().unwrap();
        }

        let mut source = connect(&dir);
        assert!(source.initialized().unwrap());
        {
            let format = source.open(&context(&["core:stone", "core:dirt"])).unwrap();
            assert_eq!(format.meta().palette.len(), 3);
            assert_eq!(format.load_region(pos).unwrap().unwrap(), stone_region());
        }
        let err = source.open(&context(&["core:dirt"])).err().unwrap();
        assert!(matches!(err, StorageError::Open { .. }));
        source.close().unwrap();
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn plugins_recorded_and_required() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source
            .init(1, &[PluginReference::new("farming", "1.0")])
            .unwrap();
        assert!(source.open(&context(&[])).is_err());

        let mut ctx = context(&[]);
        ctx.plugins.push(PluginReference::new("farming", "1.1"));
        let format = source.open(&ctx).unwrap();
        assert_eq!(
            format.meta().plugins,
            vec![PluginReference::new("farming", "1.0")]
        );
        drop(format);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_region_is_io_error() {
        let dir = temp_world();
        let mut source = connect(&dir);
        source.init(1, &[]).unwrap();
        source
            .conn
            .as_ref()
            .unwrap()
            .lock()
            .execute(
                "INSERT INTO regions (x, z, data) VALUES (5, 5, x'FF0013')",
                [],
            )
            .unwrap();
        let format = source.open(&context(&[])).unwrap();
        assert!(matches!(
            format.load_region(RegionPos::new(5, 5)),
            Err(StorageError::Io { .. })
        ));
        drop(format);
        fs::remove_dir_all(&dir).ok();
    }
}
