use std::fs;
use std::path::{Path, PathBuf};

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, TxOpts};
use parking_lot::Mutex;
use tracing::{debug, info};
use voxen_terrain::{RegionData, RegionPos};

use super::MARIADB_CONFIG_ID;
use crate::assets;
use crate::codec::{decode_region, encode_region};
use crate::config::MariaDbOptions;
use crate::error::{Result, StorageError};
use crate::meta::WorldMeta;
use crate::source::{
    EntityRecord, Panorama, PlayerRecord, PluginReference, ServerContext, WorldFormat,
    WorldSource,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS world_meta (
        id             TINYINT UNSIGNED PRIMARY KEY,
        format_version INT UNSIGNED NOT NULL,
        seed           BIGINT NOT NULL,
        created_at     BIGINT UNSIGNED NOT NULL
    ) ENGINE = InnoDB",
    "CREATE TABLE IF NOT EXISTS plugins (
        seq     INT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        id      VARCHAR(191) NOT NULL UNIQUE,
        version VARCHAR(64) NOT NULL
    ) ENGINE = InnoDB",
    "CREATE TABLE IF NOT EXISTS voxel_palette (
        id   INT UNSIGNED PRIMARY KEY,
        name VARCHAR(191) NOT NULL UNIQUE
    ) ENGINE = InnoDB",
    "CREATE TABLE IF NOT EXISTS regions (
        x    INT NOT NULL,
        z    INT NOT NULL,
        data LONGBLOB NOT NULL,
        PRIMARY KEY (x, z)
    ) ENGINE = InnoDB",
    "CREATE TABLE IF NOT EXISTS entities (
        id       VARCHAR(191) PRIMARY KEY,
        region_x INT NOT NULL,
        region_z INT NOT NULL,
        data     LONGTEXT NOT NULL,
        INDEX entities_by_region (region_x, region_z),
        FOREIGN KEY (region_x, region_z) REFERENCES regions (x, z) ON DELETE CASCADE
    ) ENGINE = InnoDB",
    "CREATE TABLE IF NOT EXISTS players (
        id   VARCHAR(191) PRIMARY KEY,
        data LONGTEXT NOT NULL
    ) ENGINE = InnoDB",
];

const UPSERT_REGION: &str = "INSERT INTO regions (x, z, data) VALUES (?, ?, ?)
     ON DUPLICATE KEY UPDATE data = VALUES(data)";

const UPSERT_ENTITY: &str = "INSERT INTO entities (id, region_x, region_z, data) VALUES (?, ?, ?, ?)
     ON DUPLICATE KEY UPDATE
         region_x = VALUES(region_x), region_z = VALUES(region_z), data = VALUES(data)";

const UPSERT_PLAYER: &str = "INSERT INTO players (id, data) VALUES (?, ?)
     ON DUPLICATE KEY UPDATE data = VALUES(data)";

/// World stored in a MariaDB database; plugin artifacts and panorama images
/// live in the world directory.
pub struct MariaDbSource {
    dir: PathBuf,
    url: String,
    conn: Option<Mutex<Conn>>,
}

impl MariaDbSource {
    pub fn connect(dir: &Path, options: &MariaDbOptions) -> Result<Self> {
        let connection_err = |e: mysql::Error| StorageError::connection(MARIADB_CONFIG_ID, e);
        let opts = Opts::from_url(&options.url)
            .map_err(|e| StorageError::connection(MARIADB_CONFIG_ID, e))?;
        let mut builder = OptsBuilder::from_opts(opts);
        if !options.user.is_empty() {
            builder = builder.user(Some(options.user.clone()));
        }
        if !options.password.is_empty() {
            builder = builder.pass(Some(options.password.clone()));
        }
        fs::create_dir_all(dir).map_err(|e| StorageError::connection(MARIADB_CONFIG_ID, e))?;
        let conn = Conn::new(builder).map_err(connection_err)?;
        info!("connected to MariaDB world database {}", options.url);
        Ok(Self {
            dir: dir.to_path_buf(),
            url: options.url.clone(),
            conn: Some(Mutex::new(conn)),
        })
    }

    fn conn(&self, context: &str) -> Result<&Mutex<Conn>> {
        self.conn
            .as_ref()
            .ok_or_else(|| StorageError::closed(context))
    }
}

fn schema_exists(conn: &mut impl Queryable) -> mysql::Result<bool> {
    let found: Option<u8> = conn.query_first(
        "SELECT 1 FROM information_schema.tables
         WHERE table_schema = DATABASE() AND table_name = 'world_meta'",
    )?;
    Ok(found.is_some())
}

fn read_meta(conn: &mut impl Queryable) -> mysql::Result<Option<WorldMeta>> {
    if !schema_exists(conn)? {
        return Ok(None);
    }
    let head: Option<(u32, i64, u64)> =
        conn.query_first("SELECT format_version, seed, created_at FROM world_meta WHERE id = 0")?;
    let Some((format_version, seed, created_at)) = head else {
        return Ok(None);
    };
    let plugins = conn.query_map(
        "SELECT id, version FROM plugins ORDER BY seq",
        |(id, version): (String, String)| PluginReference::new(id, version),
    )?;
    let palette = conn.query_map("SELECT name FROM voxel_palette ORDER BY id", |name: String| {
        name
    })?;
    Ok(Some(WorldMeta {
        format_version,
        seed,
        plugins,
        created_at,
        palette,
    }))
}

fn write_palette(conn: &mut Conn, palette: &[String]) -> mysql::Result<()> {
    let mut tx = conn.start_transaction(TxOpts::default())?;
    tx.query_drop("DELETE FROM voxel_palette")?;
    tx.exec_batch(
        "INSERT INTO voxel_palette (id, name) VALUES (?, ?)",
        palette
            .iter()
            .enumerate()
            .map(|(id, name)| (id as u32, name.as_str())),
    )?;
    tx.commit()
}

impl WorldSource for MariaDbSource {
    fn config_id(&self) -> &'static str {
        MARIADB_CONFIG_ID
    }

    fn location(&self) -> String {
        self.url.clone()
    }

    fn initialized(&self) -> Result<bool> {
        let mut conn = self.conn("check initialization")?.lock();
        read_meta(&mut *conn)
            .map(|meta| meta.is_some())
            .map_err(|e| StorageError::io("read world metadata", e))
    }

    fn init(&mut self, seed: i64, plugins: &[PluginReference]) -> Result<()> {
        let mut conn = self.conn("initialize world")?.lock();
        let init_err =
            |context: &'static str| move |e: mysql::Error| StorageError::init_caused(context, e);

        // DDL commits implicitly, so the schema goes in before the transaction.
        for statement in SCHEMA {
            conn.query_drop(*statement).map_err(init_err("create schema"))?;
        }

        let mut tx = conn
            .start_transaction(TxOpts::default())
            .map_err(init_err("begin transaction"))?;
        if let Some(existing) = read_meta(&mut tx).map_err(init_err("read world metadata"))? {
            return existing.check_reinit(seed, plugins);
        }
        let meta = WorldMeta::new(seed, plugins);
        tx.exec_drop(
            "INSERT INTO world_meta (id, format_version, seed, created_at) VALUES (0, ?, ?, ?)",
            (meta.format_version, meta.seed, meta.created_at),
        )
        .map_err(init_err("write world metadata"))?;
        tx.exec_batch(
            "INSERT INTO plugins (id, version) VALUES (?, ?)",
            plugins.iter().map(|p| (p.id.as_str(), p.version.as_str())),
        )
        .map_err(init_err("record plugins"))?;
        // Artifacts go in before the commit: if copying fails the transaction
        // rolls back and a retried init starts from scratch.
        let (copied, ()) = assets::copy_plugins_then(&self.dir, plugins, || {
            tx.commit().map_err(init_err("commit"))
        })?;
        drop(conn);

        info!(
            "initialized MariaDB world {} with seed {seed} ({} plugin artifact(s) copied)",
            self.url,
            copied.len()
        );
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
            let mut meta = read_meta(&mut *conn)
                .map_err(|e| StorageError::open_caused("read world metadata", e))?
                .ok_or_else(|| StorageError::open("world is not initialized"))?;
            if let Some(palette) = meta.validate(ctx, &ctx.plugins)? {
                write_palette(&mut conn, &palette)
                    .map_err(|e| StorageError::open_caused("record voxel palette", e))?;
                meta.palette = palette;
            }
            meta
        };
        info!("opened MariaDB world {} (seed {})", self.url, meta.seed);
        Ok(Box::new(MariaDbFormat { conn: lock, meta }))
    }

    fn close(&mut self) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| StorageError::closed("close world"))?;
        let mut conn = conn.into_inner();
        // Round trip first so a dead connection surfaces here; dropping the
        // connection then sends COM_QUIT.
        conn.query_drop("DO 1")
            .map_err(|e| StorageError::io("close MariaDB connection", e))?;
        drop(conn);
        info!("closed MariaDB world {}", self.url);
        Ok(())
    }
}

struct MariaDbFormat<'a> {
    conn: &'a Mutex<Conn>,
    meta: WorldMeta,
}

fn io_err(context: String) -> impl FnOnce(mysql::Error) -> StorageError {
    move |e| StorageError::io(context, e)
}

fn region_context(verb: &str, pos: RegionPos) -> String {
    format!("{verb} region ({}, {})", pos.x, pos.z)
}

impl WorldFormat for MariaDbFormat<'_> {
    fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    fn load_region(&self, pos: RegionPos) -> Result<Option<RegionData>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .lock()
            .exec_first("SELECT data FROM regions WHERE x = ? AND z = ?", (pos.x, pos.z))
            .map_err(io_err(region_context("load", pos)))?;
        blob.map(|b| {
            decode_region(&b).map_err(|e| StorageError::io(region_context("decode", pos), e))
        })
        .transpose()
    }

    fn region_exists(&self, pos: RegionPos) -> Result<bool> {
        let found: Option<u8> = self
            .conn
            .lock()
            .exec_first("SELECT 1 FROM regions WHERE x = ? AND z = ?", (pos.x, pos.z))
            .map_err(io_err(region_context("look up", pos)))?;
        Ok(found.is_some())
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
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .map_err(io_err("begin region save".into()))?;
        tx.exec_batch(
            UPSERT_REGION,
            blobs.iter().map(|(pos, blob)| (pos.x, pos.z, blob.as_slice())),
        )
        .map_err(io_err("save regions".into()))?;
        tx.commit().map_err(io_err("commit region save".into()))?;
        debug!("saved {} region(s)", blobs.len());
        Ok(())
    }

    fn delete_region(&self, pos: RegionPos) -> Result<bool> {
        let mut conn = self.conn.lock();
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .map_err(io_err(region_context("delete", pos)))?;
        let existed: Option<u8> = tx
            .exec_first(
                "SELECT 1 FROM regions WHERE x = ? AND z = ? FOR UPDATE",
                (pos.x, pos.z),
            )
            .map_err(io_err(region_context("look up", pos)))?;
        tx.exec_drop(
            "DELETE FROM entities WHERE region_x = ? AND region_z = ?",
            (pos.x, pos.z),
        )
        .map_err(io_err(region_context("delete entities of", pos)))?;
        tx.exec_drop("DELETE FROM regions WHERE x = ? AND z = ?", (pos.x, pos.z))
            .map_err(io_err(region_context("delete", pos)))?;
        tx.commit()
            .map_err(io_err(region_context("commit delete of", pos)))?;
        Ok(existed.is_some())
    }

    fn load_entities(&self, region: RegionPos) -> Result<Vec<EntityRecord>> {
        let context = region_context("load entities of", region);
        let rows: Vec<String> = self
            .conn
            .lock()
            .exec(
                "SELECT data FROM entities WHERE region_x = ? AND region_z = ? ORDER BY id",
                (region.x, region.z),
            )
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
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .map_err(io_err(context.clone()))?;
        tx.exec_drop(
            "DELETE FROM entities WHERE region_x = ? AND region_z = ?",
            (region.x, region.z),
        )
        .map_err(io_err(context.clone()))?;
        tx.exec_batch(
            UPSERT_ENTITY,
            rows.iter()
                .map(|(id, json)| (*id, region.x, region.z, json.as_str())),
        )
        .map_err(io_err(context.clone()))?;
        tx.commit().map_err(io_err(context))
    }

    fn load_player(&self, id: &str) -> Result<Option<PlayerRecord>> {
        let context = format!("load player {id}");
        let json: Option<String> = self
            .conn
            .lock()
            .exec_first("SELECT data FROM players WHERE id = ?", (id,))
            .map_err(io_err(context.clone()))?;
        json.map(|j| serde_json::from_str(&j).map_err(|e| StorageError::io(&context, e)))
            .transpose()
    }

    fn save_player(&self, id: &str, record: &PlayerRecord) -> Result<()> {
        let context = format!("save player {id}");
        let json = serde_json::to_string(record).map_err(|e| StorageError::io(&context, e))?;
        self.conn
            .lock()
            .exec_drop(UPSERT_PLAYER, (id, json))
            .map_err(io_err(context))
    }
}
