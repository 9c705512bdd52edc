//! Storage configuration, read from the `[storage]` section of `server.toml`.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Provider `configID`, e.g. `"SQLite"`.
    pub backend: String,
    /// World directory. Holds the database files and auxiliary assets.
    pub directory: PathBuf,
    #[serde(default)]
    pub sqlite: SqliteOptions,
    #[serde(default)]
    pub mariadb: MariaDbOptions,
}

impl StorageConfig {
    pub fn new(backend: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            backend: backend.into(),
            directory: directory.into(),
            sqlite: SqliteOptions::default(),
            mariadb: MariaDbOptions::default(),
        }
    }
}

/// Durability and consistency settings applied before first use.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteOptions {
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
    #[serde(default = "default_synchronous")]
    pub synchronous: String,
    #[serde(default = "default_locking_mode")]
    pub locking_mode: String,
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_journal_mode() -> String {
    "WAL".into()
}

fn default_synchronous() -> String {
    "NORMAL".into()
}

fn default_locking_mode() -> String {
    "EXCLUSIVE".into()
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            journal_mode: default_journal_mode(),
            synchronous: default_synchronous(),
            locking_mode: default_locking_mode(),
            foreign_keys: default_true(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MariaDbOptions {
    /// e.g. `mysql://db.example:3306/voxen`
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}
