//! World persistence: the `WorldSource`/`WorldFormat` abstraction, the region
//! codec, and the SQLite, MariaDB and LevelDB backends behind a provider table.

pub mod assets;
pub mod codec;
pub mod config;
pub mod error;
pub mod leveldb;
pub mod mariadb;
pub mod meta;
pub mod provider;
pub mod source;
pub mod sqlite;

pub use config::{MariaDbOptions, SqliteOptions, StorageConfig};
pub use error::{Result, StorageError};
pub use leveldb::{LevelDbProvider, LevelDbSource, LEVELDB_CONFIG_ID};
pub use mariadb::{MariaDbProvider, MARIADB_CONFIG_ID};
pub use meta::WorldMeta;
pub use provider::{Provider, ProviderRegistry};
pub use source::{
    EntityRecord, Panorama, PlayerRecord, PluginReference, ServerContext, WorldFormat,
    WorldSource, PANORAMA_SIZE,
};
pub use sqlite::{SqliteProvider, SqliteSource, SQLITE_CONFIG_ID};
