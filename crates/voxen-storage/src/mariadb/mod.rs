//! Relational server backend on MariaDB.
//!
//! The driver is optional: without the `mariadb` cargo feature the provider is
//! still listed but reports itself unavailable, and resolving it fails before
//! any connection is attempted.

#[cfg(feature = "mariadb")]
mod backend;

#[cfg(feature = "mariadb")]
pub use backend::MariaDbSource;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::provider::Provider;
use crate::source::WorldSource;

pub const MARIADB_CONFIG_ID: &str = "MariaDB";

pub struct MariaDbProvider;

impl Provider for MariaDbProvider {
    fn config_id(&self) -> &'static str {
        MARIADB_CONFIG_ID
    }

    fn available(&self) -> bool {
        cfg!(feature = "mariadb")
    }

    #[cfg(feature = "mariadb")]
    fn create(&self, config: &StorageConfig) -> Result<Box<dyn WorldSource>> {
        Ok(Box::new(MariaDbSource::connect(
            &config.directory,
            &config.mariadb,
        )?))
    }

    #[cfg(not(feature = "mariadb"))]
    fn create(&self, _config: &StorageConfig) -> Result<Box<dyn WorldSource>> {
        Err(StorageError::connection(
            MARIADB_CONFIG_ID,
            "MariaDB driver not compiled in (enable the `mariadb` feature)",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> StorageConfig {
        let mut config = StorageConfig::new(MARIADB_CONFIG_ID, std::env::temp_dir());
        config.mariadb.url = url.to_string();
        config
    }

    #[test]
    fn availability_follows_feature() {
        assert_eq!(MariaDbProvider.available(), cfg!(feature = "mariadb"));
        assert_eq!(MariaDbProvider.config_id(), "MariaDB");
    }

    #[cfg(not(feature = "mariadb"))]
    #[test]
    fn create_without_driver_is_connection_error() {
        let err = MariaDbProvider
            .create(&config("mysql://localhost/world"))
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Connection { backend: "MariaDB", .. }));
    }

    #[cfg(feature = "mariadb")]
    #[test]
    fn malformed_url_is_connection_error() {
        let err = MariaDbProvider.create(&config("not a url")).err().unwrap();
        assert!(matches!(err, StorageError::Connection { backend: "MariaDB", .. }));
    }
}
