//! Named backend providers and `configID` resolution.
//!
//! Providers are listed explicitly in [`ProviderRegistry::builtin`]. A provider
//! may report itself unavailable (driver not compiled in, platform store
//! missing); resolution skips it instead of failing.

use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::leveldb::LevelDbProvider;
use crate::mariadb::MariaDbProvider;
use crate::source::WorldSource;
use crate::sqlite::SqliteProvider;

/// Factory for one backend family.
pub trait Provider: Send + Sync {
    /// Name used in configuration, e.g. `"SQLite"`.
    fn config_id(&self) -> &'static str;

    /// Whether this backend can be used in this process.
    fn available(&self) -> bool;

    /// Connect to the configured storage location.
    fn create(&self, config: &StorageConfig) -> Result<Box<dyn WorldSource>>;
}

pub struct ProviderRegistry {
    providers: Vec<Box<dyn Provider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderRegistry {
    /// Every backend shipped with this crate.
    pub fn builtin() -> Self {
        Self::with_providers(vec![
            Box::new(SqliteProvider),
            Box::new(MariaDbProvider),
            Box::new(LevelDbProvider),
        ])
    }

    pub fn with_providers(providers: Vec<Box<dyn Provider>>) -> Self {
        Self { providers }
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        self.providers.push(provider);
    }

    /// Providers that report themselves usable.
    pub fn available(&self) -> impl Iterator<Item = &dyn Provider> {
        self.providers
            .iter()
            .map(|p| &**p)
            .filter(|p| p.available())
    }

    /// Find an available provider by `configID` (ASCII case-insensitive).
    pub fn resolve(&self, config_id: &str) -> Result<&dyn Provider> {
        for provider in &self.providers {
            if !provider.config_id().eq_ignore_ascii_case(config_id) {
                continue;
            }
            if provider.available() {
                return Ok(&**provider);
            }
            debug!("storage backend {} is unavailable, skipping", provider.config_id());
        }
        Err(StorageError::UnknownBackend(config_id.to_string()))
    }

    /// Resolve the configured backend and connect to it.
    pub fn create_source(&self, config: &StorageConfig) -> Result<Box<dyn WorldSource>> {
        let provider = self.resolve(&config.backend)?;
        info!(
            "using {} storage at {}",
            provider.config_id(),
            config.directory.display()
        );
        provider.create(config)
    }
}
