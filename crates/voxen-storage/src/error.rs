//! Storage error taxonomy.
//!
//! Driver-specific errors never leave an adapter unwrapped; they are boxed as
//! the `source` of one of these variants.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot connect to {backend} storage: {source}")]
    Connection {
        backend: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("world initialization failed: {reason}")]
    Init {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("cannot open world: {reason}")]
    Open {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("storage I/O error while trying to {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),
}

impl StorageError {
    pub fn connection(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            backend,
            source: source.into(),
        }
    }

    pub fn init(reason: impl Into<String>) -> Self {
        Self::Init {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn init_caused(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Init {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn open(reason: impl Into<String>) -> Self {
        Self::Open {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn open_caused(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Open {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn io(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Any operation on a source whose connection was released.
    pub fn closed(context: impl Into<String>) -> Self {
        Self::io(context, "connection is closed")
    }
}
