//! evmindex-storage — pluggable storage backends for the EVM tx index.
//!
//! Backends:
//! - memory: `MemoryKvStore` from `evmindex-core` (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "sqlite")]
pub mod sqlite;

use serde::{Deserialize, Serialize};

use evmindex_core::store::{KvStore, StoreError};

#[cfg(feature = "memory")]
pub use evmindex_core::store::MemoryKvStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKvStore;

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "sqlite")]
    Sqlite { path: String },
}

impl StorageBackend {
    /// Open the backend as a boxed store, ready to hand to `EvmTxIndexer`.
    pub async fn open(&self) -> Result<Box<dyn KvStore>, StoreError> {
        match self {
            Self::Memory => Ok(Box::new(evmindex_core::store::MemoryKvStore::new())),
            #[cfg(feature = "sqlite")]
            Self::Sqlite { path } => Ok(Box::new(SqliteKvStore::open(path).await?)),
        }
    }
}
