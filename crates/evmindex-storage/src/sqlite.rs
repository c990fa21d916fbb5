//! SQLite storage backend for the EVM tx index.
//!
//! Stores every entry in a single `kv` table keyed by a `BLOB` primary key.
//! SQLite compares blobs with `memcmp`, so `ORDER BY key` is byte order and
//! range scans behave like an ordered key-value store. A batch is applied
//! inside one SQL transaction.
//!
//! # Usage
//! ```rust,no_run
//! use evmindex_storage::sqlite::SqliteKvStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteKvStore::open("./evmindexer.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteKvStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use evmindex_core::store::{KvPair, KvStore, ScanDirection, StoreError, WriteBatch};

/// SQLite-backed ordered key-value store.
pub struct SqliteKvStore {
    pool: SqlitePool,
}

fn backend_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolClosed => StoreError::Closed,
        other => StoreError::Backend(other.to_string()),
    }
}

impl SqliteKvStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./evmindexer.db"`) or a full
    /// SQLite URL (`"sqlite:./evmindexer.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(backend_err)?;

        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection: every pooled connection to `:memory:`
    /// would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend_err)?;

        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), StoreError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(backend_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key   BLOB NOT NULL PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        direction: ScanDirection,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>, StoreError> {
        let sql = match direction {
            ScanDirection::Forward => {
                "SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key ASC LIMIT ?"
            }
            ScanDirection::Reverse => {
                "SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key DESC LIMIT ?"
            }
        };
        // a negative LIMIT means no limit in SQLite
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(sql)
            .bind(start)
            .bind(end)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let ops = batch.into_ops();
        let count = ops.len();
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        for (key, value) in ops {
            sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;
        }
        // dropping `tx` on an early return rolls the batch back
        tx.commit().await.map_err(backend_err)?;

        debug!(entries = count, "batch committed");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
