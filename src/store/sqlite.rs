//! SQLite-backed swap store

use super::{Namespace, SwapStore};
use crate::config::DatabaseConfig;
use crate::error::{SwapResult, SwapdError};
use crate::swap::{Cost, ReceiptUpdate, SwapBlob, SwapId, SwapReceipt};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Swap store over a single ordered `kv` table
pub struct SqliteSwapStore {
    pool: SqlitePool,
    /// Serializes read-modify-write cycles on receipts
    write_lock: Mutex<()>,
}

impl SqliteSwapStore {
    /// Open the store described by the database configuration
    pub async fn open(config: &DatabaseConfig) -> SwapResult<Self> {
        Self::connect(Path::new(&config.path), config.max_connections).await
    }

    /// Open (creating if missing) the database file at `path`
    pub async fn connect(path: &Path, max_connections: u32) -> SwapResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SwapdError::Config(format!("Cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;

        info!("Swap store opened at {}", path.display());
        Ok(store)
    }

    async fn run_migrations(&self) -> SwapResult<()> {
        // BLOB keys compare bytewise, which makes the table an ordered key space
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            ) WITHOUT ROWID
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> SwapResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, namespace: Namespace, id: &SwapId) -> SwapResult<Vec<u8>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(namespace.key(id)?)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.get::<Vec<u8>, _>("value"))
            .ok_or_else(|| SwapdError::NotFound {
                namespace: namespace.name(),
                id: id.to_string(),
            })
    }

    async fn put(&self, namespace: Namespace, id: &SwapId, value: Vec<u8>) -> SwapResult<()> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace.key(id)?)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ordered scan of one namespace
    async fn scan<T: DeserializeOwned>(&self, namespace: Namespace) -> SwapResult<Vec<T>> {
        let (start, end) = namespace.range();
        let rows = sqlx::query("SELECT value FROM kv WHERE key >= ? AND key < ? ORDER BY key")
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| decode(&row.get::<Vec<u8>, _>("value")))
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(&self, namespace: Namespace, id: &SwapId, value: &[u8]) {
        self.put(namespace, id, value.to_vec()).await.unwrap();
    }
}

fn encode<T: Serialize>(value: &T) -> SwapResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SwapResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl SwapStore for SqliteSwapStore {
    async fn put_swap(&self, blob: &SwapBlob) -> SwapResult<()> {
        let value = encode(&blob.redacted())?;
        let pending_key = Namespace::PendingSwaps.key(&blob.id)?;
        let swap_key = Namespace::Swaps.key(&blob.id)?;

        let mut tx = self.pool.begin().await?;
        for key in [pending_key, swap_key] {
            sqlx::query(
                "INSERT INTO kv (key, value) VALUES (?, ?) \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(&value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Stored swap {}", blob.id);
        Ok(())
    }

    async fn swap(&self, id: &SwapId) -> SwapResult<SwapBlob> {
        decode(&self.get(Namespace::Swaps, id).await?)
    }

    async fn swaps(&self) -> SwapResult<Vec<SwapBlob>> {
        self.scan(Namespace::Swaps).await
    }

    async fn delete_pending_swap(&self, id: &SwapId) -> SwapResult<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(Namespace::PendingSwaps.key(id)?)
            .execute(&self.pool)
            .await?;

        debug!("Removed swap {} from the in-flight index", id);
        Ok(())
    }

    async fn pending_swap(&self, id: &SwapId) -> SwapResult<SwapBlob> {
        decode(&self.get(Namespace::PendingSwaps, id).await?)
    }

    async fn pending_swaps(&self) -> SwapResult<Vec<SwapBlob>> {
        self.scan(Namespace::PendingSwaps).await
    }

    async fn put_receipt(&self, receipt: &SwapReceipt) -> SwapResult<()> {
        let value = encode(receipt)?;
        let _guard = self.write_lock.lock().await;
        self.put(Namespace::Receipts, &receipt.id, value).await
    }

    async fn update_receipt(&self, update: &ReceiptUpdate) -> SwapResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut receipt: SwapReceipt = decode(&self.get(Namespace::Receipts, &update.id).await?)?;
        update.apply(&mut receipt, Utc::now())?;
        self.put(Namespace::Receipts, &update.id, encode(&receipt)?)
            .await?;

        debug!("Updated receipt {} (status {:?})", update.id, receipt.status);
        Ok(())
    }

    async fn receipt(&self, id: &SwapId) -> SwapResult<SwapReceipt> {
        decode(&self.get(Namespace::Receipts, id).await?)
    }

    async fn receipts(&self) -> SwapResult<Vec<SwapReceipt>> {
        self.scan(Namespace::Receipts).await
    }

    async fn load_costs(&self, id: &SwapId) -> SwapResult<(Cost, Cost)> {
        match self.receipt(id).await {
            Ok(receipt) => Ok((receipt.send_cost, receipt.receive_cost)),
            Err(e) if e.is_not_found() => Ok((Cost::new(), Cost::new())),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    /// Store backed by a fresh database file; keep the dir alive with the store
    pub async fn temp_store() -> (TempDir, SqliteSwapStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSwapStore::connect(&dir.path().join("swapd.db"), 4)
            .await
            .unwrap();
        (dir, store)
    }
}
