//! State persistence
//!
//! A small key-value store over SQLite used to snapshot queue state and
//! items for restart recovery. Keys are namespaced as
//! `category / base_key / key`; values are JSON.

use std::path::Path;

use ensemble_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::queue::types::{PlayerQueue, QueueItem};

/// Category for persisted queue snapshots
pub const CATEGORY_QUEUE_STATE: &str = "player_queue_state";

/// Key-value state store backed by SQLite
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (and create if needed) the state database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("state store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn in_memory() -> Result<Self> {
        // Tests run under a paused tokio clock, which auto-advances past any
        // pending timer whenever the runtime goes idle. A finite acquire
        // timeout would fire spuriously while another task holds the single
        // connection, so acquires must wait without a deadline here.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(u32::MAX as u64))
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS state (
                category TEXT NOT NULL,
                base_key TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (category, base_key, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, category: &str, base_key: &str, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM state WHERE category = ? AND base_key = ? AND key = ?",
        )
        .bind(category)
        .bind(base_key)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set(&self, category: &str, base_key: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO state (category, base_key, key, value, updated_at)
            VALUES (?, ?, ?, ?, datetime('now'))
            ON CONFLICT (category, base_key, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(category)
        .bind(base_key)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop everything stored under a base key (queue removal)
    pub async fn delete_base(&self, category: &str, base_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM state WHERE category = ? AND base_key = ?")
            .bind(category)
            .bind(base_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Typed snapshot helpers

    pub async fn save_queue(&self, queue: &PlayerQueue) -> Result<()> {
        let json = serde_json::to_string(queue)
            .map_err(|e| ensemble_common::Error::Internal(e.to_string()))?;
        self.set(
            CATEGORY_QUEUE_STATE,
            &queue.queue_id.to_string(),
            "state",
            &json,
        )
        .await
    }

    pub async fn load_queue(&self, queue_id: Uuid) -> Result<Option<PlayerQueue>> {
        let Some(json) = self
            .get(CATEGORY_QUEUE_STATE, &queue_id.to_string(), "state")
            .await?
        else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(queue) => Ok(Some(queue)),
            Err(err) => {
                // stale snapshot from an older schema: start fresh
                debug!(%queue_id, %err, "discarding unreadable queue snapshot");
                Ok(None)
            }
        }
    }

    pub async fn save_items(&self, queue_id: Uuid, items: &[QueueItem]) -> Result<()> {
        let json = serde_json::to_string(items)
            .map_err(|e| ensemble_common::Error::Internal(e.to_string()))?;
        self.set(CATEGORY_QUEUE_STATE, &queue_id.to_string(), "items", &json)
            .await
    }

    pub async fn load_items(&self, queue_id: Uuid) -> Result<Vec<QueueItem>> {
        let Some(json) = self
            .get(CATEGORY_QUEUE_STATE, &queue_id.to_string(), "items")
            .await?
        else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&json).unwrap_or_default())
    }

    pub async fn delete_queue(&self, queue_id: Uuid) -> Result<()> {
        self.delete_base(CATEGORY_QUEUE_STATE, &queue_id.to_string())
            .await
    }
}
