//! Repository Implementation

use crate::StorageError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info};

/// `created_at` text layout (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS history_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type TEXT NOT NULL,
    result_url TEXT NOT NULL,
    before_image_url TEXT NOT NULL,
    after_image_url TEXT,
    detection_metrics_json TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

const SELECT_COLUMNS: &str = "SELECT id, task_type, result_url, before_image_url, after_image_url, \
     detection_metrics_json, created_at FROM history_records";

/// A persisted analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub task_type: String,
    /// Result image, relative to the static root
    pub result_url: String,
    /// Input image (the "before" image for change detection)
    pub before_image_url: String,
    /// Second input, change detection only
    pub after_image_url: Option<String>,
    /// Task metrics serialized as JSON
    pub detection_metrics_json: String,
    pub created_at: String,
}

/// A history entry about to be inserted; the id and timestamp come from the store
#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub task_type: String,
    pub result_url: String,
    pub before_image_url: String,
    pub after_image_url: Option<String>,
    pub detection_metrics_json: String,
}

impl NewHistoryRecord {
    pub fn new<M: Serialize>(
        task_type: &str,
        result_url: &str,
        before_image_url: &str,
        after_image_url: Option<&str>,
        metrics: &M,
    ) -> Result<Self, StorageError> {
        let detection_metrics_json = serde_json::to_string(metrics)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        Ok(Self {
            task_type: task_type.to_string(),
            result_url: result_url.to_string(),
            before_image_url: before_image_url.to_string(),
            after_image_url: after_image_url.map(str::to_string),
            detection_metrics_json,
        })
    }
}

/// Pooled SQLite access to `history_records`
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Open (creating if needed) the database at `url` and ensure the schema exists
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        info!("Opening history database: {}", url);

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::DatabaseError(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Connect failed: {}", e)))?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    /// Private in-memory database (one connection that is never recycled)
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Connect failed: {}", e)))?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Schema setup failed: {}", e)))?;
        Ok(())
    }

    /// Append a record, returning its id
    pub async fn insert(&self, record: &NewHistoryRecord) -> Result<i64, StorageError> {
        let created_at = Utc::now().format(TIMESTAMP_FORMAT).to_string();

        let result = sqlx::query(
            "INSERT INTO history_records \
             (task_type, result_url, before_image_url, after_image_url, detection_metrics_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.task_type)
        .bind(&record.result_url)
        .bind(&record.before_image_url)
        .bind(&record.after_image_url)
        .bind(&record.detection_metrics_json)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Insert failed: {}", e)))?;

        let id = result.last_insert_rowid();
        debug!("Inserted {} history record with ID {}", record.task_type, id);
        Ok(id)
    }

    /// All records, newest first
    pub async fn list(&self) -> Result<Vec<HistoryRecord>, StorageError> {
        sqlx::query_as::<_, HistoryRecord>(&format!(
            "{} ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Query failed: {}", e)))
    }

    pub async fn get(&self, id: i64) -> Result<HistoryRecord, StorageError> {
        sqlx::query_as::<_, HistoryRecord>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Query failed: {}", e)))?
            .ok_or(StorageError::NotFound)
    }

    /// Delete by id; deleting a missing record is `NotFound`
    pub async fn delete(&self, id: i64) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM history_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Delete failed: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        debug!("Deleted history record {}", id);
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Query failed: {}", e)))
    }

    /// Close the pool, waiting for checked-out connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
