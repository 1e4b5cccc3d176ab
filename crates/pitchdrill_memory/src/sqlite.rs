use anyhow::{Context, Result};
use async_trait::async_trait;
use pitchdrill_core::{AnalysisStore, SavedAnalysis, StorageError};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;

#[derive(Clone)]
pub struct SqliteAnalysisStore {
    pool: Pool<Sqlite>,
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

impl SqliteAnalysisStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!("Analysis store ready at {}", db_path.as_ref().display());
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saved_analyses (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create saved_analyses table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_saved_analyses_created ON saved_analyses(created_at)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create saved_analyses index")?;

        Ok(())
    }

    pub async fn count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM saved_analyses")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.get("n"))
    }
}

#[async_trait]
impl AnalysisStore for SqliteAnalysisStore {
    async fn put(&self, key: &str, analysis: &SavedAnalysis) -> Result<(), StorageError> {
        let value = serde_json::to_string(analysis)?;
        sqlx::query("INSERT INTO saved_analyses (key, value, created_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<SavedAnalysis, StorageError> {
        let row = sqlx::query("SELECT value FROM saved_analyses WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let value: String = row.get("value");
        Ok(serde_json::from_str(&value)?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, SavedAnalysis)>, StorageError> {
        // substr instead of LIKE: keys contain '_', which LIKE treats as a wildcard.
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM saved_analyses
            WHERE substr(key, 1, length(?)) = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match serde_json::from_str::<SavedAnalysis>(&value) {
                Ok(record) => out.push((key, record)),
                Err(e) => tracing::warn!("Skipping unreadable analysis {}: {}", key, e),
            }
        }
        Ok(out)
    }
}
