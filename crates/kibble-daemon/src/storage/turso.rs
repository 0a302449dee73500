//! Turso (libSQL) backed key-value store

use anyhow::{Context, Result};
use async_trait::async_trait;
use libsql::{Builder, Connection, params};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{StateStore, StoreError};

#[derive(Clone)]
pub struct TursoStore {
    conn: Arc<Mutex<Connection>>,
}

impl TursoStore {
    /// Connect to a Turso database. `libsql://`/`https://` URLs go to a
    /// remote instance (auth token required); anything else is a local
    /// file path, optionally prefixed with `file:`.
    pub async fn connect(url: &str, auth_token: Option<&str>) -> Result<Self> {
        let db = if url.starts_with("libsql://") || url.starts_with("https://") {
            let token = auth_token
                .map(|s| s.to_string())
                .or_else(|| std::env::var("TURSO_AUTH_TOKEN").ok())
                .context("TURSO_AUTH_TOKEN required for remote database")?;

            Builder::new_remote(url.to_string(), token)
                .build()
                .await
                .context("Failed to connect to remote Turso database")?
        } else {
            let path = url.strip_prefix("file:").unwrap_or(url);
            Builder::new_local(path)
                .build()
                .await
                .context("Failed to open local database")?
        };

        let conn = db.connect().context("Failed to get database connection")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pet_records (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            (),
        )
        .await?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[async_trait]
impl StateStore for TursoStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(
                "SELECT body FROM pet_records WHERE key = ?1",
                params![key.to_string()],
            )
            .await
            .map_err(StoreError::unavailable)?;

        if let Some(row) = rows.next().await.map_err(StoreError::unavailable)? {
            let body: String = row.get(0).map_err(StoreError::unavailable)?;
            Ok(Some(body))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let timestamp = chrono::Utc::now().timestamp();

        conn.execute(
            r#"
            INSERT INTO pet_records (key, body, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
            params![key.to_string(), value.to_string(), timestamp],
        )
        .await
        .map_err(StoreError::unavailable)?;

        debug!(key, "persisted pet record");
        Ok(())
    }
}
