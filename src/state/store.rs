//! Durable state interface and its SQLite implementation.
//!
//! The store persists one bot-state aggregate plus an audit log. Map keys
//! are escaped on the way in and unescaped on the way out (see
//! [`super::encode`]) so key-restricted document backends round-trip chat
//! and user ids containing dots.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use uuid::Uuid;

use super::encode::{decode_document, encode_document};
use super::model::{AuditRecord, AuditStatus, BotState};

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database rejected an operation.
    #[error("database error: {0}")]
    Database(String),
    /// The state document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Key-addressed document store for the bot-state aggregate plus an
/// append-only audit sink.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the aggregate, or `None` on first boot.
    async fn load(&self) -> Result<Option<BotState>, StoreError>;

    /// Atomically replace the aggregate.
    async fn save(&self, state: &BotState) -> Result<(), StoreError>;

    /// Append a new audit record.
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Move an audit record to its terminal status, attaching the parsed
    /// command(s) and outcome.
    async fn update_audit(
        &self,
        id: Uuid,
        status: AuditStatus,
        parsed: Option<&serde_json::Value>,
        response: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// SQLite-backed [`StateStore`] using `sqlx`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a private in-memory database (used by tests and dry runs).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bot_state (
                 id INTEGER PRIMARY KEY CHECK (id = 1),
                 document TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_log (
                 id TEXT PRIMARY KEY,
                 timestamp TEXT NOT NULL,
                 user_id TEXT NOT NULL,
                 chat_id TEXT NOT NULL,
                 raw_message TEXT NOT NULL,
                 parsed TEXT,
                 status TEXT NOT NULL,
                 response TEXT,
                 error TEXT
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load(&self) -> Result<Option<BotState>, StoreError> {
        let row = sqlx::query("SELECT document FROM bot_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row.try_get("document")?;
        let encoded: serde_json::Value = serde_json::from_str(&text)?;
        let state: BotState = serde_json::from_value(decode_document(&encoded))?;
        Ok(Some(state))
    }

    async fn save(&self, state: &BotState) -> Result<(), StoreError> {
        let document = encode_document(&serde_json::to_value(state)?);
        let text = serde_json::to_string(&document)?;
        sqlx::query(
            "INSERT INTO bot_state (id, document, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 document = excluded.document,
                 updated_at = excluded.updated_at",
        )
        .bind(text)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let parsed = record
            .parsed
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO audit_log
                 (id, timestamp, user_id, chat_id, raw_message, parsed, status, response, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(record.id.to_string())
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.user_id)
        .bind(&record.chat_id)
        .bind(&record.raw_message)
        .bind(parsed)
        .bind(record.status.as_str())
        .bind(&record.response)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_audit(
        &self,
        id: Uuid,
        status: AuditStatus,
        parsed: Option<&serde_json::Value>,
        response: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let parsed = parsed.map(serde_json::to_string).transpose()?;
        sqlx::query(
            "UPDATE audit_log SET status = ?2, parsed = ?3, response = ?4, error = ?5
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(parsed)
        .bind(response)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory [`StateStore`] for unit tests; records are inspectable.
#[derive(Default)]
pub struct MemoryStore {
    state: std::sync::Mutex<Option<BotState>>,
    audits: std::sync::Mutex<Vec<AuditRecord>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all audit records in write order.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audits
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<BotState>, StoreError> {
        self.state
            .lock()
            .map(|s| s.clone())
            .map_err(|e| StoreError::Database(format!("state lock poisoned: {e}")))
    }

    async fn save(&self, state: &BotState) -> Result<(), StoreError> {
        // Exercise the same encode/decode path a key-restricted backend uses.
        let encoded = encode_document(&serde_json::to_value(state)?);
        let decoded: BotState = serde_json::from_value(decode_document(&encoded))?;
        *self
            .state
            .lock()
            .map_err(|e| StoreError::Database(format!("state lock poisoned: {e}")))? = Some(decoded);
        Ok(())
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.audits
            .lock()
            .map_err(|e| StoreError::Database(format!("audit lock poisoned: {e}")))?
            .push(record.clone());
        Ok(())
    }

    async fn update_audit(
        &self,
        id: Uuid,
        status: AuditStatus,
        parsed: Option<&serde_json::Value>,
        response: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut audits = self
            .audits
            .lock()
            .map_err(|e| StoreError::Database(format!("audit lock poisoned: {e}")))?;
        if let Some(record) = audits.iter_mut().find(|r| r.id == id) {
            record.status = status;
            record.parsed = parsed.cloned();
            record.response = response.map(str::to_owned);
            record.error = error.map(str::to_owned);
        }
        Ok(())
    }
}
