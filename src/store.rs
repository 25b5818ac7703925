//! Persistence for health-check records and execution logs.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::StoreError;

/// Upper bound on health-check records returned by a single listing.
pub const HEALTH_CHECK_LIST_CAP: i64 = 1000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS status_checks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    client_name TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS execution_logs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    code TEXT NOT NULL,
    language TEXT NOT NULL,
    output TEXT NOT NULL,
    error TEXT,
    execution_time REAL NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_execution_logs_timestamp
    ON execution_logs (timestamp DESC, seq DESC);
"#;

/// One execution attempt, written once and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: String,
    pub code: String,
    pub language: String,
    pub output: String,
    pub error: Option<String>,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn new(
        code: impl Into<String>,
        language: impl Into<String>,
        output: impl Into<String>,
        error: Option<String>,
        execution_time: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code: code.into(),
            language: language.into(),
            output: output.into(),
            error,
            execution_time,
            timestamp: now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub id: String,
    pub client_name: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError>;

    /// Newest first; entries sharing a timestamp come back in reverse insertion order.
    async fn list_recent_executions(&self, limit: u32)
        -> Result<Vec<ExecutionLogEntry>, StoreError>;

    async fn create_health_check(&self, client_name: &str)
        -> Result<HealthCheckRecord, StoreError>;

    /// Insertion order, capped at [`HEALTH_CHECK_LIST_CAP`].
    async fn list_health_checks(&self) -> Result<Vec<HealthCheckRecord>, StoreError>;

    async fn close(&self);
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// `database_url` is either `sqlite::memory:` or `sqlite://<directory>`;
    /// the database file `db_name` is created inside that directory.
    pub async fn connect(database_url: &str, db_name: &str) -> Result<Self, StoreError> {
        if database_url == "sqlite::memory:" {
            return Self::in_memory().await;
        }

        let dir = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .ok_or_else(|| {
                StoreError::Config(format!(
                    "unsupported DATABASE_URL {:?}, expected sqlite://<dir> or sqlite::memory:",
                    database_url
                ))
            })?;
        if db_name.is_empty() {
            return Err(StoreError::Config("DB_NAME must not be empty".to_string()));
        }

        let path = Path::new(dir).join(db_name);
        info!(path = %path.display(), "Opening SQLite database");

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private database living as long as the store; used by tests and `sqlite::memory:`.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // Every connection would get its own empty database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!("Record store schema ready");
        Ok(Self { pool })
    }

    fn row_to_entry(row: &SqliteRow) -> Result<ExecutionLogEntry, StoreError> {
        Ok(ExecutionLogEntry {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            language: row.try_get("language")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            execution_time: row.try_get("execution_time")?,
            timestamp: parse_timestamp(row.try_get("timestamp")?)?,
        })
    }

    fn row_to_health_check(row: &SqliteRow) -> Result<HealthCheckRecord, StoreError> {
        Ok(HealthCheckRecord {
            id: row.try_get("id")?,
            client_name: row.try_get("client_name")?,
            timestamp: parse_timestamp(row.try_get("timestamp")?)?,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (
                id, code, language, output, error, execution_time, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.code)
        .bind(&entry.language)
        .bind(&entry.output)
        .bind(&entry.error)
        .bind(entry.execution_time)
        .bind(format_timestamp(&entry.timestamp))
        .execute(&self.pool)
        .await?;

        debug!(id = %entry.id, language = %entry.language, "Execution log appended");
        Ok(())
    }

    async fn list_recent_executions(
        &self,
        limit: u32,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, language, output, error, execution_time, timestamp
            FROM execution_logs
            ORDER BY timestamp DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn create_health_check(
        &self,
        client_name: &str,
    ) -> Result<HealthCheckRecord, StoreError> {
        let record = HealthCheckRecord {
            id: uuid::Uuid::new_v4().to_string(),
            client_name: client_name.to_string(),
            timestamp: now(),
        };

        sqlx::query("INSERT INTO status_checks (id, client_name, timestamp) VALUES (?, ?, ?)")
            .bind(&record.id)
            .bind(&record.client_name)
            .bind(format_timestamp(&record.timestamp))
            .execute(&self.pool)
            .await?;

        Ok(record)
    }

    async fn list_health_checks(&self) -> Result<Vec<HealthCheckRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, client_name, timestamp FROM status_checks ORDER BY seq ASC LIMIT ?",
        )
        .bind(HEALTH_CHECK_LIST_CAP)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_health_check).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Record store closed");
    }
}

/// Current time at the precision the store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StoreError> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(parsed) => Ok(parsed.with_timezone(&Utc)),
        Err(source) => Err(StoreError::Timestamp { value, source }),
    }
}
