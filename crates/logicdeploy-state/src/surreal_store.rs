//! SurrealDB-backed PipelineStore implementation
//!
//! Rows keep the record body as a JSON string so arbitrary pipeline
//! documents survive the round trip unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::storage_traits::{PipelineRecord, PipelineStore, RecordKind, StorageResult};

/// Environment variable naming the SurrealDB endpoint.
pub const DB_URL_ENV: &str = "LOGICDEPLOY_DB_URL";

/// Local persistence path used when no endpoint is configured.
pub const DEFAULT_DB_PATH: &str = ".logicdeploy/db";

const NAMESPACE: &str = "logicdeploy";
const DATABASE: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRecord {
    kind: String,
    record_id: String,
    release_id: String,
    body: String,
    updated_at: String,
}

impl DbRecord {
    fn from_record(record: &PipelineRecord) -> StorageResult<Self> {
        Ok(Self {
            kind: record.kind.as_str().to_string(),
            record_id: record.id.clone(),
            release_id: record.release_id.clone(),
            body: serde_json::to_string(&record.body)?,
            updated_at: record.updated_at.to_rfc3339(),
        })
    }

    fn into_record(self) -> StorageResult<PipelineRecord> {
        let kind: RecordKind = serde_json::from_value(serde_json::Value::String(self.kind))?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            .with_timezone(&Utc);
        Ok(PipelineRecord {
            kind,
            id: self.record_id,
            release_id: self.release_id,
            body: serde_json::from_str(&self.body)?,
            updated_at,
        })
    }
}

/// SurrealDB-backed implementation of [`PipelineStore`].
pub struct SurrealPipelineStore {
    db: Surreal<Any>,
}

impl SurrealPipelineStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `logicdeploy/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealPipelineStore connected ({})", url);
        Ok(Self { db })
    }

    /// Create from `LOGICDEPLOY_DB_URL`, falling back to local persistence
    /// under `.logicdeploy/db`.
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(url) = std::env::var(DB_URL_ENV) {
            return Self::connect(&url).await;
        }

        std::fs::create_dir_all(DEFAULT_DB_PATH).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                DEFAULT_DB_PATH, e
            ))
        })?;
        let url = format!("surrealkv://{}", DEFAULT_DB_PATH);
        info!("No {} found, using local persistence: {}", DB_URL_ENV, url);
        Self::connect(&url).await
    }
}

#[async_trait]
impl PipelineStore for SurrealPipelineStore {
    async fn put(&self, record: PipelineRecord) -> StorageResult<()> {
        let row = DbRecord::from_record(&record)?;
        debug!(kind = %record.kind, id = %record.id, "persisting pipeline record");

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE pipeline_records WHERE kind = $kind AND record_id = $rid; \
                 CREATE pipeline_records CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("kind", row.kind.clone()))
            .bind(("rid", row.record_id.clone()))
            .bind(("row", row))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .check()
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, kind: RecordKind, id: &str) -> StorageResult<Option<PipelineRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM pipeline_records WHERE kind = $kind AND record_id = $rid")
            .bind(("kind", kind.as_str().to_string()))
            .bind(("rid", id.to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbRecord> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().next().map(DbRecord::into_record).transpose()
    }

    async fn list(
        &self,
        kind: RecordKind,
        release_id: Option<&str>,
    ) -> StorageResult<Vec<PipelineRecord>> {
        let rows: Vec<DbRecord> = if let Some(rid) = release_id {
            let mut res = self
                .db
                .query(
                    "SELECT * FROM pipeline_records WHERE kind = $kind AND release_id = $rel \
                     ORDER BY record_id ASC",
                )
                .bind(("kind", kind.as_str().to_string()))
                .bind(("rel", rid.to_string()))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM pipeline_records WHERE kind = $kind ORDER BY record_id ASC")
                .bind(("kind", kind.as_str().to_string()))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            res.take(0)
                .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(DbRecord::into_record).collect()
    }
}
