//! SurrealDB schema migrations and initialization
//!
//! Sets up the single `pipeline_records` table the pipeline store writes
//! deployments, checkpoints, rollbacks, safety runs and approval rounds to.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all logicdeploy tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing logicdeploy SurrealDB schema");
    init_pipeline_records_table(db).await?;
    info!("logicdeploy schema initialization complete");
    Ok(())
}

/// Initialize `pipeline_records` table
///
/// Schema:
/// ```text
/// TABLE pipeline_records {
///   kind:        STRING (deployment | checkpoint | rollback | safety_run | approval_round | audit_entry)
///   record_id:   STRING (unique per kind)
///   release_id:  STRING (indexed)
///   body:        STRING (JSON document)
///   updated_at:  STRING (RFC 3339)
/// }
/// ```
async fn init_pipeline_records_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing pipeline_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS pipeline_records AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_kind_record_id ON TABLE pipeline_records COLUMNS kind, record_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_kind_release_id ON TABLE pipeline_records COLUMNS kind, release_id;
    "#;

    db.query(sql)
        .await?
        .check()
        .map_err(|e| crate::StateError::SchemaSetup(e.to_string()))?;
    info!("pipeline_records table initialized");
    Ok(())
}
