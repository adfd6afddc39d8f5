//! logicdeploy-state: collaborator ports and SurrealDB persistence
//!
//! ## Layer 0 - Data/Persistence
//!
//! This crate owns every boundary the deployment pipeline crosses:
//!
//! - `VersioningCenter` and `TagDatabase`: read-only sources of releases,
//!   snapshots and critical tags
//! - `TargetRuntime`: the industrial controller reached for deploy,
//!   rollback and health calls
//! - `PipelineStore`: durable records that let the pipeline recover after a
//!   restart, with `SurrealPipelineStore` as the production backend
//!
//! In-memory fakes for all four live in [`fakes`].

mod error;
pub mod fakes;
pub mod migrations;
pub mod model;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{RuntimeError, StateError, StorageError};
pub use model::{
    ContentDigest, CriticalTag, LogicFile, ReleaseMetadata, ReleaseRecord, ReleaseStage,
    Snapshot, VendorDialect,
};
pub use storage_traits::{
    ChunkPayload, HealthSample, MaintenanceWindow, PipelineRecord, PipelineStore, RecordKind,
    RemoteState, RuntimeLock, RuntimeResult, StagedArtifact, StorageResult, TagDatabase,
    TargetRuntime, VersioningCenter,
};
pub use surreal_store::SurrealPipelineStore;

/// Result type for logicdeploy-state operations
pub type Result<T> = std::result::Result<T, StateError>;
