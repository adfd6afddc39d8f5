//! Deployment domain records.

pub mod checkpoint;
pub mod deployment;
pub mod error;
pub mod rollback;

pub use checkpoint::Checkpoint;
pub use deployment::{
    Deployment, DeploymentFailure, DeploymentStatus, LogLevel, ProgressEntry, StartRequest,
    StrategyKind,
};
pub use error::{PipelineError, PipelineResult};
pub use rollback::{Rollback, RollbackStatus};
