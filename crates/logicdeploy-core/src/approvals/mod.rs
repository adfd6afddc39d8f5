//! Multi-party approval workflow for releases.
//!
//! - **Role slots**: one slot per required role plus open slots up to the
//!   policy minimum; safety warnings escalate the slot count.
//! - **Modes**: parallel, sequential or majority quorum.
//! - **Two-person rule**: one person fills at most one slot per release.
//! - **Emergency bypass**: policy-gated force approval with a mandatory
//!   justification.
//! - **Audit trail**: every decision is recorded in a hash-chained log.

pub mod audit;
pub mod engine;
pub mod error;
pub mod manager;
pub mod policy;
pub mod slot;

pub use audit::{read_audit_trail, write_audit_trail, AuditAction, AuditEntry, AuditTrail};
pub use engine::{bypass, evaluate_round, expire_round, open_round, submit_decision};
pub use error::{ApprovalError, ApprovalResult};
pub use manager::ApprovalManager;
pub use policy::{ApprovalMode, ApprovalPolicy};
pub use slot::{
    ApprovalDecision, ApprovalRound, ApprovalStatus, Approver, BypassRecord, DeployApproval,
    RoundStatus,
};
