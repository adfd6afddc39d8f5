//! Logic fact extraction and pre-deployment safety checks.
//!
//! Provides:
//! - A tokenizer for IEC 61131-3 structured text and Siemens SCL exports
//! - Deterministic extraction of declarations, I/O mappings and write sites
//! - Eight ordered safety rules with streamed progress
//! - A gate that turns a check set into a release verdict

pub mod check;
pub mod context;
pub mod error;
pub mod extract;
pub mod facts;
pub mod gate;
pub mod lexer;
pub mod loader;
pub mod pipeline;
pub mod reserved;
pub mod rules;

pub use check::{CheckKind, CheckSeverity, CheckStatus, CheckUpdate, SafetyCheck, SafetyRun};
pub use context::{CheckContext, ResourceLimits, TargetProfile};
pub use error::{Result, SafetyError};
pub use extract::extract;
pub use facts::{
    Declaration, ExtractedFacts, FactNote, FactNoteKind, FileSummary, IoAccess, IoAddress,
    IoBinding, IoUsage, PouFact, PouKind, StructureIssue, StructureIssueKind, VarSection,
    WriteSite, WriteTarget, GLOBAL_SCOPE,
};
pub use gate::{GateVerdict, SafetyGate};
pub use loader::load_dir;
pub use pipeline::SafetyPipeline;
pub use rules::{Aggregates, RuleOutcome, SafetyRule};
