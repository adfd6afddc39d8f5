//! The eight builtin safety rules.
//!
//! Rules are deterministic functions of facts, context and the aggregates
//! earlier rules left behind.

mod critical_tags;
mod declarations;
mod io_conflicts;
mod races;
mod resources;
mod runtime_lock;
mod syntax;
mod vendor_export;

use std::collections::{BTreeMap, BTreeSet};

use crate::check::{CheckKind, CheckStatus};
use crate::context::CheckContext;
use crate::facts::{ExtractedFacts, IoAddress};

pub use critical_tags::CriticalTagsRule;
pub use declarations::DeclarationsRule;
pub use io_conflicts::IoConflictsRule;
pub use races::RaceConditionsRule;
pub use resources::ResourcesRule;
pub use runtime_lock::RuntimeLockRule;
pub use syntax::SyntaxRule;
pub use vendor_export::VendorExportRule;

/// Results shared between rules of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    /// Address -> identifiers mapped to it.
    pub address_bindings: BTreeMap<IoAddress, BTreeSet<String>>,
    /// Identifier -> addresses it is mapped to.
    pub identifier_bindings: BTreeMap<String, BTreeSet<IoAddress>>,
    /// Address -> unarbitrated writer blocks (`file::scope`).
    pub writers: BTreeMap<IoAddress, BTreeSet<String>>,
    pub data_bytes: u64,
    pub code_bytes: u64,
}

impl Aggregates {
    /// Addresses an identifier is bound to.
    pub fn addresses_of(&self, name: &str) -> impl Iterator<Item = &IoAddress> {
        self.identifier_bindings.get(name).into_iter().flatten()
    }
}

/// Outcome of one rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub status: CheckStatus,
    pub message: String,
    pub details: Vec<String>,
}

impl RuleOutcome {
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Passed,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            status: CheckStatus::Failed,
            message: message.into(),
            details,
        }
    }

    pub fn warning(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            status: CheckStatus::Warning,
            message: message.into(),
            details,
        }
    }
}

/// A single safety validator.
pub trait SafetyRule: Send + Sync {
    fn kind(&self) -> CheckKind;

    fn evaluate(
        &self,
        facts: &ExtractedFacts,
        ctx: &CheckContext,
        aggregates: &mut Aggregates,
    ) -> RuleOutcome;
}

/// The builtin rules in execution order.
pub fn builtin_rules() -> Vec<Box<dyn SafetyRule>> {
    vec![
        Box::new(SyntaxRule),
        Box::new(DeclarationsRule),
        Box::new(CriticalTagsRule),
        Box::new(ResourcesRule),
        Box::new(RaceConditionsRule),
        Box::new(IoConflictsRule),
        Box::new(VendorExportRule),
        Box::new(RuntimeLockRule),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use logicdeploy_state::{
        LogicFile, ReleaseMetadata, ReleaseRecord, ReleaseStage, Snapshot, VendorDialect,
    };

    use crate::context::CheckContext;
    use crate::extract::extract;
    use crate::facts::ExtractedFacts;

    pub fn facts(files: &[(&str, &str)]) -> ExtractedFacts {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let files = files
            .iter()
            .map(|(p, c)| {
                let dialect = if p.ends_with(".scl") {
                    VendorDialect::SiemensScl
                } else {
                    VendorDialect::Iec61131
                };
                LogicFile::new(*p, dialect, *c, ts)
            })
            .collect();
        extract(&Snapshot::new("snap", "ver", files))
    }

    pub fn context() -> CheckContext {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let release = ReleaseRecord {
            release_id: "rel-1".into(),
            project_id: "line-1".into(),
            version_id: "ver".into(),
            snapshot_id: "snap".into(),
            stage: ReleaseStage::Staging,
            created_by: "engineer".into(),
            created_at: ts,
            metadata: ReleaseMetadata {
                target_runtimes: vec!["plc-1".into()],
                priority: 0,
            },
        };
        CheckContext::new(release, ts)
    }
}
