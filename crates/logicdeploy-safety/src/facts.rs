//! Structural facts derived from a snapshot.
//!
//! Everything here is plain data: ordered collections only, so two
//! extractions of the same snapshot compare equal.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use logicdeploy_state::{ContentDigest, VendorDialect};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Scope name used for declarations outside any POU.
pub const GLOBAL_SCOPE: &str = "<global>";

/// A direct I/O address in canonical uppercase form (`%IX0.1`, `%QW4`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IoAddress(String);

fn address_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^%[IQM][XBWDL]?\d+(\.\d+)*$").ok())
        .as_ref()
}

impl IoAddress {
    /// Parse and normalise an address; `None` if it is not a direct address.
    pub fn parse(text: &str) -> Option<Self> {
        let upper = text.trim().to_ascii_uppercase();
        let re = address_pattern()?;
        re.is_match(&upper).then_some(IoAddress(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Input (`I`), output (`Q`) or memory (`M`) area.
    pub fn area(&self) -> char {
        self.0.chars().nth(1).unwrap_or('M')
    }
}

impl std::fmt::Display for IoAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PouKind {
    Program,
    Function,
    FunctionBlock,
}

/// One program organisation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PouFact {
    pub name: String,
    pub kind: PouKind,
    pub file: String,
    pub line: u32,
    /// Writes in this POU go through an arbiter (`{arbitrated}` pragma).
    pub arbitrated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarSection {
    Var,
    Input,
    Output,
    InOut,
    Global,
    External,
    Temp,
    Stat,
    Config,
    Access,
}

impl VarSection {
    pub fn from_keyword(upper: &str) -> Option<Self> {
        Some(match upper {
            "VAR" => Self::Var,
            "VAR_INPUT" => Self::Input,
            "VAR_OUTPUT" => Self::Output,
            "VAR_IN_OUT" => Self::InOut,
            "VAR_GLOBAL" => Self::Global,
            "VAR_EXTERNAL" => Self::External,
            "VAR_TEMP" => Self::Temp,
            "VAR_STAT" => Self::Stat,
            "VAR_CONFIG" => Self::Config,
            "VAR_ACCESS" => Self::Access,
            _ => return None,
        })
    }
}

/// A declared identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Uppercased identifier.
    pub name: String,
    /// Normalised, uppercased type text.
    pub var_type: String,
    pub file: String,
    pub line: u32,
    pub section: VarSection,
    /// Owning POU, or [`GLOBAL_SCOPE`].
    pub scope: String,
    pub address: Option<IoAddress>,
}

/// One `AT` mapping, kept even when the identifier was deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoBinding {
    pub name: String,
    pub address: IoAddress,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoAccess {
    Read,
    Write,
}

/// A direct address referenced in a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoUsage {
    pub address: IoAddress,
    pub access: IoAccess,
    pub file: String,
    pub line: u32,
    pub scope: String,
}

/// Target of a write.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum WriteTarget {
    /// Uppercased base identifier (`MOTOR` for `Motor.Speed := ...`).
    Identifier(String),
    Address(IoAddress),
}

impl std::fmt::Display for WriteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteTarget::Identifier(n) => f.write_str(n),
            WriteTarget::Address(a) => write!(f, "{a}"),
        }
    }
}

/// An assignment or output binding in a POU body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSite {
    pub target: WriteTarget,
    /// Full lvalue text as written, uppercased.
    pub lvalue: String,
    pub file: String,
    pub line: u32,
    pub scope: String,
    pub arbitrated: bool,
}

/// Same identifier declared twice in one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redeclaration {
    pub name: String,
    pub file: String,
    pub line: u32,
    pub first_line: u32,
    pub scope: String,
}

/// Declared name that collides with the reserved vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedIdentifier {
    pub name: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserType {
    pub name: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StructureIssueKind {
    /// A closer that does not match the innermost open block.
    Mismatched { expected: String, found: String },
    /// A closer with nothing open.
    UnexpectedClose { found: String },
    /// A block still open at end of file.
    Unclosed { opener: String },
    /// A POU header inside another POU.
    NestedPou { outer: String, inner: String },
    UnterminatedComment,
    UnterminatedString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureIssue {
    pub file: String,
    pub line: u32,
    #[serde(flatten)]
    pub kind: StructureIssueKind,
}

impl std::fmt::Display for StructureIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: ", self.file, self.line)?;
        match &self.kind {
            StructureIssueKind::Mismatched { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            StructureIssueKind::UnexpectedClose { found } => write!(f, "unexpected {found}"),
            StructureIssueKind::Unclosed { opener } => write!(f, "{opener} is never closed"),
            StructureIssueKind::NestedPou { outer, inner } => {
                write!(f, "{inner} declared inside {outer}")
            }
            StructureIssueKind::UnterminatedComment => f.write_str("unterminated comment"),
            StructureIssueKind::UnterminatedString => f.write_str("unterminated string literal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactNoteKind {
    /// A declaration block could not be read; the file contributes no declarations.
    ExtractionDegraded,
    /// The file carries no tokens at all.
    EmptyFile,
}

/// Informational note attached to the facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactNote {
    pub kind: FactNoteKind,
    pub file: String,
    pub line: u32,
    pub message: String,
}

/// Per-file summary used by export validation and chunk planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    pub dialect: VendorDialect,
    pub extension: Option<String>,
    pub size: u64,
    pub lines: u32,
    pub blank: bool,
    pub has_nul: bool,
    pub degraded: bool,
    /// POUs defined here, uppercased.
    pub defines_pous: BTreeSet<String>,
    /// User types defined here, uppercased.
    pub defines_types: BTreeSet<String>,
    /// Type names and called names this file relies on, uppercased.
    pub references: BTreeSet<String>,
    /// Lines holding at least one body statement.
    pub statement_lines: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub files: usize,
    pub lines: u64,
    pub declarations: usize,
    pub io_usages: usize,
    pub write_sites: usize,
    pub statement_lines: u64,
}

/// Everything the safety checks know about a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub snapshot_id: String,
    pub snapshot_digest: ContentDigest,
    /// Deduplicated declarations keyed by uppercased name; first site wins.
    pub declarations: BTreeMap<String, Declaration>,
    pub bindings: Vec<IoBinding>,
    pub pous: Vec<PouFact>,
    pub program_count: usize,
    pub function_count: usize,
    pub function_block_count: usize,
    pub user_types: Vec<UserType>,
    pub io_usages: Vec<IoUsage>,
    pub write_sites: Vec<WriteSite>,
    pub redeclarations: Vec<Redeclaration>,
    pub rejected_identifiers: Vec<RejectedIdentifier>,
    pub structure_issues: Vec<StructureIssue>,
    pub notes: Vec<FactNote>,
    pub files: Vec<FileSummary>,
    pub totals: Totals,
}

impl ExtractedFacts {
    /// Case-insensitive declaration lookup.
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.get(&name.to_ascii_uppercase())
    }

    pub fn pou_count(&self) -> usize {
        self.program_count + self.function_count + self.function_block_count
    }

    /// Whether any file lost its declarations.
    pub fn is_degraded(&self) -> bool {
        self.notes
            .iter()
            .any(|n| n.kind == FactNoteKind::ExtractionDegraded)
    }

    pub fn pou(&self, name: &str) -> Option<&PouFact> {
        let upper = name.to_ascii_uppercase();
        self.pous.iter().find(|p| p.name == upper)
    }

    pub fn is_user_type(&self, upper: &str) -> bool {
        self.user_types.iter().any(|t| t.name == upper)
    }

    pub fn file(&self, path: &str) -> Option<&FileSummary> {
        self.files.iter().find(|f| f.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_address_normalises_case() {
        let a = IoAddress::parse("%qx1.7").expect("address");
        assert_eq!(a.as_str(), "%QX1.7");
        assert_eq!(a.area(), 'Q');
        assert!(IoAddress::parse("%I0.0").is_some());
        assert!(IoAddress::parse("%QW4").is_some());
    }

    #[test]
    fn io_address_rejects_non_addresses() {
        assert!(IoAddress::parse("%ZX1").is_none());
        assert!(IoAddress::parse("QX1.0").is_none());
        assert!(IoAddress::parse("%IX").is_none());
    }

    #[test]
    fn structure_issue_display() {
        let issue = StructureIssue {
            file: "main.st".into(),
            line: 4,
            kind: StructureIssueKind::Unclosed {
                opener: "IF".into(),
            },
        };
        assert_eq!(issue.to_string(), "main.st:4: IF is never closed");
    }
}
