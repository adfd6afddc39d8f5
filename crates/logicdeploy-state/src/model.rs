//! Records exchanged with the Versioning Center and Tag Database.
//!
//! These mirror what the collaborators hand us; nothing here is mutated by
//! the pipeline once fetched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor dialect of a logic file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorDialect {
    /// IEC 61131-3 structured text, including CODESYS exports.
    Iec61131,
    /// Siemens SCL.
    SiemensScl,
}

impl VendorDialect {
    /// Infer the dialect from a file extension. Unknown extensions yield `None`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "st" | "exp" | "iecst" => Some(Self::Iec61131),
            "scl" => Some(Self::SiemensScl),
            _ => None,
        }
    }

    /// Extensions a vendor export of this dialect is expected to carry.
    pub fn expected_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Iec61131 => &["st", "exp", "iecst"],
            Self::SiemensScl => &["scl"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iec61131 => "iec61131",
            Self::SiemensScl => "siemens_scl",
        }
    }
}

impl std::fmt::Display for VendorDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logic source file inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicFile {
    /// Path relative to the project root.
    pub path: String,
    pub dialect: VendorDialect,
    /// Raw source text.
    pub content: String,
    /// Size in bytes of `content`.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl LogicFile {
    pub fn new(
        path: impl Into<String>,
        dialect: VendorDialect,
        content: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            dialect,
            size: content.len() as u64,
            content,
            last_modified,
        }
    }

    /// File extension, lowercased, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

/// Immutable, ordered set of logic files linked to one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub version_id: String,
    pub files: Vec<LogicFile>,
}

impl Snapshot {
    pub fn new(
        snapshot_id: impl Into<String>,
        version_id: impl Into<String>,
        files: Vec<LogicFile>,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            version_id: version_id.into(),
            files,
        }
    }

    /// Deterministic digest over file paths and contents, in snapshot order.
    pub fn digest(&self) -> ContentDigest {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.path.as_bytes());
            hasher.update(b"\0");
            hasher.update(file.dialect.as_str().as_bytes());
            hasher.update(b"\0");
            hasher.update(file.content.as_bytes());
            hasher.update(b"\0");
        }
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn file(&self, path: &str) -> Option<&LogicFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Promotion stage of a release.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReleaseStage {
    Candidate,
    Staging,
    Production,
    Archived,
}

/// Deployment metadata carried by a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Identifiers of the target runtimes this release deploys to.
    pub target_runtimes: Vec<String>,
    /// Higher runs first when several releases queue.
    pub priority: u8,
}

/// A promoted, deployable bundle of a version's snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub release_id: String,
    pub project_id: String,
    pub version_id: String,
    pub snapshot_id: String,
    pub stage: ReleaseStage,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub metadata: ReleaseMetadata,
}

/// A tag flagged by the Tag Database as safety relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalTag {
    /// Tag name as declared in logic (compared case-insensitively).
    pub name: String,
    /// Physical address the tag is bound to, if any.
    pub address: Option<String>,
    /// Why the tag is critical (e.g. "emergency stop").
    pub description: String,
}

impl CriticalTag {
    pub fn new(name: impl Into<String>, address: Option<&str>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.map(str::to_string),
            description: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> LogicFile {
        LogicFile::new(path, VendorDialect::Iec61131, content, Utc::now())
    }

    #[test]
    fn dialect_from_extension() {
        assert_eq!(VendorDialect::from_extension("ST"), Some(VendorDialect::Iec61131));
        assert_eq!(VendorDialect::from_extension("scl"), Some(VendorDialect::SiemensScl));
        assert_eq!(VendorDialect::from_extension("txt"), None);
    }

    #[test]
    fn logic_file_size_tracks_content() {
        let f = file("main.st", "PROGRAM Main END_PROGRAM");
        assert_eq!(f.size, 24);
        assert_eq!(f.extension().as_deref(), Some("st"));
    }

    #[test]
    fn snapshot_digest_is_order_sensitive() {
        let a = file("a.st", "PROGRAM A END_PROGRAM");
        let b = file("b.st", "PROGRAM B END_PROGRAM");
        let s1 = Snapshot::new("s1", "v1", vec![a.clone(), b.clone()]);
        let s2 = Snapshot::new("s1", "v1", vec![b, a]);
        assert_ne!(s1.digest(), s2.digest());
        assert_eq!(s1.digest(), s1.clone().digest());
    }

    #[test]
    fn content_digest_rejects_bad_hex() {
        assert!(ContentDigest::try_from("xyz".to_string()).is_err());
        let d = ContentDigest::from_bytes(b"x");
        assert_eq!(ContentDigest::try_from(d.as_str().to_string()).unwrap(), d);
    }
}
