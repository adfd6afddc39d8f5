//! Append-only, hash-chained audit trail of approval activity.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{ApprovalError, ApprovalResult};

/// Digest the first entry chains from.
pub const GENESIS_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum AuditAction {
    RoundOpened { slots: usize },
    Decision { approval_id: String, decision: String },
    Bypass { justification: String, forced: usize },
    TimedOut,
    Superseded { by_round: String },
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub release_id: String,
    pub round_id: String,
    pub actor: String,
    #[serde(flatten)]
    pub action: AuditAction,
    pub comment: Option<String>,
    pub prev_digest: String,
    /// SHA-256 over `prev_digest` and the entry body.
    pub digest: String,
}

#[derive(Serialize)]
struct EntryBody<'a> {
    seq: u64,
    at: &'a DateTime<Utc>,
    release_id: &'a str,
    round_id: &'a str,
    actor: &'a str,
    action: &'a AuditAction,
    comment: &'a Option<String>,
}

impl AuditEntry {
    fn compute_digest(&self) -> String {
        let body = EntryBody {
            seq: self.seq,
            at: &self.at,
            release_id: &self.release_id,
            round_id: &self.round_id,
            actor: &self.actor,
            action: &self.action,
            comment: &self.comment,
        };
        let json = serde_json::to_vec(&body).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.prev_digest.as_bytes());
        hasher.update(&json);
        hex::encode(hasher.finalize())
    }
}

/// Ordered audit entries; each digest covers its predecessor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a trail from stored entries, ordered by sequence number.
    pub fn from_entries(mut entries: Vec<AuditEntry>) -> Self {
        entries.sort_by_key(|e| e.seq);
        Self { entries }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry and return it.
    pub fn append(
        &mut self,
        release_id: &str,
        round_id: &str,
        actor: &str,
        action: AuditAction,
        comment: Option<String>,
        at: DateTime<Utc>,
    ) -> &AuditEntry {
        let prev_digest = self
            .entries
            .last()
            .map(|e| e.digest.clone())
            .unwrap_or_else(|| GENESIS_DIGEST.to_string());
        let mut entry = AuditEntry {
            seq: self.entries.len() as u64 + 1,
            at,
            release_id: release_id.to_string(),
            round_id: round_id.to_string(),
            actor: actor.to_string(),
            action,
            comment,
            prev_digest,
            digest: String::new(),
        };
        entry.digest = entry.compute_digest();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Check the chain.
    ///
    /// # Errors
    ///
    /// Returns the sequence number of the first entry whose digest or link
    /// does not hold.
    pub fn verify(&self) -> Result<(), u64> {
        let mut prev = GENESIS_DIGEST.to_string();
        for entry in &self.entries {
            if entry.prev_digest != prev || entry.digest != entry.compute_digest() {
                return Err(entry.seq);
            }
            prev = entry.digest.clone();
        }
        Ok(())
    }

    /// Entries for one release, in order.
    pub fn for_release<'a>(&'a self, release_id: &'a str) -> impl Iterator<Item = &'a AuditEntry> {
        self.entries.iter().filter(move |e| e.release_id == release_id)
    }
}

/// Write an audit trail to disk as JSON.
pub fn write_audit_trail(trail: &AuditTrail, path: &Path) -> ApprovalResult<()> {
    let json =
        serde_json::to_string_pretty(trail).map_err(|e| ApprovalError::Audit(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| ApprovalError::Audit(e.to_string()))?;
    Ok(())
}

/// Read an audit trail from disk and verify its chain.
pub fn read_audit_trail(path: &Path) -> ApprovalResult<AuditTrail> {
    let data = std::fs::read_to_string(path).map_err(|e| ApprovalError::Audit(e.to_string()))?;
    let trail: AuditTrail =
        serde_json::from_str(&data).map_err(|e| ApprovalError::Audit(e.to_string()))?;
    trail
        .verify()
        .map_err(|seq| ApprovalError::Audit(format!("chain broken at entry {seq}")))?;
    Ok(trail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditTrail {
        let mut trail = AuditTrail::new();
        let now = Utc::now();
        trail.append("rel-1", "r1", "system", AuditAction::RoundOpened { slots: 2 }, None, now);
        trail.append(
            "rel-1",
            "r1",
            "eve",
            AuditAction::Decision {
                approval_id: "a1".into(),
                decision: "approve".into(),
            },
            Some("looks good".into()),
            now,
        );
        trail.append(
            "rel-1",
            "r1",
            "pat",
            AuditAction::Bypass {
                justification: "line down".into(),
                forced: 1,
            },
            None,
            now,
        );
        trail
    }

    #[test]
    fn test_chain_links_entries() {
        let trail = sample();
        assert_eq!(trail.entries()[0].prev_digest, GENESIS_DIGEST);
        assert_eq!(trail.entries()[1].prev_digest, trail.entries()[0].digest);
        assert_eq!(trail.verify(), Ok(()));
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut trail = sample();
        trail.entries[1].actor = "mallory".into();
        assert_eq!(trail.verify(), Err(2));
    }

    #[test]
    fn test_removed_entry_is_detected() {
        let mut trail = sample();
        trail.entries.remove(1);
        assert_eq!(trail.verify(), Err(3));
    }

    #[test]
    fn test_file_roundtrip_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        let trail = sample();
        write_audit_trail(&trail, &path).unwrap();
        let back = read_audit_trail(&path).unwrap();
        assert_eq!(trail, back);
    }

    #[test]
    fn test_tampered_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        write_audit_trail(&sample(), &path).unwrap();
        let data = std::fs::read_to_string(&path).unwrap().replace("line down", "routine");
        std::fs::write(&path, data).unwrap();
        assert!(matches!(read_audit_trail(&path), Err(ApprovalError::Audit(_))));
    }
}
