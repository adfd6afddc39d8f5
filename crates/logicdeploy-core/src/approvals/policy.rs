//! Approval policy.

use serde::{Deserialize, Serialize};

/// How slot decisions combine into a quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Every slot approved, in any order.
    Parallel,
    /// Every slot approved, slot `i` only after all slots before it.
    Sequential,
    /// More than half of the slots approved.
    Majority,
}

/// Who must sign off before a release may deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalPolicy {
    pub mode: ApprovalMode,
    /// One slot per listed role, in order.
    pub required_roles: Vec<String>,
    /// Minimum slot count; missing slots are open to any eligible role.
    pub min_approvals: usize,
    /// Roles that may fill an open slot. Empty means anyone.
    pub eligible_roles: Vec<String>,
    /// Extra open slots per safety warning.
    pub warning_escalation: usize,
    /// One person may fill at most one slot per release.
    pub two_person_rule: bool,
    pub allow_bypass: bool,
    /// Roles allowed to force-approve in an emergency.
    pub bypass_roles: Vec<String>,
    /// Round lifetime. `None` means no timeout.
    pub timeout_secs: Option<u64>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl ApprovalPolicy {
    /// No approvals needed.
    pub fn permissive() -> Self {
        Self {
            mode: ApprovalMode::Parallel,
            required_roles: Vec::new(),
            min_approvals: 0,
            eligible_roles: Vec::new(),
            warning_escalation: 0,
            two_person_rule: false,
            allow_bypass: false,
            bypass_roles: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Standard policy with production defaults.
    ///
    /// | Slot | Role                  |
    /// |------|-----------------------|
    /// | 0    | controls_engineer     |
    /// | 1    | operations_supervisor |
    ///
    /// Warnings each add one slot for a safety engineer or either role above.
    /// Plant managers may bypass; rounds expire after one hour.
    pub fn standard() -> Self {
        Self {
            mode: ApprovalMode::Parallel,
            required_roles: vec!["controls_engineer".into(), "operations_supervisor".into()],
            min_approvals: 2,
            eligible_roles: vec![
                "controls_engineer".into(),
                "operations_supervisor".into(),
                "safety_engineer".into(),
            ],
            warning_escalation: 1,
            two_person_rule: true,
            allow_bypass: true,
            bypass_roles: vec!["plant_manager".into()],
            timeout_secs: Some(3600),
        }
    }

    pub fn with_mode(mut self, mode: ApprovalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_required_roles(mut self, roles: &[&str]) -> Self {
        self.required_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_min_approvals(mut self, min: usize) -> Self {
        self.min_approvals = min;
        self
    }

    pub fn with_timeout(mut self, secs: Option<u64>) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Total slots for a round raised with `warnings` safety warnings.
    pub fn slot_count(&self, warnings: usize) -> usize {
        self.required_roles.len().max(self.min_approvals) + warnings * self.warning_escalation
    }

    pub fn may_bypass(&self, role: &str) -> bool {
        self.allow_bypass && self.bypass_roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_count() {
        let policy = ApprovalPolicy::standard();
        assert_eq!(policy.slot_count(0), 2);
        assert_eq!(policy.slot_count(2), 4);

        let policy = ApprovalPolicy::standard()
            .with_required_roles(&["controls_engineer"])
            .with_min_approvals(3);
        assert_eq!(policy.slot_count(0), 3);
    }

    #[test]
    fn test_permissive_needs_nothing() {
        assert_eq!(ApprovalPolicy::permissive().slot_count(5), 0);
    }

    #[test]
    fn test_bypass_roles() {
        let policy = ApprovalPolicy::standard();
        assert!(policy.may_bypass("plant_manager"));
        assert!(!policy.may_bypass("controls_engineer"));
        assert!(!ApprovalPolicy::permissive().may_bypass("plant_manager"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let policy: ApprovalPolicy = toml::from_str("mode = \"majority\"").unwrap();
        assert_eq!(policy.mode, ApprovalMode::Majority);
        assert_eq!(policy.required_roles.len(), 2);
    }
}
