//! Release gate over a set of safety check results.

use serde::{Deserialize, Serialize};

use crate::check::{CheckStatus, SafetyCheck};

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the release may proceed to approval.
    pub passed: bool,

    /// Checks that stop the release (empty if passed).
    pub blocking: Vec<String>,

    /// Checks that passed with a warning.
    pub warnings: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Safety gate rules.
pub struct SafetyGate;

impl SafetyGate {
    /// Evaluate a check set.
    ///
    /// Gate rule:
    /// - A critical check that failed, or never reached a terminal status, blocks
    /// - Warnings never block but are reported so approval can escalate
    /// - An empty check set blocks: nothing was validated
    pub fn evaluate(checks: &[SafetyCheck]) -> GateVerdict {
        let blocking: Vec<String> = checks
            .iter()
            .filter(|c| c.is_blocking())
            .map(|c| {
                if c.status == CheckStatus::Failed {
                    format!("{}: {}", c.name, c.message)
                } else {
                    format!("{}: not evaluated", c.name)
                }
            })
            .collect();
        let warnings: Vec<String> = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warning)
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect();

        let passed = !checks.is_empty() && blocking.is_empty();
        let message = if checks.is_empty() {
            "No safety checks were run".to_string()
        } else if passed && warnings.is_empty() {
            "All safety checks passed".to_string()
        } else if passed {
            format!("Safety checks passed with {} warning(s)", warnings.len())
        } else {
            format!("Release blocked by {} check(s)", blocking.len())
        };

        GateVerdict {
            passed,
            blocking,
            warnings,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckKind;

    fn check(kind: CheckKind, status: CheckStatus, message: &str) -> SafetyCheck {
        SafetyCheck {
            status,
            message: message.to_string(),
            ..SafetyCheck::pending("run", kind)
        }
    }

    #[test]
    fn test_empty_checks_block() {
        let verdict = SafetyGate::evaluate(&[]);
        assert!(!verdict.passed);
    }

    #[test]
    fn test_all_passed() {
        let checks: Vec<_> = CheckKind::ALL
            .iter()
            .map(|k| check(*k, CheckStatus::Passed, "ok"))
            .collect();
        let verdict = SafetyGate::evaluate(&checks);
        assert!(verdict.passed);
        assert_eq!(verdict.message, "All safety checks passed");
    }

    #[test]
    fn test_warning_does_not_block() {
        let checks = vec![
            check(CheckKind::Syntax, CheckStatus::Passed, "ok"),
            check(CheckKind::Resources, CheckStatus::Warning, "close to limit"),
        ];
        let verdict = SafetyGate::evaluate(&checks);
        assert!(verdict.passed);
        assert_eq!(verdict.warnings, vec!["resources: close to limit".to_string()]);
    }

    #[test]
    fn test_failed_and_pending_block() {
        let checks = vec![
            check(CheckKind::Syntax, CheckStatus::Passed, "ok"),
            check(CheckKind::IoConflicts, CheckStatus::Failed, "1 I/O conflict(s)"),
            check(CheckKind::RuntimeLock, CheckStatus::Pending, ""),
        ];
        let verdict = SafetyGate::evaluate(&checks);
        assert!(!verdict.passed);
        assert_eq!(
            verdict.blocking,
            vec![
                "io_conflicts: 1 I/O conflict(s)".to_string(),
                "runtime_lock: not evaluated".to_string(),
            ]
        );
    }
}
