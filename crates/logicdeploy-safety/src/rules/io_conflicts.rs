use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::ExtractedFacts;

/// Fails when the I/O map is not one-to-one.
pub struct IoConflictsRule;

impl SafetyRule for IoConflictsRule {
    fn kind(&self) -> CheckKind {
        CheckKind::IoConflicts
    }

    fn evaluate(&self, _facts: &ExtractedFacts, _ctx: &CheckContext, agg: &mut Aggregates) -> RuleOutcome {
        let mut conflicts = Vec::new();

        for (address, names) in &agg.address_bindings {
            if names.len() > 1 {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                conflicts.push(format!("{address} mapped by {}", names.join(", ")));
            }
        }
        for (name, addresses) in &agg.identifier_bindings {
            if addresses.len() > 1 {
                let addresses: Vec<&str> = addresses.iter().map(|a| a.as_str()).collect();
                conflicts.push(format!("{name} mapped to {}", addresses.join(", ")));
            }
        }

        if conflicts.is_empty() {
            RuleOutcome::passed(format!(
                "{} I/O mapping(s), all unique",
                agg.address_bindings.len()
            ))
        } else {
            RuleOutcome::failed(format!("{} I/O conflict(s)", conflicts.len()), conflicts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use crate::rules::test_support::{context, facts};
    use crate::rules::DeclarationsRule;

    fn run(files: &[(&str, &str)]) -> RuleOutcome {
        let facts = facts(files);
        let ctx = context();
        let mut agg = Aggregates::default();
        DeclarationsRule.evaluate(&facts, &ctx, &mut agg);
        IoConflictsRule.evaluate(&facts, &ctx, &mut agg)
    }

    #[test]
    fn two_names_on_one_address_conflict() {
        let out = run(&[
            ("a.st", "PROGRAM A\nVAR Start AT %IX0.0 : BOOL; END_VAR\nEND_PROGRAM"),
            ("b.st", "PROGRAM B\nVAR Go AT %IX0.0 : BOOL; END_VAR\nEND_PROGRAM"),
        ]);
        assert_eq!(out.status, CheckStatus::Failed);
        assert_eq!(out.details, vec!["%IX0.0 mapped by GO, START".to_string()]);
    }

    #[test]
    fn one_name_on_two_addresses_conflicts() {
        let out = run(&[
            ("a.st", "PROGRAM A\nVAR Start AT %IX0.0 : BOOL; END_VAR\nEND_PROGRAM"),
            ("b.st", "PROGRAM B\nVAR Start AT %IX0.1 : BOOL; END_VAR\nEND_PROGRAM"),
        ]);
        assert_eq!(out.status, CheckStatus::Failed);
        assert!(out.details[0].starts_with("START mapped to"));
    }

    #[test]
    fn same_mapping_repeated_is_fine() {
        let out = run(&[
            ("a.st", "PROGRAM A\nVAR Start AT %IX0.0 : BOOL; END_VAR\nEND_PROGRAM"),
            ("b.st", "PROGRAM B\nVAR Start AT %IX0.0 : BOOL; END_VAR\nEND_PROGRAM"),
        ]);
        assert_eq!(out.status, CheckStatus::Passed);
    }
}
