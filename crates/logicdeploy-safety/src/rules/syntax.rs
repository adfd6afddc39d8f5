use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::ExtractedFacts;

/// Fails on an empty snapshot, any structure issue, or no POU at all.
pub struct SyntaxRule;

impl SafetyRule for SyntaxRule {
    fn kind(&self) -> CheckKind {
        CheckKind::Syntax
    }

    fn evaluate(&self, facts: &ExtractedFacts, _ctx: &CheckContext, _agg: &mut Aggregates) -> RuleOutcome {
        if facts.files.is_empty() {
            return RuleOutcome::failed("snapshot contains no logic files", Vec::new());
        }
        if !facts.structure_issues.is_empty() {
            return RuleOutcome::failed(
                format!("{} structural issue(s)", facts.structure_issues.len()),
                facts.structure_issues.iter().map(|i| i.to_string()).collect(),
            );
        }
        if facts.pou_count() == 0 {
            return RuleOutcome::failed(
                "no program, function or function block found",
                facts.files.iter().map(|f| f.path.clone()).collect(),
            );
        }
        RuleOutcome::passed(format!(
            "{} POU(s) across {} file(s)",
            facts.pou_count(),
            facts.files.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use crate::rules::test_support::{context, facts};

    fn run(files: &[(&str, &str)]) -> RuleOutcome {
        SyntaxRule.evaluate(&facts(files), &context(), &mut Aggregates::default())
    }

    #[test]
    fn empty_snapshot_fails() {
        assert_eq!(run(&[]).status, CheckStatus::Failed);
    }

    #[test]
    fn unbalanced_block_fails() {
        let out = run(&[("a.st", "PROGRAM A\nIF x THEN\nEND_PROGRAM")]);
        assert_eq!(out.status, CheckStatus::Failed);
        assert!(out.details[0].contains("a.st:3"));
    }

    #[test]
    fn declarations_only_fails() {
        let out = run(&[("g.st", "VAR_GLOBAL g : INT; END_VAR")]);
        assert_eq!(out.status, CheckStatus::Failed);
    }

    #[test]
    fn well_formed_program_passes() {
        let out = run(&[("a.st", "PROGRAM A\nIF x THEN y := 1; END_IF;\nEND_PROGRAM")]);
        assert_eq!(out.status, CheckStatus::Passed);
        assert_eq!(out.message, "1 POU(s) across 1 file(s)");
    }
}
