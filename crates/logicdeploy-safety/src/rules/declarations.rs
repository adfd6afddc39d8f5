use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::{ExtractedFacts, FactNoteKind};
use crate::reserved::{self, TypeShape};

/// Fails on same-scope redeclaration; warns on degraded files, rejected
/// identifiers and unknown types. Publishes the I/O binding table.
pub struct DeclarationsRule;

fn type_is_known(facts: &ExtractedFacts, var_type: &str) -> bool {
    match TypeShape::parse(var_type).base_name() {
        None => true,
        Some(base) => {
            reserved::is_builtin_type(base)
                || reserved::is_standard_fb(base)
                || facts.is_user_type(base)
                || facts.pou(base).is_some()
        }
    }
}

impl SafetyRule for DeclarationsRule {
    fn kind(&self) -> CheckKind {
        CheckKind::Declarations
    }

    fn evaluate(&self, facts: &ExtractedFacts, _ctx: &CheckContext, agg: &mut Aggregates) -> RuleOutcome {
        for binding in &facts.bindings {
            agg.address_bindings
                .entry(binding.address.clone())
                .or_default()
                .insert(binding.name.clone());
            agg.identifier_bindings
                .entry(binding.name.clone())
                .or_default()
                .insert(binding.address.clone());
        }

        if !facts.redeclarations.is_empty() {
            return RuleOutcome::failed(
                format!("{} redeclaration(s)", facts.redeclarations.len()),
                facts
                    .redeclarations
                    .iter()
                    .map(|r| {
                        format!(
                            "{}:{}: {} already declared in {} at line {}",
                            r.file, r.line, r.name, r.scope, r.first_line
                        )
                    })
                    .collect(),
            );
        }

        let mut warnings = Vec::new();
        for note in facts
            .notes
            .iter()
            .filter(|n| n.kind == FactNoteKind::ExtractionDegraded)
        {
            warnings.push(format!("{}:{}: {}", note.file, note.line, note.message));
        }
        for rejected in &facts.rejected_identifiers {
            warnings.push(format!(
                "{}:{}: {} is a reserved word and was ignored",
                rejected.file, rejected.line, rejected.name
            ));
        }
        for decl in facts.declarations.values() {
            if !type_is_known(facts, &decl.var_type) {
                warnings.push(format!(
                    "{}:{}: {} has unknown type {}",
                    decl.file, decl.line, decl.name, decl.var_type
                ));
            }
        }

        if warnings.is_empty() {
            RuleOutcome::passed(format!("{} declaration(s)", facts.declarations.len()))
        } else {
            RuleOutcome::warning(
                format!("{} declaration warning(s)", warnings.len()),
                warnings,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use crate::rules::test_support::{context, facts};

    fn run(files: &[(&str, &str)]) -> (RuleOutcome, Aggregates) {
        let mut agg = Aggregates::default();
        let out = DeclarationsRule.evaluate(&facts(files), &context(), &mut agg);
        (out, agg)
    }

    #[test]
    fn redeclaration_fails() {
        let (out, _) = run(&[(
            "a.st",
            "PROGRAM A\nVAR x : INT; END_VAR\nVAR x : INT; END_VAR\nEND_PROGRAM",
        )]);
        assert_eq!(out.status, CheckStatus::Failed);
    }

    #[test]
    fn unknown_type_warns() {
        let (out, _) = run(&[("a.st", "PROGRAM A\nVAR m : Mystery; END_VAR\nEND_PROGRAM")]);
        assert_eq!(out.status, CheckStatus::Warning);
        assert!(out.details[0].contains("MYSTERY"));
    }

    #[test]
    fn fb_instances_and_user_types_are_known() {
        let (out, _) = run(&[(
            "a.st",
            "TYPE Mode : (Auto, Manual); END_TYPE\n\
             FUNCTION_BLOCK Valve\nEND_FUNCTION_BLOCK\n\
             PROGRAM A\nVAR v : Valve; m : Mode; t : TON; txt : STRING[10]; END_VAR\nEND_PROGRAM",
        )]);
        assert_eq!(out.status, CheckStatus::Passed, "{:?}", out.details);
    }

    #[test]
    fn il_mnemonic_names_are_rejected() {
        let (out, _) = run(&[(
            "a.st",
            "PROGRAM A\nVAR s : BOOL; r : BOOL; ok : BOOL; END_VAR\nEND_PROGRAM",
        )]);
        assert_eq!(out.status, CheckStatus::Warning);
        assert!(out.details.iter().any(|d| d.contains("S is a reserved word")));
        assert!(out.details.iter().any(|d| d.contains("R is a reserved word")));
    }

    #[test]
    fn degraded_file_warns() {
        let (out, _) = run(&[("a.st", "PROGRAM A\nVAR x INT; END_VAR\nEND_PROGRAM")]);
        assert_eq!(out.status, CheckStatus::Warning);
    }

    #[test]
    fn bindings_are_published() {
        let (_, agg) = run(&[(
            "a.st",
            "PROGRAM A\nVAR Start AT %IX0.0 : BOOL; Stop AT %IX0.1 : BOOL; END_VAR\nEND_PROGRAM",
        )]);
        assert_eq!(agg.address_bindings.len(), 2);
        assert_eq!(agg.addresses_of("START").count(), 1);
    }
}
