use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::{ExtractedFacts, WriteTarget};

/// Fails when an I/O point is written from more than one unarbitrated block.
///
/// Writes through an identifier count against every address the identifier
/// is mapped to; direct address writes count against the address itself.
/// Blocks are told apart by `file::scope`, so one POU writing the same
/// output from several places is a single writer.
pub struct RaceConditionsRule;

impl SafetyRule for RaceConditionsRule {
    fn kind(&self) -> CheckKind {
        CheckKind::RaceConditions
    }

    fn evaluate(&self, facts: &ExtractedFacts, _ctx: &CheckContext, agg: &mut Aggregates) -> RuleOutcome {
        for site in facts.write_sites.iter().filter(|s| !s.arbitrated) {
            let writer = format!("{}::{}", site.file, site.scope);
            let addresses: Vec<_> = match &site.target {
                WriteTarget::Identifier(name) => agg.addresses_of(name).cloned().collect(),
                WriteTarget::Address(a) => vec![a.clone()],
            };
            for address in addresses {
                agg.writers.entry(address).or_default().insert(writer.clone());
            }
        }

        let races: Vec<String> = agg
            .writers
            .iter()
            .filter(|(_, writers)| writers.len() > 1)
            .map(|(address, writers)| {
                let list: Vec<&str> = writers.iter().map(String::as_str).collect();
                format!("{address} written by {}", list.join(", "))
            })
            .collect();

        if races.is_empty() {
            RuleOutcome::passed(format!("{} written I/O point(s), no races", agg.writers.len()))
        } else {
            RuleOutcome::failed(
                format!("{} I/O point(s) with competing writers", races.len()),
                races,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use crate::rules::test_support::{context, facts};
    use crate::rules::DeclarationsRule;

    fn run(files: &[(&str, &str)]) -> (RuleOutcome, Aggregates) {
        let facts = facts(files);
        let ctx = context();
        let mut agg = Aggregates::default();
        DeclarationsRule.evaluate(&facts, &ctx, &mut agg);
        let out = RaceConditionsRule.evaluate(&facts, &ctx, &mut agg);
        (out, agg)
    }

    const GLOBALS: (&str, &str) = (
        "globals.st",
        "VAR_GLOBAL Pump AT %QX0.0 : BOOL; END_VAR",
    );

    #[test]
    fn two_programs_writing_one_output_race() {
        let (out, agg) = run(&[
            GLOBALS,
            ("a.st", "PROGRAM A\nPump := TRUE;\nEND_PROGRAM"),
            ("b.st", "PROGRAM B\n%QX0.0 := FALSE;\nEND_PROGRAM"),
        ]);
        assert_eq!(out.status, CheckStatus::Failed);
        assert!(out.details[0].starts_with("%QX0.0 written by a.st::A, b.st::B"));
        assert_eq!(agg.writers.len(), 1);
    }

    #[test]
    fn repeated_writes_in_one_block_are_one_writer() {
        let (out, _) = run(&[
            GLOBALS,
            ("a.st", "PROGRAM A\nPump := TRUE;\nIF x THEN Pump := FALSE; END_IF;\nEND_PROGRAM"),
        ]);
        assert_eq!(out.status, CheckStatus::Passed);
    }

    #[test]
    fn arbitrated_writer_is_ignored() {
        let (out, _) = run(&[
            GLOBALS,
            ("a.st", "PROGRAM A\nPump := TRUE;\nEND_PROGRAM"),
            ("b.st", "{arbitrated}\nPROGRAM B\nPump := FALSE;\nEND_PROGRAM"),
        ]);
        assert_eq!(out.status, CheckStatus::Passed);
    }

    #[test]
    fn unmapped_identifiers_do_not_race() {
        let (out, _) = run(&[
            ("a.st", "PROGRAM A\nVAR_EXTERNAL n : INT; END_VAR\nn := 1;\nEND_PROGRAM"),
            ("b.st", "PROGRAM B\nVAR_EXTERNAL n : INT; END_VAR\nn := 2;\nEND_PROGRAM"),
        ]);
        assert_eq!(out.status, CheckStatus::Passed);
    }
}
