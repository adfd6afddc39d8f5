use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::ExtractedFacts;
use crate::reserved::TypeShape;

/// Compares estimated data and code size against the target limits.
pub struct ResourcesRule;

/// Data bytes of one declared type. Instances of user function blocks
/// count the FB's own declarations once.
fn type_bytes(facts: &ExtractedFacts, var_type: &str) -> u64 {
    let shape = TypeShape::parse(var_type);
    match shape.base_name() {
        Some(base) if facts.pou(base).is_some() => {
            let per_instance: u64 = facts
                .declarations
                .values()
                .filter(|d| d.scope == base)
                .map(|d| TypeShape::parse(&d.var_type).size())
                .sum();
            match shape {
                TypeShape::Array { elements, .. } => elements.saturating_mul(per_instance),
                _ => per_instance,
            }
        }
        _ => shape.size(),
    }
}

impl SafetyRule for ResourcesRule {
    fn kind(&self) -> CheckKind {
        CheckKind::Resources
    }

    fn evaluate(&self, facts: &ExtractedFacts, ctx: &CheckContext, agg: &mut Aggregates) -> RuleOutcome {
        let limits = &ctx.limits;
        agg.data_bytes = facts
            .declarations
            .values()
            .map(|d| type_bytes(facts, &d.var_type))
            .sum();
        agg.code_bytes = facts
            .totals
            .statement_lines
            .saturating_mul(limits.code_bytes_per_statement);

        let usage = [
            ("data", agg.data_bytes, limits.max_data_bytes),
            ("code", agg.code_bytes, limits.max_code_bytes),
        ];

        let over: Vec<String> = usage
            .iter()
            .filter(|(_, used, max)| used > max)
            .map(|(what, used, max)| format!("{what}: {used} bytes exceeds limit of {max}"))
            .collect();
        if !over.is_empty() {
            return RuleOutcome::failed("estimated size exceeds target limits", over);
        }

        let near: Vec<String> = usage
            .iter()
            .filter(|(_, used, max)| *used as f64 > *max as f64 * limits.warn_ratio)
            .map(|(what, used, max)| {
                format!(
                    "{what}: {used} of {max} bytes ({:.0}%)",
                    *used as f64 * 100.0 / (*max).max(1) as f64
                )
            })
            .collect();
        if !near.is_empty() {
            return RuleOutcome::warning("estimated size close to target limits", near);
        }

        RuleOutcome::passed(format!(
            "data {} bytes, code {} bytes",
            agg.data_bytes, agg.code_bytes
        ))
    }
}
