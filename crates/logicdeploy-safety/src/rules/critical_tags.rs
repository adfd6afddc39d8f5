use std::collections::{BTreeMap, BTreeSet};

use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::{ExtractedFacts, IoAddress, WriteTarget};

/// Fails when logic writes a critical tag, by name or through its address,
/// or binds a critical tag to a different address than registered.
pub struct CriticalTagsRule;

impl SafetyRule for CriticalTagsRule {
    fn kind(&self) -> CheckKind {
        CheckKind::CriticalTags
    }

    fn evaluate(&self, facts: &ExtractedFacts, ctx: &CheckContext, agg: &mut Aggregates) -> RuleOutcome {
        if ctx.critical_tags.is_empty() {
            return RuleOutcome::passed("no critical tags registered");
        }

        let by_name: BTreeMap<String, Option<IoAddress>> = ctx
            .critical_tags
            .iter()
            .map(|t| {
                (
                    t.name.to_ascii_uppercase(),
                    t.address.as_deref().and_then(IoAddress::parse),
                )
            })
            .collect();
        let critical_addresses: BTreeSet<&IoAddress> =
            by_name.values().flatten().collect();

        let mut violations = Vec::new();

        for site in &facts.write_sites {
            let hit = match &site.target {
                WriteTarget::Identifier(name) => {
                    if by_name.contains_key(name) {
                        Some(name.clone())
                    } else {
                        agg.addresses_of(name)
                            .find(|a| critical_addresses.contains(a))
                            .map(|a| format!("{name} (bound to {a})"))
                    }
                }
                WriteTarget::Address(a) => critical_addresses.contains(a).then(|| a.to_string()),
            };
            if let Some(what) = hit {
                violations.push(format!(
                    "{}:{}: {} writes critical tag {}",
                    site.file, site.line, site.scope, what
                ));
            }
        }

        for binding in &facts.bindings {
            if let Some(Some(registered)) = by_name.get(&binding.name) {
                if *registered != binding.address {
                    violations.push(format!(
                        "{}:{}: critical tag {} remapped from {} to {}",
                        binding.file, binding.line, binding.name, registered, binding.address
                    ));
                }
            }
        }

        if violations.is_empty() {
            RuleOutcome::passed(format!(
                "{} critical tag(s) untouched",
                ctx.critical_tags.len()
            ))
        } else {
            RuleOutcome::failed(
                format!("{} critical tag violation(s)", violations.len()),
                violations,
            )
        }
    }
}
