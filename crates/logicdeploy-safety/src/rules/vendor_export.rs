use super::{Aggregates, RuleOutcome, SafetyRule};
use crate::check::CheckKind;
use crate::context::CheckContext;
use crate::facts::ExtractedFacts;

/// Validates that every file is a usable vendor export for every target.
pub struct VendorExportRule;

impl SafetyRule for VendorExportRule {
    fn kind(&self) -> CheckKind {
        CheckKind::VendorExport
    }

    fn evaluate(&self, facts: &ExtractedFacts, ctx: &CheckContext, _agg: &mut Aggregates) -> RuleOutcome {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for file in &facts.files {
            if file.blank {
                errors.push(format!("{}: file is empty", file.path));
            }
            if file.has_nul {
                errors.push(format!("{}: contains NUL bytes", file.path));
            }
            if file.size > ctx.limits.max_file_bytes {
                errors.push(format!(
                    "{}: {} bytes exceeds export limit of {}",
                    file.path, file.size, ctx.limits.max_file_bytes
                ));
            }
            for target in &ctx.targets {
                if !target.supported_dialects.contains(&file.dialect) {
                    errors.push(format!(
                        "{}: {} does not accept {} sources",
                        file.path, target.target_id, file.dialect
                    ));
                }
            }
            let matches = file
                .extension
                .as_deref()
                .is_some_and(|ext| file.dialect.expected_extensions().contains(&ext));
            if !matches {
                warnings.push(format!(
                    "{}: extension {} is unusual for {}",
                    file.path,
                    file.extension.as_deref().unwrap_or("(none)"),
                    file.dialect
                ));
            }
        }

        if !errors.is_empty() {
            errors.extend(warnings);
            return RuleOutcome::failed("vendor export rejected", errors);
        }
        if !warnings.is_empty() {
            return RuleOutcome::warning(
                format!("{} export warning(s)", warnings.len()),
                warnings,
            );
        }
        RuleOutcome::passed(format!(
            "{} file(s) valid for {} target(s)",
            facts.files.len(),
            ctx.targets.len()
        ))
    }
}
