use std::path::Path;

use colored::Colorize;

use crate::error::{CategorizeError, Result};
use crate::lint::{check_rules, Assertions, Severity};
use crate::rules::RuleSet;
use crate::settings::load_config;
use crate::taxonomy::TaxonomyIndex;

/// `assertions` takes precedence over `paths.test_assertions`.
pub fn run(config: &Path, assertions: Option<&Path>) -> Result<()> {
    let cfg = load_config(config, None, None)?;
    let rules = RuleSet::load(
        &cfg.paths.category_mapping,
        &cfg.paths.keyword_rules,
        &cfg.paths.refinement_rules,
    )?;
    let taxonomy = TaxonomyIndex::load(&cfg.paths.taxonomy)?;
    let assertions = match assertions.or(cfg.paths.test_assertions.as_deref()) {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading rule assertions");
            Some(Assertions::load(path)?)
        }
        None => None,
    };
    let report = check_rules(&rules, &taxonomy, assertions.as_ref());

    for finding in &report.findings {
        let tag = match finding.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        println!("{tag}: {}", finding.message);
    }

    let errors = report.errors();
    println!(
        "{} mappings, {} keyword rules, {} supplier / {} context / {} cost center / {} override rules: {} error(s), {} warning(s)",
        rules.mapping.len(),
        rules.keywords.len(),
        rules.refinement.supplier.len(),
        rules.refinement.context.len(),
        rules.refinement.cost_center.len(),
        rules.refinement.overrides.len(),
        errors,
        report.warnings()
    );
    if errors > 0 {
        return Err(CategorizeError::CheckFailed(errors));
    }
    println!("{}", "Rules OK".green());
    Ok(())
}
