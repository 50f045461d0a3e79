//! Consistency checks over a client's rule files, run by `spendcat check`.
//!
//! Nothing here affects classification; the waterfall resolves conflicts by
//! rule order. These checks exist so that a rule author sees the conflicts.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::{CategorizeError, Result};
use crate::models::{DataQuality, IssueKind};
use crate::rules::{RefinementField, RefinementRule, RuleSet, Scalar};
use crate::settings::read_yaml;
use crate::taxonomy::TaxonomyIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct LintReport {
    pub findings: Vec<Finding>,
}

impl LintReport {
    fn error(&mut self, message: String) {
        self.findings.push(Finding {
            severity: Severity::Error,
            message,
        });
    }

    fn warning(&mut self, message: String) {
        self.findings.push(Finding {
            severity: Severity::Warning,
            message,
        });
    }

    pub fn errors(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    pub fn warnings(&self) -> usize {
        self.findings.len() - self.errors()
    }
}

const REFINEMENT_FIELDS: [RefinementField; 3] = [
    RefinementField::Supplier,
    RefinementField::LineOfService,
    RefinementField::CostCenter,
];

/// Rule sections `min_rule_counts` may name.
const COUNTED_SECTIONS: [&str; 4] = [
    "supplier_rules",
    "context_rules",
    "cost_center_rules",
    "supplier_override_rules",
];

/// Client-maintained expectations about the rule files (`test_assertions.yaml`).
#[derive(Debug, Default, Deserialize)]
pub struct Assertions {
    #[serde(default)]
    pub known_supplier_mappings: Vec<KnownSupplier>,
    #[serde(default)]
    pub min_rule_counts: BTreeMap<String, usize>,
}

/// A supplier that must land on `expected_taxonomy` under `category_code`.
#[derive(Debug, Clone, Deserialize)]
pub struct KnownSupplier {
    category_code: Scalar,
    pub supplier: String,
    pub expected_taxonomy: String,
}

impl KnownSupplier {
    pub fn code(&self) -> String {
        self.category_code.clone().into_code()
    }
}

impl Assertions {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CategorizeError::config(format!(
                "Assertions file not found: {}",
                path.display()
            )));
        }
        match read_yaml(path)? {
            serde_yaml::Value::Null => Ok(Self::default()),
            value => serde_yaml::from_value(value).map_err(|source| CategorizeError::Yaml {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

pub fn check_rules(
    rules: &RuleSet,
    taxonomy: &TaxonomyIndex,
    assertions: Option<&Assertions>,
) -> LintReport {
    let mut report = LintReport::default();
    unknown_targets(rules, taxonomy, &mut report);
    unknown_codes(rules, &mut report);
    duplicate_supplier_patterns(&rules.refinement.supplier, &mut report);
    overlapping_supplier_patterns(&rules.refinement.supplier, &mut report);
    if let Some(assertions) = assertions {
        known_suppliers(&rules.refinement.supplier, &assertions.known_supplier_mappings, &mut report);
        rule_counts(rules, &assertions.min_rule_counts, &mut report);
    }
    report
}

fn unknown_targets(rules: &RuleSet, taxonomy: &TaxonomyIndex, report: &mut LintReport) {
    let mut quality = DataQuality::default();
    rules.check_targets(taxonomy, &mut quality);
    for detail in quality.samples(IssueKind::UnknownTaxonomyKey, usize::MAX) {
        report.error(format!("invalid taxonomy key: {detail}"));
    }
}

fn unknown_codes(rules: &RuleSet, report: &mut LintReport) {
    for field in REFINEMENT_FIELDS {
        for (i, rule) in rules.refinement.for_field(field).iter().enumerate() {
            for code in &rule.category_codes {
                if !rules.mapping.contains(code) {
                    report.error(format!(
                        "{}[{i}] unknown category code: '{code}'",
                        field.section()
                    ));
                }
            }
        }
    }
}

/// The same (code, pattern) pair in two supplier rules: the later one can never fire.
fn duplicate_supplier_patterns(rules: &[RefinementRule], report: &mut LintReport) {
    let mut seen: HashMap<(&str, String), usize> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
        let pattern = rule.pattern.as_str();
        for code in &rule.category_codes {
            match seen.get(&(code.as_str(), pattern.to_lowercase())) {
                Some(first) => report.error(format!(
                    "supplier_rules[{first}] and [{i}] duplicate code={code}, pattern='{pattern}'"
                )),
                None => {
                    seen.insert((code.as_str(), pattern.to_lowercase()), i);
                }
            }
        }
    }
}

/// An alternative of an earlier rule's pattern that a later rule also matches,
/// with shared codes and different targets. Only a hint; reported as a warning.
fn overlapping_supplier_patterns(rules: &[RefinementRule], report: &mut LintReport) {
    for (i, earlier) in rules.iter().enumerate() {
        for (j, later) in rules.iter().enumerate().skip(i + 1) {
            if earlier.taxonomy_key == later.taxonomy_key {
                continue;
            }
            let mut shared: Vec<&str> = earlier
                .category_codes
                .iter()
                .filter(|c| later.applies_to(c))
                .map(String::as_str)
                .collect();
            if shared.is_empty() {
                continue;
            }
            shared.sort_unstable();
            shared.dedup();
            for alt in earlier.pattern.as_str().split('|') {
                if later.pattern.is_match(alt) {
                    report.warning(format!(
                        "supplier_rules[{i}] alternative '{alt}' matched by [{j}] (codes: {}): [{i}] -> {}, [{j}] -> {}",
                        shared.join(", "),
                        earlier.taxonomy_key,
                        later.taxonomy_key
                    ));
                }
            }
        }
    }
}

/// The first supplier rule covering the code and matching the supplier
/// must target the expected key.
fn known_suppliers(rules: &[RefinementRule], known: &[KnownSupplier], report: &mut LintReport) {
    for entry in known {
        let code = entry.code();
        let hit = rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.applies_to(&code) && r.pattern.is_match(&entry.supplier));
        match hit {
            Some((_, rule)) if rule.taxonomy_key == entry.expected_taxonomy => {}
            Some((i, rule)) => report.error(format!(
                "supplier '{}' with code {code} mapped to '{}' by supplier_rules[{i}], expected '{}'",
                entry.supplier, rule.taxonomy_key, entry.expected_taxonomy
            )),
            None => report.error(format!(
                "no supplier rule matched supplier '{}' with code {code}",
                entry.supplier
            )),
        }
    }
}

fn rule_counts(rules: &RuleSet, minimums: &BTreeMap<String, usize>, report: &mut LintReport) {
    for (section, &minimum) in minimums {
        let actual = match section.as_str() {
            "supplier_rules" => rules.refinement.supplier.len(),
            "context_rules" => rules.refinement.context.len(),
            "cost_center_rules" => rules.refinement.cost_center.len(),
            "supplier_override_rules" => rules.refinement.overrides.len(),
            _ => {
                report.error(format!(
                    "min_rule_counts: unknown section '{section}' (expected one of {})",
                    COUNTED_SECTIONS.join(", ")
                ));
                continue;
            }
        };
        if actual < minimum {
            report.error(format!("expected {minimum}+ {section}, got {actual}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> TaxonomyIndex {
        TaxonomyIndex::from_entries([
            ("MED-SUPPLY", ["Medical", "Supplies", "", "", ""]),
            ("LAB", ["Medical", "Laboratory", "", "", ""]),
        ])
    }

    fn rules() -> RuleSet {
        let mut rules = RuleSet::default();
        rules.mapping.insert("5010", "MED-SUPPLY", 0.85, false);
        rules.mapping.insert("7000", "LAB", 0.5, true);
        rules
    }

    #[test]
    fn test_clean_rules_have_no_findings() {
        let mut r = rules();
        r.refinement.supplier.push(RefinementRule::new(&["7000"], "stryker", "LAB", 0.9).unwrap());
        let report = check_rules(&r, &taxonomy(), None);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_unknown_taxonomy_key_and_code_are_errors() {
        let mut r = rules();
        r.refinement.context.push(RefinementRule::new(&["8000"], "cardio", "GHOST", 0.9).unwrap());
        let report = check_rules(&r, &taxonomy(), None);
        assert_eq!(report.errors(), 2);
        assert!(report.findings.iter().any(|f| f.message == "context_rules[0] unknown category code: '8000'"));
        assert!(report.findings.iter().any(|f| f.message.contains("context_rules[0] -> GHOST")));
    }

    #[test]
    fn test_duplicate_pattern_ignores_case() {
        let mut r = rules();
        r.refinement.supplier.push(RefinementRule::new(&["7000"], "Stryker", "LAB", 0.9).unwrap());
        r.refinement.supplier.push(RefinementRule::new(&["5010", "7000"], "STRYKER", "LAB", 0.8).unwrap());
        let report = check_rules(&r, &taxonomy(), None);
        assert_eq!(report.errors(), 1);
        assert_eq!(
            report.findings[0].message,
            "supplier_rules[0] and [1] duplicate code=7000, pattern='STRYKER'"
        );
    }

    #[test]
    fn test_overlapping_alternatives_are_warnings() {
        let mut r = rules();
        r.refinement.supplier.push(RefinementRule::new(&["7000"], "medline|owens", "MED-SUPPLY", 0.9).unwrap());
        r.refinement.supplier.push(RefinementRule::new(&["7000"], "OWENS", "LAB", 0.8).unwrap());
        let report = check_rules(&r, &taxonomy(), None);
        assert_eq!(report.errors(), 0);
        assert_eq!(report.warnings(), 1);
        assert!(report.findings[0].message.starts_with("supplier_rules[0] alternative 'owens' matched by [1]"));
    }

    #[test]
    fn test_overlap_needs_shared_code_and_different_target() {
        let mut r = rules();
        r.refinement.supplier.push(RefinementRule::new(&["7000"], "owens", "MED-SUPPLY", 0.9).unwrap());
        r.refinement.supplier.push(RefinementRule::new(&["5010"], "owens", "LAB", 0.8).unwrap());
        r.refinement.supplier.push(RefinementRule::new(&["7000"], "owens", "MED-SUPPLY", 0.8).unwrap());
        let report = check_rules(&r, &taxonomy(), None);
        assert_eq!(report.warnings(), 0);
    }

    #[test]
    fn test_shared_codes_listed_once() {
        let mut r = rules();
        r.refinement.supplier.push(RefinementRule::new(&["7000", "5010", "7000"], "owens", "MED-SUPPLY", 0.9).unwrap());
        r.refinement.supplier.push(RefinementRule::new(&["5010", "7000"], "owens", "LAB", 0.8).unwrap());
        let report = check_rules(&r, &taxonomy(), None);
        let warning = report.findings.iter().find(|f| f.severity == Severity::Warning).unwrap();
        assert!(warning.message.contains("(codes: 5010, 7000)"), "{}", warning.message);
    }

    fn assertions(yaml: &str) -> Assertions {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn supplier_rules() -> RuleSet {
        let mut r = rules();
        r.refinement.supplier.push(RefinementRule::new(&["7000"], "quest", "LAB", 0.9).unwrap());
        r.refinement.supplier.push(RefinementRule::new(&["7000", "5010"], "quest|owens", "MED-SUPPLY", 0.8).unwrap());
        r
    }

    #[test]
    fn test_known_supplier_uses_first_matching_rule() {
        let a = assertions(
            "known_supplier_mappings:\n  - category_code: 7000\n    supplier: Quest Diagnostics\n    expected_taxonomy: LAB\n  - category_code: '5010'\n    supplier: OWENS & MINOR\n    expected_taxonomy: MED-SUPPLY\n",
        );
        let report = check_rules(&supplier_rules(), &taxonomy(), Some(&a));
        assert_eq!(report.errors(), 0, "{:?}", report.findings);
    }

    #[test]
    fn test_known_supplier_wrong_key_or_no_rule_is_error() {
        let a = assertions(
            "known_supplier_mappings:\n  - category_code: 5010\n    supplier: Quest\n    expected_taxonomy: LAB\n  - category_code: 7000\n    supplier: Labcorp\n    expected_taxonomy: LAB\n",
        );
        let report = check_rules(&supplier_rules(), &taxonomy(), Some(&a));
        let messages: Vec<&str> = report
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .map(|f| f.message.as_str())
            .collect();
        assert_eq!(
            messages,
            vec![
                "supplier 'Quest' with code 5010 mapped to 'MED-SUPPLY' by supplier_rules[1], expected 'LAB'",
                "no supplier rule matched supplier 'Labcorp' with code 7000",
            ]
        );
    }

    #[test]
    fn test_min_rule_counts() {
        let a = assertions("min_rule_counts:\n  supplier_rules: 2\n  context_rules: 1\n  vendor_rules: 1\n");
        let report = check_rules(&supplier_rules(), &taxonomy(), Some(&a));
        assert_eq!(report.errors(), 2);
        assert!(report.findings.iter().any(|f| f.message == "expected 1+ context_rules, got 0"));
        assert!(report.findings.iter().any(|f| f.message.starts_with("min_rule_counts: unknown section 'vendor_rules'")));
    }

    #[test]
    fn test_empty_assertions_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_assertions.yaml");
        std::fs::write(&path, "").unwrap();
        let a = Assertions::load(&path).unwrap();
        assert!(a.known_supplier_mappings.is_empty());
        assert!(Assertions::load(&dir.path().join("missing.yaml")).is_err());
    }
}
