//! The tiered classification waterfall.
//!
//! Tiers 1-6 only ever touch rows that are still unresolved, so every row is
//! claimed by exactly one of them or falls through to `unmapped`. Tier 7 runs
//! after L1..L5 are derived and may rewrite any row whose derived L1 and
//! supplier match an override rule.

use serde::Serialize;

use crate::models::{
    ClassificationResult, Method, TaxonomyLevels, Transaction, TransactionBatch, UNCLASSIFIED,
};
use crate::reviewer::{assign_review_tier, Thresholds};
use crate::rules::{RefinementField, RuleSet};
use crate::taxonomy::TaxonomyIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Unresolved,
    /// Claimed by one of tiers 1-6 (or the unmapped fallthrough).
    Resolved(Method),
    /// Rewritten by a tier 7 override rule.
    Overridden,
}

#[derive(Debug, Clone)]
struct RowState {
    taxonomy_key: String,
    confidence: f64,
    resolution: Resolution,
}

impl RowState {
    fn unresolved() -> Self {
        Self {
            taxonomy_key: String::new(),
            confidence: 0.0,
            resolution: Resolution::Unresolved,
        }
    }

    fn is_unresolved(&self) -> bool {
        self.resolution == Resolution::Unresolved
    }

    fn resolve(&mut self, taxonomy_key: &str, confidence: f64, method: Method) {
        self.taxonomy_key = taxonomy_key.to_string();
        self.confidence = confidence;
        self.resolution = Resolution::Resolved(method);
    }

    fn method(&self) -> Method {
        match self.resolution {
            Resolution::Resolved(m) => m,
            Resolution::Overridden => Method::SupplierOverride,
            Resolution::Unresolved => Method::Unmapped,
        }
    }
}

/// Rows claimed by each tier. `None` means the tier was skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub category_mapping: usize,
    pub supplier_refinement: usize,
    pub keyword_rules: usize,
    pub context_refinement: Option<usize>,
    pub cost_center_refinement: Option<usize>,
    pub ambiguous_fallback: usize,
    pub unmapped: usize,
    pub supplier_override: usize,
}

/// Per-row waterfall output before review tiers are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub taxonomy_key: String,
    pub method: Method,
    pub confidence: f64,
    pub levels: TaxonomyLevels,
}

#[derive(Debug, Clone)]
pub struct WaterfallOutcome {
    pub classifications: Vec<Classification>,
    pub counts: TierCounts,
    /// Resolved keys with no taxonomy entry, first-seen order.
    pub unknown_keys: Vec<String>,
}

/// Runs the tiers over a batch. Borrows the rule sets and taxonomy read-only,
/// so one instance can classify any number of independent batches.
pub struct Waterfall<'a> {
    rules: &'a RuleSet,
    taxonomy: &'a TaxonomyIndex,
}

fn refinement_text(txn: &Transaction, field: RefinementField) -> &str {
    match field {
        RefinementField::Supplier => &txn.supplier,
        RefinementField::LineOfService => &txn.line_of_service,
        RefinementField::CostCenter => &txn.cost_center,
    }
}

impl<'a> Waterfall<'a> {
    pub fn new(rules: &'a RuleSet, taxonomy: &'a TaxonomyIndex) -> Self {
        Self { rules, taxonomy }
    }

    pub fn run(&self, batch: &TransactionBatch) -> WaterfallOutcome {
        let txns = &batch.transactions;
        let mut states = vec![RowState::unresolved(); txns.len()];
        let mut counts = TierCounts::default();

        counts.category_mapping = self.direct_mapping(txns, &mut states);
        tracing::info!(rows = counts.category_mapping, "tier 1 (category mapping)");

        counts.supplier_refinement = self.refine(
            txns,
            &mut states,
            RefinementField::Supplier,
            Method::SupplierRefinement,
        );
        tracing::info!(rows = counts.supplier_refinement, "tier 2 (supplier refinement)");

        counts.keyword_rules = self.keywords(txns, &mut states);
        tracing::info!(rows = counts.keyword_rules, "tier 3 (keyword rules)");

        counts.context_refinement = if batch.fields.line_of_service
            && !self.rules.refinement.context.is_empty()
        {
            let n = self.refine(
                txns,
                &mut states,
                RefinementField::LineOfService,
                Method::ContextRefinement,
            );
            tracing::info!(rows = n, "tier 4 (context refinement)");
            Some(n)
        } else {
            tracing::info!("tier 4 (context refinement): skipped, no line_of_service column or rules");
            None
        };

        counts.cost_center_refinement = if batch.fields.cost_center
            && !self.rules.refinement.cost_center.is_empty()
        {
            let n = self.refine(
                txns,
                &mut states,
                RefinementField::CostCenter,
                Method::CostCenterRefinement,
            );
            tracing::info!(rows = n, "tier 5 (cost center refinement)");
            Some(n)
        } else {
            tracing::info!("tier 5 (cost center refinement): skipped, no cost_center column or rules");
            None
        };

        counts.ambiguous_fallback = self.ambiguous_mapping(txns, &mut states);
        tracing::info!(rows = counts.ambiguous_fallback, "tier 6 (ambiguous fallback)");

        for state in states.iter_mut().filter(|s| s.is_unresolved()) {
            state.resolve(UNCLASSIFIED, 0.0, Method::Unmapped);
            counts.unmapped += 1;
        }
        tracing::info!(rows = counts.unmapped, "unmapped");

        let (mut levels, unknown_keys) = self.project_all(&states);

        counts.supplier_override = self.overrides(txns, &mut states, &mut levels);
        tracing::info!(rows = counts.supplier_override, "tier 7 (supplier override)");

        let classifications = states
            .into_iter()
            .zip(levels)
            .map(|(state, levels)| Classification {
                method: state.method(),
                taxonomy_key: state.taxonomy_key,
                confidence: state.confidence,
                levels,
            })
            .collect();

        WaterfallOutcome {
            classifications,
            counts,
            unknown_keys,
        }
    }

    fn direct_mapping(&self, txns: &[Transaction], states: &mut [RowState]) -> usize {
        let mut hits = 0;
        for (txn, state) in txns.iter().zip(states.iter_mut()) {
            if let Some(entry) = self.rules.mapping.direct(&txn.category_code) {
                state.resolve(&entry.taxonomy_key, entry.confidence, Method::CategoryMapping);
                hits += 1;
            }
        }
        hits
    }

    /// First rule (in file order) whose code set contains the row's code and
    /// whose pattern occurs in the field claims the row.
    fn refine(
        &self,
        txns: &[Transaction],
        states: &mut [RowState],
        field: RefinementField,
        method: Method,
    ) -> usize {
        let rules = self.rules.refinement.for_field(field);
        if rules.is_empty() {
            return 0;
        }
        let mut hits = 0;
        for (txn, state) in txns.iter().zip(states.iter_mut()) {
            if !state.is_unresolved() {
                continue;
            }
            let text = refinement_text(txn, field);
            let matched = rules
                .iter()
                .find(|r| r.applies_to(&txn.category_code) && r.pattern.is_match(text));
            if let Some(rule) = matched {
                state.resolve(&rule.taxonomy_key, rule.confidence, method);
                hits += 1;
            }
        }
        hits
    }

    fn keywords(&self, txns: &[Transaction], states: &mut [RowState]) -> usize {
        if self.rules.keywords.is_empty() {
            return 0;
        }
        let mut hits = 0;
        for (txn, state) in txns.iter().zip(states.iter_mut()) {
            if !state.is_unresolved() {
                continue;
            }
            let combined = format!("{} {}", txn.supplier, txn.description);
            if let Some(rule) = self.rules.keywords.iter().find(|r| r.pattern.is_match(&combined)) {
                state.resolve(&rule.category, rule.confidence, Method::Rule);
                hits += 1;
            }
        }
        hits
    }

    fn ambiguous_mapping(&self, txns: &[Transaction], states: &mut [RowState]) -> usize {
        let mut hits = 0;
        for (txn, state) in txns.iter().zip(states.iter_mut()) {
            if !state.is_unresolved() {
                continue;
            }
            if let Some(entry) = self.rules.mapping.ambiguous(&txn.category_code) {
                state.resolve(
                    &entry.taxonomy_key,
                    entry.confidence,
                    Method::CategoryMappingAmbiguous,
                );
                hits += 1;
            }
        }
        hits
    }

    fn project_all(&self, states: &[RowState]) -> (Vec<TaxonomyLevels>, Vec<String>) {
        let mut unknown: Vec<String> = Vec::new();
        let levels = states
            .iter()
            .map(|s| {
                if s.taxonomy_key != UNCLASSIFIED
                    && !self.taxonomy.contains(&s.taxonomy_key)
                    && !unknown.contains(&s.taxonomy_key)
                {
                    tracing::warn!(
                        taxonomy_key = %s.taxonomy_key,
                        "taxonomy key not in taxonomy; L1-L5 left empty"
                    );
                    unknown.push(s.taxonomy_key.clone());
                }
                self.taxonomy.project(&s.taxonomy_key)
            })
            .collect();
        (levels, unknown)
    }

    /// Tier 7. Selection uses the L1 derived before any override; a row
    /// rewritten by one override rule is not considered by later ones.
    fn overrides(
        &self,
        txns: &[Transaction],
        states: &mut [RowState],
        levels: &mut [TaxonomyLevels],
    ) -> usize {
        let mut hits = 0;
        for (i, rule) in self.rules.refinement.overrides.iter().enumerate() {
            let target = self.taxonomy.get(&rule.taxonomy_key);
            let mut warned = false;
            for ((txn, state), row_levels) in
                txns.iter().zip(states.iter_mut()).zip(levels.iter_mut())
            {
                if state.resolution == Resolution::Overridden
                    || !rule.applies_to_l1(row_levels.l1())
                    || !rule.pattern.is_match(&txn.supplier)
                {
                    continue;
                }
                if target.is_none() && !warned {
                    tracing::warn!(
                        rule = i,
                        taxonomy_key = %rule.taxonomy_key,
                        "override taxonomy_key not in taxonomy lookup"
                    );
                    warned = true;
                }
                state.taxonomy_key = rule.taxonomy_key.clone();
                state.confidence = rule.confidence;
                state.resolution = Resolution::Overridden;
                *row_levels = target.cloned().unwrap_or_default();
                hits += 1;
            }
        }
        hits
    }
}

/// Full outcome of categorizing one batch.
pub struct CategorizeResult {
    pub results: Vec<ClassificationResult>,
    pub counts: TierCounts,
    pub unknown_keys: Vec<String>,
}

/// Run the waterfall, then attach review tiers. Output order is input order.
pub fn categorize_batch(
    batch: &TransactionBatch,
    rules: &RuleSet,
    taxonomy: &TaxonomyIndex,
    thresholds: &Thresholds,
) -> CategorizeResult {
    let outcome = Waterfall::new(rules, taxonomy).run(batch);
    let results = outcome
        .classifications
        .into_iter()
        .map(|c| ClassificationResult {
            review_tier: assign_review_tier(c.method, c.confidence, thresholds),
            taxonomy_key: c.taxonomy_key,
            method: c.method,
            confidence: c.confidence,
            levels: c.levels,
        })
        .collect();
    CategorizeResult {
        results,
        counts: outcome.counts,
        unknown_keys: outcome.unknown_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OptionalFields, ReviewTier};
    use crate::rules::{KeywordRule, OverrideRule, RefinementRule};
    use proptest::prelude::*;
    use regex::RegexBuilder;

    fn re(p: &str) -> regex::Regex {
        RegexBuilder::new(p).case_insensitive(true).build().unwrap()
    }

    fn keyword(pattern: &str, category: &str, confidence: f64) -> KeywordRule {
        KeywordRule {
            pattern: re(pattern),
            category: category.to_string(),
            confidence,
        }
    }

    fn override_rule(pattern: &str, from_l1: &[&str], key: &str, confidence: f64) -> OverrideRule {
        OverrideRule {
            pattern: re(pattern),
            override_from_l1: from_l1.iter().map(|s| s.to_string()).collect(),
            taxonomy_key: key.to_string(),
            confidence,
        }
    }

    fn txn(code: &str, supplier: &str, description: &str) -> Transaction {
        Transaction {
            category_source: code.to_string(),
            category_code: code.to_string(),
            supplier: supplier.to_string(),
            amount: 100.0,
            description: description.to_string(),
            ..Default::default()
        }
    }

    fn batch(transactions: Vec<Transaction>) -> TransactionBatch {
        TransactionBatch {
            transactions,
            fields: OptionalFields {
                description: true,
                line_of_service: true,
                cost_center: true,
            },
            passthrough_columns: Vec::new(),
        }
    }

    fn taxonomy() -> TaxonomyIndex {
        TaxonomyIndex::from_entries([
            ("MED-SUPPLY", ["Medical", "Supplies", "", "", ""]),
            ("IMAGING", ["Medical", "Imaging", "", "", ""]),
            ("IT-HW", ["IT Equipment", "Hardware", "", "", ""]),
            ("IT-SVC", ["IT Services", "Managed", "", "", ""]),
            ("LAB", ["Medical", "Laboratory", "", "", ""]),
            ("CARD", ["Medical", "Cardiology", "", "", ""]),
            ("FAC", ["Facilities", "", "", "", ""]),
        ])
    }

    fn thresholds() -> Thresholds {
        Thresholds::new(0.9, 0.6).unwrap()
    }

    fn base_rules() -> RuleSet {
        let mut rules = RuleSet::default();
        rules.mapping.insert("5010", "MED-SUPPLY", 0.85, false);
        rules.mapping.insert("6000", "IT-HW", 0.9, false);
        rules.mapping.insert("7000", "LAB", 0.5, true);
        rules
    }

    #[test]
    fn test_direct_mapping_quick_review() {
        let rules = base_rules();
        let out = categorize_batch(&batch(vec![txn("5010", "Owens", "")]), &rules, &taxonomy(), &thresholds());
        let r = &out.results[0];
        assert_eq!(r.taxonomy_key, "MED-SUPPLY");
        assert_eq!(r.method, Method::CategoryMapping);
        assert_eq!(r.confidence, 0.85);
        assert_eq!(r.levels.l1(), "Medical");
        assert_eq!(r.review_tier, ReviewTier::QuickReview);
        assert_eq!(out.counts.category_mapping, 1);
    }

    #[test]
    fn test_unknown_code_is_unmapped_manual_review() {
        let rules = base_rules();
        let out = categorize_batch(&batch(vec![txn("9999", "Nobody", "")]), &rules, &taxonomy(), &thresholds());
        let r = &out.results[0];
        assert_eq!(r.taxonomy_key, UNCLASSIFIED);
        assert_eq!(r.method, Method::Unmapped);
        assert_eq!(r.confidence, 0.0);
        assert!(r.levels.is_empty());
        assert_eq!(r.review_tier, ReviewTier::ManualReview);
        assert!(out.unknown_keys.is_empty());
    }

    #[test]
    fn test_keyword_rule_matches_description_auto_accept() {
        let mut rules = base_rules();
        rules.keywords.push(keyword("MRI", "IMAGING", 0.95));
        let out = categorize_batch(
            &batch(vec![txn("9999", "GE Healthcare", "MRI Scanner Maintenance")]),
            &rules,
            &taxonomy(),
            &thresholds(),
        );
        let r = &out.results[0];
        assert_eq!(r.method, Method::Rule);
        assert_eq!(r.confidence, 0.95);
        assert_eq!(r.review_tier, ReviewTier::AutoAccept);
    }

    #[test]
    fn test_first_matching_keyword_rule_wins() {
        let mut rules = base_rules();
        rules.keywords.push(keyword("MRI", "IMAGING", 0.95));
        rules.keywords.push(keyword("scanner", "IT-HW", 0.8));
        let row = || batch(vec![txn("9999", "GE Healthcare", "MRI Scanner Maintenance")]);
        let out = Waterfall::new(&rules, &taxonomy()).run(&row());
        assert_eq!(out.classifications[0].taxonomy_key, "IMAGING");
        assert_eq!(out.classifications[0].confidence, 0.95);
        assert_eq!(out.counts.keyword_rules, 1);

        rules.keywords.reverse();
        let out = Waterfall::new(&rules, &taxonomy()).run(&row());
        assert_eq!(out.classifications[0].taxonomy_key, "IT-HW");
        assert_eq!(out.classifications[0].confidence, 0.8);
    }

    #[test]
    fn test_first_matching_context_and_cost_center_rules_win() {
        let mut rules = base_rules();
        rules.refinement.context.push(RefinementRule::new(&["7000"], "cardio", "CARD", 0.9).unwrap());
        rules.refinement.context.push(RefinementRule::new(&["7000"], "cardiology|lab", "LAB", 0.8).unwrap());
        rules.refinement.cost_center.push(RefinementRule::new(&["7000"], "^CC-1", "FAC", 0.7).unwrap());
        rules.refinement.cost_center.push(RefinementRule::new(&["7000"], "CC-10", "LAB", 0.75).unwrap());
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![
            Transaction {
                line_of_service: "Cardiology".to_string(),
                ..txn("7000", "Someone", "")
            },
            Transaction {
                cost_center: "CC-100".to_string(),
                ..txn("7000", "Someone", "")
            },
        ]));
        let c = &out.classifications;
        assert_eq!((c[0].method, c[0].taxonomy_key.as_str()), (Method::ContextRefinement, "CARD"));
        assert_eq!((c[1].method, c[1].taxonomy_key.as_str()), (Method::CostCenterRefinement, "FAC"));
        assert_eq!(out.counts.context_refinement, Some(1));
        assert_eq!(out.counts.cost_center_refinement, Some(1));
    }

    #[test]
    fn test_keyword_matches_supplier_text() {
        let mut rules = base_rules();
        rules.keywords.push(keyword("^siemens ", "IMAGING", 0.95));
        let out = Waterfall::new(&rules, &taxonomy())
            .run(&batch(vec![txn("9999", "Siemens", "")]));
        assert_eq!(out.classifications[0].method, Method::Rule);
    }

    #[test]
    fn test_override_supersedes_direct_mapping() {
        let mut rules = base_rules();
        rules
            .refinement
            .overrides
            .push(override_rule("ACME", &["IT Equipment"], "IT-SVC", 0.92));
        let out = categorize_batch(
            &batch(vec![txn("6000", "ACME CORP", ""), txn("6000", "Dell", "")]),
            &rules,
            &taxonomy(),
            &thresholds(),
        );
        let r = &out.results[0];
        assert_eq!(r.method, Method::SupplierOverride);
        assert_eq!(r.taxonomy_key, "IT-SVC");
        assert_eq!(r.levels.l1(), "IT Services");
        assert_eq!(r.confidence, 0.92);
        assert_eq!(out.results[1].method, Method::CategoryMapping);
        assert_eq!(out.counts.supplier_override, 1);
    }

    #[test]
    fn test_override_first_rule_wins() {
        let mut rules = base_rules();
        rules.refinement.overrides.push(override_rule("ACME", &["IT Equipment"], "IT-SVC", 0.92));
        rules.refinement.overrides.push(override_rule("CORP", &["IT Equipment", "IT Services"], "FAC", 0.7));
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![txn("6000", "ACME CORP", "")]));
        assert_eq!(out.classifications[0].taxonomy_key, "IT-SVC");
        assert_eq!(out.counts.supplier_override, 1);
    }

    #[test]
    fn test_override_target_missing_from_taxonomy_still_applies() {
        let mut rules = base_rules();
        rules.refinement.overrides.push(override_rule("ACME", &["IT Equipment"], "GHOST", 0.8));
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![txn("6000", "ACME", "")]));
        let c = &out.classifications[0];
        assert_eq!(c.method, Method::SupplierOverride);
        assert_eq!(c.taxonomy_key, "GHOST");
        assert!(c.levels.is_empty());
    }

    #[test]
    fn test_override_with_empty_l1_reaches_unmapped_rows() {
        let mut rules = base_rules();
        rules.refinement.overrides.push(override_rule("ACME", &[""], "IT-HW", 0.8));
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![txn("9999", "ACME", "")]));
        assert_eq!(out.classifications[0].method, Method::SupplierOverride);
        assert_eq!(out.classifications[0].levels.l1(), "IT Equipment");
    }

    #[test]
    fn test_supplier_refinement_respects_codes_and_order() {
        let mut rules = base_rules();
        rules.refinement.supplier.push(RefinementRule::new(&["7000"], "stryker", "LAB", 0.9).unwrap());
        rules.refinement.supplier.push(RefinementRule::new(&["7000", "8000"], "STRY|Medline", "MED-SUPPLY", 0.8).unwrap());
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![
            txn("7000", "Stryker Corp", ""),
            txn("8000", "Stryker Corp", ""),
            txn("9000", "Stryker Corp", ""),
            txn("7000", "Unknown", ""),
        ]));
        let c = &out.classifications;
        assert_eq!((c[0].method, c[0].taxonomy_key.as_str()), (Method::SupplierRefinement, "LAB"));
        assert_eq!((c[1].method, c[1].taxonomy_key.as_str()), (Method::SupplierRefinement, "MED-SUPPLY"));
        assert_eq!(c[2].method, Method::Unmapped);
        // No refinement match, falls back to the ambiguous mapping.
        assert_eq!(c[3].method, Method::CategoryMappingAmbiguous);
        assert_eq!(c[3].confidence, 0.5);
        assert_eq!(out.counts.supplier_refinement, 2);
        assert_eq!(out.counts.ambiguous_fallback, 1);
    }

    #[test]
    fn test_direct_mapping_not_refined() {
        let mut rules = base_rules();
        rules.refinement.supplier.push(RefinementRule::new(&["5010"], ".*", "LAB", 0.99).unwrap());
        rules.keywords.push(keyword(".*", "IMAGING", 0.99));
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![txn("5010", "Any", "")]));
        assert_eq!(out.classifications[0].method, Method::CategoryMapping);
    }

    #[test]
    fn test_refinement_beats_keyword_and_ambiguous() {
        let mut rules = base_rules();
        rules.refinement.supplier.push(RefinementRule::new(&["7000"], "abbott", "CARD", 0.88).unwrap());
        rules.keywords.push(keyword("abbott", "IMAGING", 0.95));
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![
            txn("7000", "Abbott Labs", ""),
            txn("1234", "Abbott Labs", ""),
        ]));
        assert_eq!(out.classifications[0].method, Method::SupplierRefinement);
        assert_eq!(out.classifications[1].method, Method::Rule);
    }

    #[test]
    fn test_context_and_cost_center_tiers() {
        let mut rules = base_rules();
        rules.refinement.context.push(RefinementRule::new(&["7000"], "cardio", "CARD", 0.8).unwrap());
        rules.refinement.cost_center.push(RefinementRule::new(&["7000"], "^FAC", "FAC", 0.7).unwrap());
        let mut a = txn("7000", "X", "");
        a.line_of_service = "Cardiology".to_string();
        let mut b = txn("7000", "X", "");
        b.cost_center = "FAC-100 Plant Ops".to_string();
        let out = Waterfall::new(&rules, &taxonomy()).run(&batch(vec![a, b]));
        assert_eq!(out.classifications[0].method, Method::ContextRefinement);
        assert_eq!(out.classifications[1].method, Method::CostCenterRefinement);
        assert_eq!(out.counts.context_refinement, Some(1));
        assert_eq!(out.counts.cost_center_refinement, Some(1));
    }

    #[test]
    fn test_context_tier_skipped_without_column() {
        let mut rules = base_rules();
        rules.refinement.context.push(RefinementRule::new(&["7000"], ".*", "CARD", 0.8).unwrap());
        let mut b = batch(vec![txn("7000", "X", "")]);
        b.fields.line_of_service = false;
        let out = Waterfall::new(&rules, &taxonomy()).run(&b);
        assert_eq!(out.counts.context_refinement, None);
        assert_eq!(out.counts.cost_center_refinement, None);
        assert_eq!(out.classifications[0].method, Method::CategoryMappingAmbiguous);
    }

    #[test]
    fn test_unknown_mapping_target_leaves_levels_empty() {
        let mut rules = base_rules();
        rules.mapping.insert("4000", "GHOST", 0.9, false);
        let out = Waterfall::new(&rules, &taxonomy())
            .run(&batch(vec![txn("4000", "A", ""), txn("4000", "B", "")]));
        assert_eq!(out.classifications[0].taxonomy_key, "GHOST");
        assert!(out.classifications[0].levels.is_empty());
        assert_eq!(out.unknown_keys, vec!["GHOST".to_string()]);
    }

    // -- properties --------------------------------------------------------

    fn rich_rules() -> RuleSet {
        let mut rules = base_rules();
        rules.refinement.supplier.push(RefinementRule::new(&["7000", "8000"], "acme", "IT-HW", 0.9).unwrap());
        rules.refinement.supplier.push(RefinementRule::new(&["8000"], "a", "LAB", 0.7).unwrap());
        rules.keywords.push(keyword("scan", "IMAGING", 0.95));
        rules.keywords.push(keyword("b", "MED-SUPPLY", 0.6));
        rules.refinement.context.push(RefinementRule::new(&["9000"], "card", "CARD", 0.8).unwrap());
        rules.refinement.cost_center.push(RefinementRule::new(&["9000"], "fac", "FAC", 0.75).unwrap());
        rules.refinement.overrides.push(override_rule("globex", &["Medical"], "IT-SVC", 0.65));
        rules
    }

    fn arb_txn() -> impl Strategy<Value = Transaction> {
        (
            prop::sample::select(vec!["5010", "6000", "7000", "8000", "9000", "1111"]),
            prop::sample::select(vec!["ACME", "Globex", "Initech", "bob", ""]),
            prop::sample::select(vec!["", "scan", "MRI scan", "misc"]),
            prop::sample::select(vec!["", "Cardiology", "Oncology"]),
            prop::sample::select(vec!["", "FAC-1", "ADM-2"]),
        )
            .prop_map(|(code, supplier, desc, los, cc)| {
                let mut t = txn(code, supplier, desc);
                t.line_of_service = los.to_string();
                t.cost_center = cc.to_string();
                t
            })
    }

    proptest! {
        #[test]
        fn prop_total_coverage_and_order(txns in prop::collection::vec(arb_txn(), 0..40)) {
            let rules = rich_rules();
            let b = batch(txns);
            let out = categorize_batch(&b, &rules, &taxonomy(), &thresholds());
            prop_assert_eq!(out.results.len(), b.len());
            for r in &out.results {
                prop_assert!(Method::ALL.contains(&r.method));
                prop_assert!((0.0..=1.0).contains(&r.confidence));
            }
            let c = &out.counts;
            let total = c.category_mapping + c.supplier_refinement + c.keyword_rules
                + c.context_refinement.unwrap_or(0) + c.cost_center_refinement.unwrap_or(0)
                + c.ambiguous_fallback + c.unmapped;
            prop_assert_eq!(total, b.len());
        }

        #[test]
        fn prop_idempotent(txns in prop::collection::vec(arb_txn(), 0..40)) {
            let rules = rich_rules();
            let b = batch(txns);
            let tax = taxonomy();
            let first = categorize_batch(&b, &rules, &tax, &thresholds()).results;
            let second = categorize_batch(&b, &rules, &tax, &thresholds()).results;
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_direct_codes_never_refined(txns in prop::collection::vec(arb_txn(), 1..40)) {
            let rules = rich_rules();
            let out = Waterfall::new(&rules, &taxonomy()).run(&batch(txns.clone()));
            for (t, c) in txns.iter().zip(&out.classifications) {
                if rules.mapping.direct(&t.category_code).is_some() {
                    prop_assert!(matches!(c.method, Method::CategoryMapping | Method::SupplierOverride));
                }
            }
        }

        #[test]
        fn prop_row_outcome_independent_of_neighbours(txns in prop::collection::vec(arb_txn(), 1..20)) {
            let rules = rich_rules();
            let tax = taxonomy();
            let whole = Waterfall::new(&rules, &tax).run(&batch(txns.clone()));
            for (i, t) in txns.iter().enumerate() {
                let single = Waterfall::new(&rules, &tax).run(&batch(vec![t.clone()]));
                prop_assert_eq!(&single.classifications[0], &whole.classifications[i]);
            }
        }
    }
}
