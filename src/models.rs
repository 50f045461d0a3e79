use serde::Serialize;

/// Sentinel taxonomy key for rows no tier could resolve.
pub const UNCLASSIFIED: &str = "Unclassified";

/// One input row after ingest. Missing optional fields are empty strings.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub category_source: String,
    pub category_code: String,
    pub supplier: String,
    pub amount: f64,
    pub description: String,
    pub line_of_service: String,
    pub cost_center: String,
    /// Values of configured passthrough columns, in configured order.
    pub passthrough: Vec<String>,
}

/// Which optional columns the batch actually carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionalFields {
    pub description: bool,
    pub line_of_service: bool,
    pub cost_center: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionBatch {
    pub transactions: Vec<Transaction>,
    pub fields: OptionalFields,
    /// Names behind each `Transaction::passthrough` value, in the same order.
    pub passthrough_columns: Vec<String>,
}

impl TransactionBatch {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }
}

/// How a row got its taxonomy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    CategoryMapping,
    SupplierRefinement,
    Rule,
    ContextRefinement,
    CostCenterRefinement,
    CategoryMappingAmbiguous,
    SupplierOverride,
    Unmapped,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::CategoryMapping,
        Method::SupplierRefinement,
        Method::Rule,
        Method::ContextRefinement,
        Method::CostCenterRefinement,
        Method::CategoryMappingAmbiguous,
        Method::SupplierOverride,
        Method::Unmapped,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::CategoryMapping => "category_mapping",
            Self::SupplierRefinement => "supplier_refinement",
            Self::Rule => "rule",
            Self::ContextRefinement => "context_refinement",
            Self::CostCenterRefinement => "cost_center_refinement",
            Self::CategoryMappingAmbiguous => "category_mapping_ambiguous",
            Self::SupplierOverride => "supplier_override",
            Self::Unmapped => "unmapped",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::CategoryMapping => "Category Mapping (direct)",
            Self::SupplierRefinement => "Supplier Refinement",
            Self::Rule => "Keyword Rules",
            Self::ContextRefinement => "Context Refinement (LoS)",
            Self::CostCenterRefinement => "Cost Center Refinement",
            Self::CategoryMappingAmbiguous => "Category Mapping (ambiguous fallback)",
            Self::SupplierOverride => "Supplier Override (post-classification)",
            Self::Unmapped => "Unmapped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReviewTier {
    #[serde(rename = "Auto-Accept")]
    AutoAccept,
    #[serde(rename = "Quick Review")]
    QuickReview,
    #[serde(rename = "Manual Review")]
    ManualReview,
}

impl ReviewTier {
    pub const ALL: [ReviewTier; 3] = [
        ReviewTier::AutoAccept,
        ReviewTier::QuickReview,
        ReviewTier::ManualReview,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoAccept => "Auto-Accept",
            Self::QuickReview => "Quick Review",
            Self::ManualReview => "Manual Review",
        }
    }
}

/// L1 (most general) through L5 (most specific). Any level may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyLevels(pub [String; 5]);

impl TaxonomyLevels {
    pub fn l1(&self) -> &str {
        &self.0[0]
    }

    pub fn l2(&self) -> &str {
        &self.0[1]
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|l| l.is_empty())
    }
}

/// Final, frozen per-row outcome of the waterfall plus its review disposition.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub taxonomy_key: String,
    pub method: Method,
    /// Unrounded; exports round to three decimals.
    pub confidence: f64,
    pub levels: TaxonomyLevels,
    pub review_tier: ReviewTier,
}

// ---------------------------------------------------------------------------
// Data-quality warnings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    UnknownTaxonomyKey,
    CoercedAmount,
    UnknownAggregationColumn,
}

impl IssueKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownTaxonomyKey => "taxonomy keys missing from taxonomy",
            Self::CoercedAmount => "amounts coerced to 0.0",
            Self::UnknownAggregationColumn => "aggregations skipped (unknown column)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub kind: IssueKind,
    pub detail: String,
}

/// Non-fatal problems accumulated over a run and reported at the end.
#[derive(Debug, Clone, Default)]
pub struct DataQuality {
    issues: Vec<Issue>,
}

impl DataQuality {
    pub fn record(&mut self, kind: IssueKind, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(kind = kind.label(), "{detail}");
        self.issues.push(Issue { kind, detail });
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn samples(&self, kind: IssueKind, limit: usize) -> Vec<&str> {
        self.issues
            .iter()
            .filter(|i| i.kind == kind)
            .take(limit)
            .map(|i| i.detail.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Kinds with at least one issue, in first-seen order.
    pub fn kinds(&self) -> Vec<IssueKind> {
        let mut kinds = Vec::new();
        for issue in &self.issues {
            if !kinds.contains(&issue.kind) {
                kinds.push(issue.kind);
            }
        }
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_labels_are_distinct() {
        let mut labels: Vec<&str> = Method::ALL.iter().map(|m| m.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 8);
    }

    #[test]
    fn test_method_serializes_as_label() {
        for m in Method::ALL {
            let json = serde_json::to_string(&m).unwrap();
            assert_eq!(json, format!("\"{}\"", m.label()));
        }
    }

    #[test]
    fn test_review_tier_serializes_as_label() {
        let json = serde_json::to_string(&ReviewTier::QuickReview).unwrap();
        assert_eq!(json, "\"Quick Review\"");
    }

    #[test]
    fn test_data_quality_counts_and_samples() {
        let mut dq = DataQuality::default();
        dq.record(IssueKind::CoercedAmount, "row 2: 'n/a'");
        dq.record(IssueKind::UnknownTaxonomyKey, "5010 -> BAD");
        dq.record(IssueKind::CoercedAmount, "row 7: '--'");
        assert_eq!(dq.count(IssueKind::CoercedAmount), 2);
        assert_eq!(dq.samples(IssueKind::CoercedAmount, 1), vec!["row 2: 'n/a'"]);
        assert_eq!(
            dq.kinds(),
            vec![IssueKind::CoercedAmount, IssueKind::UnknownTaxonomyKey]
        );
    }
}
