use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::categorizer::TierCounts;
use crate::fmt::{percent, round3};
use crate::models::{
    ClassificationResult, DataQuality, IssueKind, Method, ReviewTier, Transaction,
};
use crate::settings::{AggregationSpec, ColumnMap};

const LEVEL_HEADERS: [&str; 5] = [
    "CategoryLevel1",
    "CategoryLevel2",
    "CategoryLevel3",
    "CategoryLevel4",
    "CategoryLevel5",
];
const QUALITY_SAMPLES: usize = 5;

// ---------------------------------------------------------------------------
// Output rows
// ---------------------------------------------------------------------------

/// Column layout of the per-row results. Input fields keep the client's
/// column names; classification fields use fixed names.
#[derive(Debug, Clone)]
pub struct OutputLayout<'a> {
    columns: &'a ColumnMap,
    /// Resolved passthrough columns, aligned with `Transaction::passthrough`.
    passthrough: &'a [String],
}

impl<'a> OutputLayout<'a> {
    pub fn new(columns: &'a ColumnMap, passthrough: &'a [String]) -> Self {
        Self { columns, passthrough }
    }

    /// Every header the layout writes regardless of passthrough columns.
    pub fn reserved_headers(columns: &ColumnMap) -> Vec<String> {
        OutputLayout::new(columns, &[]).headers()
    }

    pub fn headers(&self) -> Vec<String> {
        let c = self.columns;
        let mut headers = vec![c.supplier.clone()];
        headers.extend(self.passthrough.iter().cloned());
        headers.extend(c.description.iter().cloned());
        headers.push(c.category_source.clone());
        headers.push("Category Code".to_string());
        headers.extend(c.cost_center.iter().cloned());
        headers.extend(c.line_of_service.iter().cloned());
        headers.push(c.amount.clone());
        headers.extend(LEVEL_HEADERS.iter().map(|h| h.to_string()));
        headers.extend(
            ["TaxonomyKey", "ClassificationMethod", "Confidence", "ReviewTier"]
                .iter()
                .map(|h| h.to_string()),
        );
        headers
    }

    /// One output record, aligned with `headers()`.
    pub fn record(&self, txn: &Transaction, result: &ClassificationResult) -> Vec<String> {
        let c = self.columns;
        let mut record = vec![txn.supplier.clone()];
        record.extend(txn.passthrough.iter().cloned());
        if c.description.is_some() {
            record.push(txn.description.clone());
        }
        record.push(txn.category_source.clone());
        record.push(txn.category_code.clone());
        if c.cost_center.is_some() {
            record.push(txn.cost_center.clone());
        }
        if c.line_of_service.is_some() {
            record.push(txn.line_of_service.clone());
        }
        record.push(txn.amount.to_string());
        record.extend(result.levels.0.iter().cloned());
        record.push(result.taxonomy_key.clone());
        record.push(result.method.label().to_string());
        record.push(round3(result.confidence).to_string());
        record.push(result.review_tier.label().to_string());
        record
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MethodCount {
    pub method: Method,
    pub label: &'static str,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierShare {
    pub tier: ReviewTier,
    pub rows: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct L1Spend {
    pub l1: String,
    pub rows: usize,
    pub total_spend: f64,
    pub unique_suppliers: usize,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct L2Spend {
    pub l1: String,
    pub l2: String,
    pub rows: usize,
    pub total_spend: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSpend {
    pub value: String,
    pub rows: usize,
    pub total_spend: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aggregation {
    pub name: String,
    pub column: String,
    pub groups: Vec<GroupSpend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeCount {
    pub code: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityCount {
    pub issue: &'static str,
    pub count: usize,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub client: String,
    pub total_rows: usize,
    pub unique_suppliers: usize,
    pub unique_category_codes: usize,
    pub total_spend: f64,
    pub average_amount: f64,
    pub methods: Vec<MethodCount>,
    pub review_tiers: Vec<TierShare>,
    pub tier_counts: TierCounts,
    pub spend_by_l1: Vec<L1Spend>,
    pub spend_by_l2: Vec<L2Spend>,
    pub aggregations: Vec<Aggregation>,
    pub unmapped_codes: Vec<CodeCount>,
    /// Keys assigned to rows but absent from the taxonomy; those rows have empty levels.
    pub unknown_taxonomy_keys: Vec<String>,
    pub data_quality: Vec<QualityCount>,
}

/// Groups keyed by `K`, kept in first-seen order.
struct Grouped<K, V> {
    index: HashMap<K, usize>,
    groups: Vec<(K, V)>,
}

impl<K: std::hash::Hash + Eq + Clone, V: Default> Grouped<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    fn entry(&mut self, key: K) -> &mut V {
        let i = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.groups.push((key.clone(), V::default()));
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        &mut self.groups[i].1
    }

    fn into_vec(self) -> Vec<(K, V)> {
        self.groups
    }
}

#[derive(Default)]
struct L1Acc<'a> {
    rows: usize,
    spend: f64,
    confidence: f64,
    suppliers: HashSet<&'a str>,
}

#[derive(Default)]
struct SpendAcc {
    rows: usize,
    spend: f64,
}

fn by_spend_desc<T>(items: &mut [T], spend: impl Fn(&T) -> f64) {
    // Stable, so equal spend keeps first-seen order.
    items.sort_by(|a, b| spend(b).total_cmp(&spend(a)));
}

pub fn spend_by_l1(txns: &[Transaction], results: &[ClassificationResult]) -> Vec<L1Spend> {
    let mut grouped: Grouped<&str, L1Acc> = Grouped::new();
    for (txn, result) in txns.iter().zip(results) {
        let acc = grouped.entry(result.levels.l1());
        acc.rows += 1;
        acc.spend += txn.amount;
        acc.confidence += result.confidence;
        acc.suppliers.insert(txn.supplier.as_str());
    }
    let mut out: Vec<L1Spend> = grouped
        .into_vec()
        .into_iter()
        .map(|(l1, acc)| L1Spend {
            l1: l1.to_string(),
            rows: acc.rows,
            total_spend: acc.spend,
            unique_suppliers: acc.suppliers.len(),
            avg_confidence: round3(acc.confidence / acc.rows as f64),
        })
        .collect();
    by_spend_desc(&mut out, |s| s.total_spend);
    out
}

pub fn spend_by_l2(txns: &[Transaction], results: &[ClassificationResult]) -> Vec<L2Spend> {
    let mut grouped: Grouped<(&str, &str), SpendAcc> = Grouped::new();
    for (txn, result) in txns.iter().zip(results) {
        let acc = grouped.entry((result.levels.l1(), result.levels.l2()));
        acc.rows += 1;
        acc.spend += txn.amount;
    }
    let mut out: Vec<L2Spend> = grouped
        .into_vec()
        .into_iter()
        .map(|((l1, l2), acc)| L2Spend {
            l1: l1.to_string(),
            l2: l2.to_string(),
            rows: acc.rows,
            total_spend: acc.spend,
        })
        .collect();
    by_spend_desc(&mut out, |s| s.total_spend);
    out
}

/// Spend grouped by any output column. `None` when the column does not exist.
pub fn aggregate(
    spec: &AggregationSpec,
    layout: &OutputLayout,
    txns: &[Transaction],
    results: &[ClassificationResult],
) -> Option<Aggregation> {
    let col = layout.headers().iter().position(|h| *h == spec.column)?;
    let mut grouped: Grouped<String, SpendAcc> = Grouped::new();
    for (txn, result) in txns.iter().zip(results) {
        let mut record = layout.record(txn, result);
        let acc = grouped.entry(std::mem::take(&mut record[col]));
        acc.rows += 1;
        acc.spend += txn.amount;
    }
    let mut groups: Vec<GroupSpend> = grouped
        .into_vec()
        .into_iter()
        .map(|(value, acc)| GroupSpend {
            value,
            rows: acc.rows,
            total_spend: acc.spend,
        })
        .collect();
    by_spend_desc(&mut groups, |g| g.total_spend);
    if let Some(n) = spec.top_n {
        groups.truncate(n);
    }
    Some(Aggregation {
        name: spec.name.clone(),
        column: spec.column.clone(),
        groups,
    })
}

/// Codes of unmapped rows, most common first; ties in first-seen order.
pub fn unmapped_codes(txns: &[Transaction], results: &[ClassificationResult]) -> Vec<CodeCount> {
    let mut grouped: Grouped<&str, usize> = Grouped::new();
    for (txn, result) in txns.iter().zip(results) {
        if result.method == Method::Unmapped {
            *grouped.entry(txn.category_code.as_str()) += 1;
        }
    }
    let mut out: Vec<CodeCount> = grouped
        .into_vec()
        .into_iter()
        .map(|(code, rows)| CodeCount {
            code: code.to_string(),
            rows,
        })
        .collect();
    out.sort_by(|a, b| b.rows.cmp(&a.rows));
    out
}

pub struct SummaryInput<'a> {
    pub client: &'a str,
    pub txns: &'a [Transaction],
    pub results: &'a [ClassificationResult],
    pub counts: &'a TierCounts,
    pub layout: &'a OutputLayout<'a>,
    pub aggregations: &'a [AggregationSpec],
    pub unknown_keys: &'a [String],
}

/// Build the run summary. Aggregations over unknown columns are skipped and
/// recorded in `quality`; the summary snapshots `quality` afterwards.
pub fn build_summary(input: SummaryInput, quality: &mut DataQuality) -> RunSummary {
    let SummaryInput {
        client,
        txns,
        results,
        counts,
        layout,
        aggregations,
        unknown_keys,
    } = input;
    let total_rows = results.len();
    let total_spend: f64 = txns.iter().map(|t| t.amount).sum();

    let methods = Method::ALL
        .iter()
        .map(|&m| MethodCount {
            method: m,
            label: m.display_name(),
            rows: results.iter().filter(|r| r.method == m).count(),
        })
        .collect();
    let review_tiers = ReviewTier::ALL
        .iter()
        .map(|&tier| {
            let rows = results.iter().filter(|r| r.review_tier == tier).count();
            TierShare {
                tier,
                rows,
                percent: percent(rows, total_rows),
            }
        })
        .collect();

    let mut custom = Vec::new();
    for spec in aggregations {
        match aggregate(spec, layout, txns, results) {
            Some(agg) => custom.push(agg),
            None => quality.record(
                IssueKind::UnknownAggregationColumn,
                format!("aggregation '{}': column '{}' not in output", spec.name, spec.column),
            ),
        }
    }

    let data_quality = quality
        .kinds()
        .into_iter()
        .map(|kind| QualityCount {
            issue: kind.label(),
            count: quality.count(kind),
            samples: quality
                .samples(kind, QUALITY_SAMPLES)
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
        .collect();

    RunSummary {
        client: client.to_string(),
        total_rows,
        unique_suppliers: txns.iter().map(|t| t.supplier.as_str()).collect::<HashSet<_>>().len(),
        unique_category_codes: txns
            .iter()
            .map(|t| t.category_code.as_str())
            .collect::<HashSet<_>>()
            .len(),
        total_spend,
        average_amount: if total_rows == 0 { 0.0 } else { total_spend / total_rows as f64 },
        methods,
        review_tiers,
        tier_counts: counts.clone(),
        spend_by_l1: spend_by_l1(txns, results),
        spend_by_l2: spend_by_l2(txns, results),
        aggregations: custom,
        unmapped_codes: unmapped_codes(txns, results),
        unknown_taxonomy_keys: unknown_keys.to_vec(),
        data_quality,
    }
}
