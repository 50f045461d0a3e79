use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fmt::round3;
use crate::models::{ClassificationResult, ReviewTier, Transaction};
use crate::reports::{OutputLayout, RunSummary};

/// Stems of the fixed result files. Aggregation files never take these.
const RESERVED_STEMS: [&str; 7] = [
    "all_results",
    "manual_review",
    "quick_review",
    "summary",
    "spend_by_l1",
    "spend_by_l2",
    "unmapped_categories",
];

/// Everything one run writes to disk.
pub struct RunOutput<'a> {
    pub layout: &'a OutputLayout<'a>,
    pub txns: &'a [Transaction],
    pub results: &'a [ClassificationResult],
    pub summary: &'a RunSummary,
}

/// `<output_dir>/<prefix>_<YYYYmmdd_HHMMSS>`
pub fn run_dir(output_dir: &Path, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    output_dir.join(format!("{prefix}_{stamp}"))
}

fn write_csv<H, R>(path: &Path, headers: &[H], rows: R) -> Result<()>
where
    H: AsRef<[u8]>,
    R: IntoIterator<Item = Vec<String>>,
{
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn results_for_tier(out: &RunOutput, tier: Option<ReviewTier>) -> Vec<Vec<String>> {
    out.txns
        .iter()
        .zip(out.results)
        .filter(|(_, r)| tier.map_or(true, |t| r.review_tier == t))
        .map(|(txn, r)| out.layout.record(txn, r))
        .collect()
}

fn summary_rows(s: &RunSummary) -> Vec<Vec<String>> {
    let mut rows = vec![
        vec!["Client".to_string(), s.client.clone()],
        vec!["Total Rows".to_string(), s.total_rows.to_string()],
        vec!["Unique Suppliers".to_string(), s.unique_suppliers.to_string()],
        vec!["Unique Category Codes".to_string(), s.unique_category_codes.to_string()],
        vec!["Total Spend".to_string(), format!("{:.2}", s.total_spend)],
        vec!["Average Amount".to_string(), format!("{:.2}", s.average_amount)],
    ];
    for m in &s.methods {
        rows.push(vec![m.label.to_string(), m.rows.to_string()]);
    }
    for t in &s.review_tiers {
        rows.push(vec![t.tier.label().to_string(), format!("{} ({}%)", t.rows, t.percent)]);
    }
    rows
}

/// Write every result file into a fresh timestamped directory under
/// `output_dir`. Returns the directory.
pub fn write_outputs(out: &RunOutput, output_dir: &Path, prefix: &str) -> Result<PathBuf> {
    let dir = run_dir(output_dir, prefix);
    std::fs::create_dir_all(&dir)?;
    let headers = out.layout.headers();

    write_csv(&dir.join("all_results.csv"), &headers, results_for_tier(out, None))?;
    for (tier, file) in [
        (ReviewTier::ManualReview, "manual_review.csv"),
        (ReviewTier::QuickReview, "quick_review.csv"),
    ] {
        let rows = results_for_tier(out, Some(tier));
        if !rows.is_empty() {
            write_csv(&dir.join(file), &headers, rows)?;
        }
    }

    let s = out.summary;
    write_csv(&dir.join("summary.csv"), &["Metric", "Value"], summary_rows(s))?;
    write_csv(
        &dir.join("spend_by_l1.csv"),
        &["CategoryLevel1", "Rows", "Total Spend", "Unique Suppliers", "Avg Confidence"],
        s.spend_by_l1.iter().map(|r| {
            vec![
                r.l1.clone(),
                r.rows.to_string(),
                format!("{:.2}", r.total_spend),
                r.unique_suppliers.to_string(),
                round3(r.avg_confidence).to_string(),
            ]
        }),
    )?;
    write_csv(
        &dir.join("spend_by_l2.csv"),
        &["CategoryLevel1", "CategoryLevel2", "Rows", "Total Spend"],
        s.spend_by_l2.iter().map(|r| {
            vec![
                r.l1.clone(),
                r.l2.clone(),
                r.rows.to_string(),
                format!("{:.2}", r.total_spend),
            ]
        }),
    )?;
    let names: Vec<&str> = s.aggregations.iter().map(|a| a.name.as_str()).collect();
    for (agg, file) in s.aggregations.iter().zip(aggregation_file_names(&names)) {
        write_csv(
            &dir.join(file),
            &[agg.column.as_str(), "Rows", "Total Spend"],
            agg.groups.iter().map(|g| {
                vec![g.value.clone(), g.rows.to_string(), format!("{:.2}", g.total_spend)]
            }),
        )?;
    }
    if !s.unmapped_codes.is_empty() {
        write_csv(
            &dir.join("unmapped_categories.csv"),
            &["Category Code", "Rows"],
            s.unmapped_codes
                .iter()
                .map(|c| vec![c.code.clone(), c.rows.to_string()]),
        )?;
    }

    let json = serde_json::to_string_pretty(s)?;
    std::fs::write(dir.join("summary.json"), json)?;

    tracing::info!(dir = %dir.display(), "wrote results");
    Ok(dir)
}

/// One file name per aggregation, distinct from each other and from the
/// fixed result files. A clash gets a numeric suffix: `summary_2.csv`.
fn aggregation_file_names(names: &[&str]) -> Vec<String> {
    let mut taken: HashSet<String> = RESERVED_STEMS.iter().map(|s| s.to_string()).collect();
    names
        .iter()
        .map(|name| {
            let base = file_stem(name);
            let mut stem = base.clone();
            let mut n = 2;
            while taken.contains(&stem) {
                stem = format!("{base}_{n}");
                n += 1;
            }
            if stem != base {
                tracing::warn!(aggregation = %name, file = %stem, "aggregation file name already taken; renamed");
            }
            taken.insert(stem.clone());
            format!("{stem}.csv")
        })
        .collect()
}

/// Lowercase, non-alphanumerics collapsed to `_`: "Spend by Facility" -> "spend_by_facility".
fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            stem.push(c.to_ascii_lowercase());
        } else if !stem.ends_with('_') {
            stem.push('_');
        }
    }
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "aggregation".to_string()
    } else {
        stem.to_string()
    }
}
