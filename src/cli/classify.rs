use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::categorizer::categorize_batch;
use crate::error::Result;
use crate::export::{write_outputs, RunOutput};
use crate::fmt::money;
use crate::importer::{load_batch, read_table};
use crate::models::{DataQuality, ReviewTier};
use crate::reports::{build_summary, OutputLayout, RunSummary, SummaryInput};
use crate::rules::RuleSet;
use crate::settings::load_config;
use crate::taxonomy::TaxonomyIndex;

pub fn run(
    config: &Path,
    input: Option<&Path>,
    output_dir: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    let cfg = load_config(config, input, output_dir)?;
    let mut quality = DataQuality::default();

    let rules = RuleSet::load(
        &cfg.paths.category_mapping,
        &cfg.paths.keyword_rules,
        &cfg.paths.refinement_rules,
    )?;
    let taxonomy = TaxonomyIndex::load(&cfg.paths.taxonomy)?;
    tracing::info!(entries = taxonomy.len(), "loaded taxonomy");
    tracing::info!(
        high = cfg.thresholds.high(),
        medium = cfg.thresholds.medium(),
        "review thresholds"
    );
    rules.check_targets(&taxonomy, &mut quality);

    let table = read_table(&cfg.paths.input, &cfg.sheet)?;
    let batch = load_batch(
        &table,
        &cfg.columns,
        cfg.category_code_pattern.as_ref(),
        &mut quality,
    )?;

    let outcome = categorize_batch(&batch, &rules, &taxonomy, &cfg.thresholds);

    let layout = OutputLayout::new(&cfg.columns, &batch.passthrough_columns);
    let summary = build_summary(
        SummaryInput {
            client: &cfg.client_name,
            txns: &batch.transactions,
            results: &outcome.results,
            counts: &outcome.counts,
            layout: &layout,
            aggregations: &cfg.aggregations,
            unknown_keys: &outcome.unknown_keys,
        },
        &mut quality,
    );

    println!("{}", format_summary(&summary));
    if !cfg.deprecations.is_empty() {
        println!("{}", "Deprecated config keys:".yellow().bold());
        for d in &cfg.deprecations {
            println!("  {d}");
        }
    }
    if !quality.is_empty() {
        println!("{}", format_quality(&summary));
    }

    if dry_run {
        println!("{}", "Dry run: no files written.".dimmed());
        return Ok(());
    }
    let dir = write_outputs(
        &RunOutput {
            layout: &layout,
            txns: &batch.transactions,
            results: &outcome.results,
            summary: &summary,
        },
        &cfg.paths.output_dir,
        &cfg.paths.output_prefix,
    )?;
    println!("Results written to {}", dir.display());
    Ok(())
}

fn or_none(label: &str) -> &str {
    if label.is_empty() {
        "(none)"
    } else {
        label
    }
}

pub fn format_summary(s: &RunSummary) -> String {
    let mut out = String::new();
    if !s.client.is_empty() {
        out.push_str(&format!("{}\n", s.client.bold()));
    }
    out.push_str(&format!(
        "{} rows, {} suppliers, {} category codes, total {} (avg {})\n",
        s.total_rows,
        s.unique_suppliers,
        s.unique_category_codes,
        money(s.total_spend),
        money(s.average_amount)
    ));

    let mut methods = Table::new();
    methods.set_header(vec!["Method", "Rows"]);
    for m in &s.methods {
        let rows = if m.rows == 0 {
            Cell::new("0".dimmed())
        } else {
            Cell::new(m.rows)
        };
        methods.add_row(vec![Cell::new(m.label), rows]);
    }
    let skipped: Vec<&str> = [
        ("Context Refinement", s.tier_counts.context_refinement),
        ("Cost Center Refinement", s.tier_counts.cost_center_refinement),
    ]
    .iter()
    .filter(|(_, n)| n.is_none())
    .map(|(name, _)| *name)
    .collect();
    out.push_str(&format!("Classification\n{methods}\n"));
    if !skipped.is_empty() {
        out.push_str(&format!("{}\n", format!("Skipped: {}", skipped.join(", ")).dimmed()));
    }

    let mut tiers = Table::new();
    tiers.set_header(vec!["Review Tier", "Rows", "%"]);
    for t in &s.review_tiers {
        let label = match t.tier {
            ReviewTier::AutoAccept => t.tier.label().green(),
            ReviewTier::QuickReview => t.tier.label().yellow(),
            ReviewTier::ManualReview => t.tier.label().red(),
        };
        tiers.add_row(vec![
            Cell::new(label),
            Cell::new(t.rows),
            Cell::new(format!("{:.1}", t.percent)),
        ]);
    }
    out.push_str(&format!("Review\n{tiers}\n"));

    let mut l1 = Table::new();
    l1.set_header(vec!["Category L1", "Rows", "Spend", "Suppliers", "Avg Conf"]);
    for r in &s.spend_by_l1 {
        l1.add_row(vec![
            Cell::new(or_none(&r.l1)),
            Cell::new(r.rows),
            Cell::new(money(r.total_spend)),
            Cell::new(r.unique_suppliers),
            Cell::new(format!("{:.3}", r.avg_confidence)),
        ]);
    }
    out.push_str(&format!("Spend by Category\n{l1}"));
    if !s.unknown_taxonomy_keys.is_empty() {
        out.push_str(&format!(
            "\n{} {}",
            "Keys missing from taxonomy (levels left empty):".yellow(),
            s.unknown_taxonomy_keys.join(", ")
        ));
    }

    if !s.unmapped_codes.is_empty() {
        let mut unmapped = Table::new();
        unmapped.set_header(vec!["Unmapped Code", "Rows"]);
        for c in s.unmapped_codes.iter().take(10) {
            unmapped.add_row(vec![Cell::new(or_none(&c.code)), Cell::new(c.rows)]);
        }
        out.push_str(&format!("\n{unmapped}"));
    }
    out
}

fn format_quality(s: &RunSummary) -> String {
    let mut out = format!("{}\n", "Data quality warnings:".yellow().bold());
    for q in &s.data_quality {
        out.push_str(&format!("  {} {}\n", q.count, q.issue));
        for sample in &q.samples {
            out.push_str(&format!("    {}\n", sample.dimmed()));
        }
    }
    out.trim_end().to_string()
}
