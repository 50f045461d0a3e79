use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Number, Value};

use crate::error::{CategorizeError, Result};
use crate::fmt::format_number;
use crate::models::{DataQuality, IssueKind};
use crate::settings::read_yaml;
use crate::taxonomy::TaxonomyIndex;

const DEFAULT_MAPPING_CONFIDENCE: f64 = 0.85;
const DEFAULT_KEYWORD_CONFIDENCE: f64 = 0.95;

// ---------------------------------------------------------------------------
// Rule types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MappingEntry {
    pub name: String,
    pub taxonomy_key: String,
    pub confidence: f64,
    pub ambiguous: bool,
}

/// Category code to taxonomy key. Ambiguous entries are only consulted after
/// every refinement tier has had its chance.
#[derive(Debug, Clone, Default)]
pub struct CategoryMapping {
    entries: BTreeMap<String, MappingEntry>,
}

impl CategoryMapping {
    pub fn direct(&self, code: &str) -> Option<&MappingEntry> {
        self.entries.get(code).filter(|e| !e.ambiguous)
    }

    pub fn ambiguous(&self, code: &str) -> Option<&MappingEntry> {
        self.entries.get(code).filter(|e| e.ambiguous)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ambiguous_count(&self) -> usize {
        self.entries.values().filter(|e| e.ambiguous).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappingEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[cfg(test)]
    pub fn insert(&mut self, code: &str, taxonomy_key: &str, confidence: f64, ambiguous: bool) {
        self.entries.insert(
            code.to_string(),
            MappingEntry {
                name: String::new(),
                taxonomy_key: taxonomy_key.to_string(),
                confidence,
                ambiguous,
            },
        );
    }
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub pattern: Regex,
    pub category: String,
    pub confidence: f64,
}

/// Which transaction field a refinement rule's pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementField {
    Supplier,
    LineOfService,
    CostCenter,
}

impl RefinementField {
    pub fn section(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier_rules",
            Self::LineOfService => "context_rules",
            Self::CostCenter => "cost_center_rules",
        }
    }

    pub fn pattern_key(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier_pattern",
            Self::LineOfService => "line_of_service_pattern",
            Self::CostCenter => "cost_center_pattern",
        }
    }
}

/// Supplier, context or cost-center rule, restricted to a set of codes.
#[derive(Debug, Clone)]
pub struct RefinementRule {
    /// Codes as written, for reporting.
    pub category_codes: Vec<String>,
    code_set: HashSet<String>,
    pub pattern: Regex,
    pub taxonomy_key: String,
    pub confidence: f64,
}

impl RefinementRule {
    #[cfg(test)]
    pub fn new(codes: &[&str], pattern: &str, taxonomy_key: &str, confidence: f64) -> Result<Self> {
        let category_codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        Ok(Self {
            code_set: category_codes.iter().cloned().collect(),
            category_codes,
            pattern: compile(pattern, "refinement rule")?,
            taxonomy_key: taxonomy_key.to_string(),
            confidence,
        })
    }

    pub fn applies_to(&self, code: &str) -> bool {
        self.code_set.contains(code)
    }
}

/// Post-classification correction keyed by derived L1 and supplier.
#[derive(Debug, Clone)]
pub struct OverrideRule {
    pub pattern: Regex,
    pub override_from_l1: Vec<String>,
    pub taxonomy_key: String,
    pub confidence: f64,
}

impl OverrideRule {
    pub fn applies_to_l1(&self, l1: &str) -> bool {
        self.override_from_l1.iter().any(|v| v == l1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefinementRules {
    pub supplier: Vec<RefinementRule>,
    pub context: Vec<RefinementRule>,
    pub cost_center: Vec<RefinementRule>,
    pub overrides: Vec<OverrideRule>,
}

impl RefinementRules {
    pub fn for_field(&self, field: RefinementField) -> &[RefinementRule] {
        match field {
            RefinementField::Supplier => &self.supplier,
            RefinementField::LineOfService => &self.context,
            RefinementField::CostCenter => &self.cost_center,
        }
    }
}

/// Everything the waterfall consults. Built once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub mapping: CategoryMapping,
    pub keywords: Vec<KeywordRule>,
    pub refinement: RefinementRules,
}

// ---------------------------------------------------------------------------
// Raw (as written) rule files
// ---------------------------------------------------------------------------

/// YAML scalars used as codes; `5010`, `5010.0` and `"5010"` are the same code.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(Number),
    Bool(bool),
}

impl Scalar {
    pub fn into_code(self) -> String {
        match self {
            Scalar::Text(s) => s.trim().to_string(),
            Scalar::Number(n) => number_code(&n),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

/// Floats read like spreadsheet cells, so `5010.0` is code `5010`.
fn number_code(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() => format_number(f),
        _ => n.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RawMappingEntry {
    #[serde(default)]
    name: String,
    taxonomy_key: String,
    confidence: Option<f64>,
    #[serde(default)]
    ambiguous: bool,
}

#[derive(Debug, Deserialize)]
struct RawKeywordRule {
    pattern: String,
    category: String,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRefinementRule {
    category_codes: Vec<Scalar>,
    supplier_pattern: Option<String>,
    line_of_service_pattern: Option<String>,
    cost_center_pattern: Option<String>,
    taxonomy_key: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawOverrideRule {
    supplier_pattern: String,
    override_from_l1: Vec<String>,
    taxonomy_key: String,
    confidence: f64,
}

fn compile(pattern: &str, label: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| CategorizeError::config(format!("{label} invalid regex '{pattern}': {e}")))
}

fn check_confidence(confidence: f64, label: &str) -> Result<f64> {
    if confidence > 0.0 && confidence <= 1.0 {
        Ok(confidence)
    } else {
        Err(CategorizeError::config(format!(
            "{label} confidence {confidence} out of range (0, 1]"
        )))
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(number_code(n)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The list under `section`, or empty when absent or null.
fn section_items(doc: &Value, section: &str) -> Result<Vec<Value>> {
    match doc.get(section) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => Ok(items.clone()),
        Some(_) => Err(CategorizeError::config(format!("'{section}' must be a list"))),
    }
}

/// Check required keys on a raw item, then deserialize it.
fn parse_item<T: DeserializeOwned>(mut item: Value, label: &str, required: &[&str]) -> Result<T> {
    let Value::Mapping(map) = &mut item else {
        return Err(CategorizeError::config(format!("{label} is not a mapping")));
    };
    if map.contains_key("sc_codes") && !map.contains_key("category_codes") {
        if let Some(codes) = map.remove("sc_codes") {
            map.insert(Value::String("category_codes".to_string()), codes);
        }
    }
    for key in required {
        if !map.contains_key(*key) {
            return Err(CategorizeError::config(format!(
                "{label} missing required key '{key}'"
            )));
        }
    }
    serde_yaml::from_value(item)
        .map_err(|e| CategorizeError::config(format!("{label} is malformed: {e}")))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn parse_category_mapping(doc: &Value) -> Result<CategoryMapping> {
    let mut entries = BTreeMap::new();
    let mappings = match doc.get("mappings") {
        None | Some(Value::Null) => return Ok(CategoryMapping { entries }),
        Some(Value::Mapping(m)) => m,
        Some(_) => return Err(CategorizeError::config("'mappings' must be a mapping")),
    };
    for (code, info) in mappings {
        let code = scalar_key(code)
            .ok_or_else(|| CategorizeError::config("category mapping has a non-scalar code"))?;
        let label = format!("category mapping '{code}'");
        let raw: RawMappingEntry = parse_item(info.clone(), &label, &["taxonomy_key"])?;
        let confidence = check_confidence(
            raw.confidence.unwrap_or(DEFAULT_MAPPING_CONFIDENCE),
            &label,
        )?;
        entries.insert(
            code,
            MappingEntry {
                name: raw.name,
                taxonomy_key: raw.taxonomy_key,
                confidence,
                ambiguous: raw.ambiguous,
            },
        );
    }
    Ok(CategoryMapping { entries })
}

pub fn parse_keyword_rules(doc: &Value) -> Result<Vec<KeywordRule>> {
    section_items(doc, "rules")?
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let label = format!("keyword_rules[{i}]");
            let raw: RawKeywordRule = parse_item(item, &label, &["pattern", "category"])?;
            Ok(KeywordRule {
                pattern: compile(&raw.pattern, &label)?,
                category: raw.category,
                confidence: check_confidence(
                    raw.confidence.unwrap_or(DEFAULT_KEYWORD_CONFIDENCE),
                    &label,
                )?,
            })
        })
        .collect()
}

fn parse_refinement_section(doc: &Value, field: RefinementField) -> Result<Vec<RefinementRule>> {
    let section = field.section();
    let required = ["category_codes", field.pattern_key(), "taxonomy_key", "confidence"];
    section_items(doc, section)?
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let label = format!("{section}[{i}]");
            let raw: RawRefinementRule = parse_item(item, &label, &required)?;
            let pattern = match field {
                RefinementField::Supplier => raw.supplier_pattern,
                RefinementField::LineOfService => raw.line_of_service_pattern,
                RefinementField::CostCenter => raw.cost_center_pattern,
            }
            .unwrap_or_default();
            let category_codes: Vec<String> =
                raw.category_codes.into_iter().map(Scalar::into_code).collect();
            Ok(RefinementRule {
                code_set: category_codes.iter().cloned().collect(),
                category_codes,
                pattern: compile(&pattern, &label)?,
                taxonomy_key: raw.taxonomy_key,
                confidence: check_confidence(raw.confidence, &label)?,
            })
        })
        .collect()
}

fn parse_override_rules(doc: &Value) -> Result<Vec<OverrideRule>> {
    let section = "supplier_override_rules";
    section_items(doc, section)?
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let label = format!("{section}[{i}]");
            let raw: RawOverrideRule = parse_item(
                item,
                &label,
                &["supplier_pattern", "override_from_l1", "taxonomy_key", "confidence"],
            )?;
            Ok(OverrideRule {
                pattern: compile(&raw.supplier_pattern, &label)?,
                override_from_l1: raw.override_from_l1,
                taxonomy_key: raw.taxonomy_key,
                confidence: check_confidence(raw.confidence, &label)?,
            })
        })
        .collect()
}

pub fn parse_refinement_rules(doc: &Value) -> Result<RefinementRules> {
    Ok(RefinementRules {
        supplier: parse_refinement_section(doc, RefinementField::Supplier)?,
        context: parse_refinement_section(doc, RefinementField::LineOfService)?,
        cost_center: parse_refinement_section(doc, RefinementField::CostCenter)?,
        overrides: parse_override_rules(doc)?,
    })
}

impl RuleSet {
    pub fn load(mapping_path: &Path, keyword_path: &Path, refinement_path: &Path) -> Result<Self> {
        let rules = Self {
            mapping: parse_category_mapping(&read_yaml(mapping_path)?)?,
            keywords: parse_keyword_rules(&read_yaml(keyword_path)?)?,
            refinement: parse_refinement_rules(&read_yaml(refinement_path)?)?,
        };
        tracing::info!(
            mappings = rules.mapping.len(),
            ambiguous = rules.mapping.ambiguous_count(),
            keyword_rules = rules.keywords.len(),
            supplier_rules = rules.refinement.supplier.len(),
            context_rules = rules.refinement.context.len(),
            cost_center_rules = rules.refinement.cost_center.len(),
            override_rules = rules.refinement.overrides.len(),
            "loaded rule sets"
        );
        Ok(rules)
    }

    /// Record every mapping or rule whose target key is not in the taxonomy.
    /// Such targets still apply; their rows just get no L1..L5 breakdown.
    pub fn check_targets(&self, taxonomy: &TaxonomyIndex, quality: &mut DataQuality) {
        for (code, entry) in self.mapping.iter() {
            if !taxonomy.contains(&entry.taxonomy_key) {
                let label = if entry.name.is_empty() {
                    code.to_string()
                } else {
                    format!("{code} ({})", entry.name)
                };
                quality.record(
                    IssueKind::UnknownTaxonomyKey,
                    format!("category mapping {label} -> {}", entry.taxonomy_key),
                );
            }
        }
        for (i, rule) in self.keywords.iter().enumerate() {
            if !taxonomy.contains(&rule.category) {
                quality.record(
                    IssueKind::UnknownTaxonomyKey,
                    format!("keyword_rules[{i}] -> {}", rule.category),
                );
            }
        }
        for field in [
            RefinementField::Supplier,
            RefinementField::LineOfService,
            RefinementField::CostCenter,
        ] {
            for (i, rule) in self.refinement.for_field(field).iter().enumerate() {
                if !taxonomy.contains(&rule.taxonomy_key) {
                    quality.record(
                        IssueKind::UnknownTaxonomyKey,
                        format!("{}[{i}] -> {}", field.section(), rule.taxonomy_key),
                    );
                }
            }
        }
        for (i, rule) in self.refinement.overrides.iter().enumerate() {
            if !taxonomy.contains(&rule.taxonomy_key) {
                quality.record(
                    IssueKind::UnknownTaxonomyKey,
                    format!("supplier_override_rules[{i}] -> {}", rule.taxonomy_key),
                );
            }
        }
    }
}
