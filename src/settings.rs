use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{CategorizeError, Result};
use crate::importer::Sheet;
use crate::reviewer::Thresholds;

/// Legacy key spellings, rewritten before validation: (section, old, new).
const ALIASES: &[(&str, &str, &str)] = &[
    ("paths", "sc_mapping", "category_mapping"),
    ("columns", "spend_category", "category_source"),
    ("columns", "line_memo", "description"),
    ("classification", "sc_code_pattern", "category_code_pattern"),
];

const REQUIRED_SECTIONS: &[&str] = &["client", "paths", "columns", "classification"];

// ---------------------------------------------------------------------------
// Raw (as written) configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    client: RawClient,
    paths: RawPaths,
    columns: RawColumns,
    classification: RawClassification,
    #[serde(default)]
    input_format: RawInputFormat,
    #[serde(default)]
    aggregations: Vec<AggregationSpec>,
}

#[derive(Debug, Deserialize)]
struct RawClient {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPaths {
    input: Option<String>,
    category_mapping: Option<String>,
    taxonomy: Option<String>,
    keyword_rules: Option<String>,
    refinement_rules: Option<String>,
    output_dir: Option<String>,
    output_prefix: Option<String>,
    test_assertions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawColumns {
    category_source: Option<String>,
    supplier: Option<String>,
    amount: Option<String>,
    description: Option<String>,
    line_of_service: Option<String>,
    cost_center: Option<String>,
    #[serde(default)]
    passthrough: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    confidence_high: Option<f64>,
    confidence_medium: Option<f64>,
    category_code_pattern: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInputFormat {
    sheet_name: Option<Sheet>,
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

/// A custom "spend by column" view requested by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationSpec {
    pub name: String,
    pub column: String,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub input: PathBuf,
    pub category_mapping: PathBuf,
    pub taxonomy: PathBuf,
    pub keyword_rules: PathBuf,
    pub refinement_rules: PathBuf,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    /// Optional expectations checked by `spendcat check`.
    pub test_assertions: Option<PathBuf>,
}

/// Input column names for each transaction field.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub category_source: String,
    pub supplier: String,
    pub amount: String,
    pub description: Option<String>,
    pub line_of_service: Option<String>,
    pub cost_center: Option<String>,
    pub passthrough: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_name: String,
    pub paths: ResolvedPaths,
    pub columns: ColumnMap,
    pub thresholds: Thresholds,
    pub category_code_pattern: Option<Regex>,
    pub sheet: Sheet,
    pub aggregations: Vec<AggregationSpec>,
    /// Deprecation notices produced while reading the file.
    pub deprecations: Vec<String>,
}

/// Rewrite legacy keys in place and describe each rewrite.
fn apply_aliases(config: &mut Mapping) -> Vec<String> {
    let mut warnings = Vec::new();
    for (section, old_key, new_key) in ALIASES {
        let Some(Value::Mapping(sec)) = config.get_mut(*section) else {
            continue;
        };
        if sec.contains_key(*old_key) && !sec.contains_key(*new_key) {
            if let Some(value) = sec.remove(*old_key) {
                sec.insert(Value::String((*new_key).to_string()), value);
                warnings.push(format!(
                    "DEPRECATION: '{section}.{old_key}' renamed to '{section}.{new_key}'. Update your config."
                ));
            }
        }
    }
    warnings
}

fn required(value: Option<String>, key: &str, what: &str) -> Result<String> {
    value.ok_or_else(|| CategorizeError::config(format!("Missing required {what}: '{key}'")))
}

/// Expand `~` and resolve relative paths against the config file's directory.
pub fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

pub fn read_yaml(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|source| CategorizeError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_config(
    config_path: &Path,
    input_override: Option<&Path>,
    output_dir_override: Option<&Path>,
) -> Result<ClientConfig> {
    if !config_path.exists() {
        return Err(CategorizeError::config(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }
    let value = read_yaml(config_path)?;
    let Value::Mapping(mut mapping) = value else {
        return Err(CategorizeError::config(format!(
            "Config file is not a mapping: {}",
            config_path.display()
        )));
    };

    let deprecations = apply_aliases(&mut mapping);
    for w in &deprecations {
        tracing::warn!("{w}");
    }

    for section in REQUIRED_SECTIONS {
        if !mapping.contains_key(*section) {
            return Err(CategorizeError::config(format!(
                "Missing required config section: '{section}'"
            )));
        }
    }

    let raw: RawConfig =
        serde_yaml::from_value(Value::Mapping(mapping)).map_err(|source| CategorizeError::Yaml {
            path: config_path.display().to_string(),
            source,
        })?;

    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let p = raw.paths;
    let input = required(p.input, "paths.input", "path")?;
    let category_mapping = required(p.category_mapping, "paths.category_mapping", "path")?;
    let taxonomy = required(p.taxonomy, "paths.taxonomy", "path")?;
    let keyword_rules = required(p.keyword_rules, "paths.keyword_rules", "path")?;
    let refinement_rules = required(p.refinement_rules, "paths.refinement_rules", "path")?;
    let output_dir = required(p.output_dir, "paths.output_dir", "path")?;
    let output_prefix = required(p.output_prefix, "paths.output_prefix", "path")?;

    let c = raw.columns;
    let columns = ColumnMap {
        category_source: required(c.category_source, "columns.category_source", "column mapping")?,
        supplier: required(c.supplier, "columns.supplier", "column mapping")?,
        amount: required(c.amount, "columns.amount", "column mapping")?,
        description: c.description,
        line_of_service: c.line_of_service,
        cost_center: c.cost_center,
        passthrough: c.passthrough,
    };

    let high = raw.classification.confidence_high.ok_or_else(|| {
        CategorizeError::config(
            "Missing required classification param: 'classification.confidence_high'",
        )
    })?;
    let medium = raw.classification.confidence_medium.ok_or_else(|| {
        CategorizeError::config(
            "Missing required classification param: 'classification.confidence_medium'",
        )
    })?;
    let thresholds = Thresholds::new(high, medium)?;

    let category_code_pattern = raw
        .classification
        .category_code_pattern
        .map(|pat| {
            Regex::new(&pat).map_err(|e| {
                CategorizeError::config(format!(
                    "classification.category_code_pattern invalid regex '{pat}': {e}"
                ))
            })
        })
        .transpose()?;

    let paths = ResolvedPaths {
        input: match input_override {
            Some(path) => path.to_path_buf(),
            None => resolve_path(&base_dir, &input),
        },
        category_mapping: resolve_path(&base_dir, &category_mapping),
        taxonomy: resolve_path(&base_dir, &taxonomy),
        keyword_rules: resolve_path(&base_dir, &keyword_rules),
        refinement_rules: resolve_path(&base_dir, &refinement_rules),
        output_dir: match output_dir_override {
            Some(path) => path.to_path_buf(),
            None => resolve_path(&base_dir, &output_dir),
        },
        output_prefix,
        test_assertions: p.test_assertions.as_deref().map(|a| resolve_path(&base_dir, a)),
    };

    for (key, path) in [
        ("input", &paths.input),
        ("category_mapping", &paths.category_mapping),
        ("taxonomy", &paths.taxonomy),
        ("keyword_rules", &paths.keyword_rules),
        ("refinement_rules", &paths.refinement_rules),
    ] {
        if !path.exists() {
            return Err(CategorizeError::config(format!(
                "File not found: {} (from paths.{key})",
                path.display()
            )));
        }
    }

    Ok(ClientConfig {
        client_name: raw.client.name,
        paths,
        columns,
        thresholds,
        category_code_pattern,
        sheet: raw.input_format.sheet_name.unwrap_or_default(),
        aggregations: raw.aggregations,
        deprecations,
    })
}
