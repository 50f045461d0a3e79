use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::{CategorizeError, Result};
use crate::models::{DataQuality, IssueKind, OptionalFields, Transaction, TransactionBatch};
use crate::reports::OutputLayout;
use crate::settings::ColumnMap;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a monetary cell. Unparseable values become `None`.
pub fn try_parse_amount(raw: &str) -> Option<f64> {
    let s: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '"' | '$') && !c.is_whitespace())
        .collect();
    if s.is_empty() {
        return None;
    }
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.parse::<f64>().ok().map(|v| -v);
    }
    s.parse().ok().filter(|v: &f64| v.is_finite())
}

/// Pull the category code out of the raw category-source value.
///
/// With a pattern, the first capture group (or the whole match when the
/// pattern has no groups) wins; a value the pattern does not match is used
/// verbatim.
pub fn extract_category_code(raw: &str, pattern: Option<&Regex>) -> String {
    let trimmed = raw.trim();
    let Some(re) = pattern else {
        return trimmed.to_string();
    };
    match re.captures(trimmed) {
        Some(caps) => caps
            .get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| trimmed.to_string()),
        None => trimmed.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Table: header row plus string cells
// ---------------------------------------------------------------------------

/// Which worksheet to read from a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Sheet {
    Index(usize),
    Name(String),
}

impl Default for Sheet {
    fn default() -> Self {
        Sheet::Index(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell value, empty when the row is short.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows[row].get(col).map(String::as_str).unwrap_or("")
    }
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xls"))
}

pub fn read_table(path: &Path, sheet: &Sheet) -> Result<Table> {
    if is_spreadsheet(path) {
        read_workbook(path, sheet)
    } else {
        read_csv(path)
    }
}

fn read_csv(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));
    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    // Empty lines never reach here; a line of bare delimiters is a row.
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { headers, rows })
}

#[cfg(feature = "xlsx")]
fn read_workbook(path: &Path, sheet: &Sheet) -> Result<Table> {
    use calamine::{Data, Reader};

    use crate::fmt::format_number;

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| CategorizeError::Spreadsheet(format!("Failed to open {}: {e}", path.display())))?;

    let range = match sheet {
        Sheet::Name(name) => workbook.worksheet_range(name).map_err(|e| {
            CategorizeError::config(format!("Sheet '{name}' not readable in {}: {e}", path.display()))
        })?,
        Sheet::Index(idx) => workbook
            .worksheet_range_at(*idx)
            .ok_or_else(|| {
                CategorizeError::config(format!("Sheet index {idx} not found in {}", path.display()))
            })?
            .map_err(|e| CategorizeError::Spreadsheet(e.to_string()))?,
    };

    let cell_text = |cell: &Data| -> String {
        match cell {
            Data::Empty => String::new(),
            Data::String(s) => s.clone(),
            Data::Float(f) => format_number(*f),
            Data::Int(i) => i.to_string(),
            Data::Bool(b) => b.to_string(),
            Data::DateTime(dt) => format_number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
            Data::Error(_) => String::new(),
        }
    };

    let mut iter = range.rows();
    let headers = iter
        .next()
        .map(|row| row.iter().map(|c| cell_text(c).trim().to_string()).collect())
        .unwrap_or_default();
    let rows = iter
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(Table { headers, rows })
}

#[cfg(not(feature = "xlsx"))]
fn read_workbook(path: &Path, _sheet: &Sheet) -> Result<Table> {
    Err(CategorizeError::config(format!(
        "{}: spreadsheet input requires the `xlsx` feature",
        path.display()
    )))
}

// ---------------------------------------------------------------------------
// Transaction batch
// ---------------------------------------------------------------------------

/// Build the transaction batch from a raw table, validating columns first.
pub fn load_batch(
    table: &Table,
    columns: &ColumnMap,
    code_pattern: Option<&Regex>,
    quality: &mut DataQuality,
) -> Result<TransactionBatch> {
    let mut expected: Vec<(&str, &str)> = vec![
        ("category_source", columns.category_source.as_str()),
        ("supplier", columns.supplier.as_str()),
        ("amount", columns.amount.as_str()),
    ];
    for (key, col) in [
        ("description", &columns.description),
        ("line_of_service", &columns.line_of_service),
        ("cost_center", &columns.cost_center),
    ] {
        if let Some(col) = col {
            expected.push((key, col.as_str()));
        }
    }
    let missing: Vec<String> = expected
        .iter()
        .filter(|(_, col)| table.column(col).is_none())
        .map(|(key, col)| format!("'{col}' (from columns.{key})"))
        .collect();
    if !missing.is_empty() {
        return Err(CategorizeError::config(format!(
            "Columns not found in input: {}",
            missing.join(", ")
        )));
    }
    if table.rows.is_empty() {
        return Err(CategorizeError::config("Input file has 0 data rows"));
    }

    let optional = |name: &Option<String>| name.as_deref().and_then(|n| table.column(n));
    let source_idx = table.column(&columns.category_source);
    let supplier_idx = table.column(&columns.supplier);
    let amount_idx = table.column(&columns.amount);
    let desc_idx = optional(&columns.description);
    let los_idx = optional(&columns.line_of_service);
    let cc_idx = optional(&columns.cost_center);
    let (passthrough_columns, passthrough_idx) = resolve_passthrough(table, columns);

    let get = |row: usize, col: Option<usize>| -> String {
        col.map(|c| table.cell(row, c).to_string()).unwrap_or_default()
    };

    let mut transactions = Vec::with_capacity(table.rows.len());
    for row in 0..table.rows.len() {
        let category_source = get(row, source_idx).trim().to_string();
        let raw_amount = get(row, amount_idx);
        let amount = match try_parse_amount(&raw_amount) {
            Some(v) => v,
            None => {
                if !raw_amount.trim().is_empty() {
                    quality.record(
                        IssueKind::CoercedAmount,
                        format!("row {}: '{}'", row + 1, raw_amount.trim()),
                    );
                }
                0.0
            }
        };
        transactions.push(Transaction {
            category_code: extract_category_code(&category_source, code_pattern),
            category_source,
            supplier: get(row, supplier_idx),
            amount,
            description: get(row, desc_idx),
            line_of_service: get(row, los_idx),
            cost_center: get(row, cc_idx),
            passthrough: passthrough_idx.iter().map(|&c| get(row, Some(c))).collect(),
        });
    }

    tracing::info!(rows = transactions.len(), columns = table.headers.len(), "loaded batch");

    Ok(TransactionBatch {
        transactions,
        fields: OptionalFields {
            description: desc_idx.is_some(),
            line_of_service: los_idx.is_some(),
            cost_center: cc_idx.is_some(),
        },
        passthrough_columns,
    })
}

/// Passthrough columns actually copied to the output: present in the input,
/// not already an output column, each once. Returns names and their indices.
fn resolve_passthrough(table: &Table, columns: &ColumnMap) -> (Vec<String>, Vec<usize>) {
    let reserved = OutputLayout::reserved_headers(columns);
    let mut names: Vec<String> = Vec::new();
    let mut indices = Vec::new();
    for name in &columns.passthrough {
        if reserved.contains(name) || names.contains(name) {
            tracing::warn!(column = %name, "passthrough column already in output; ignored");
            continue;
        }
        match table.column(name) {
            Some(idx) => {
                names.push(name.clone());
                indices.push(idx);
            }
            None => tracing::warn!(column = %name, "passthrough column not in input; ignored"),
        }
    }
    (names, indices)
}
