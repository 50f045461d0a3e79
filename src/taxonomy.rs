use std::collections::HashMap;
use std::path::Path;

use crate::error::{CategorizeError, Result};
use crate::importer::{read_table, Sheet, Table};
use crate::models::TaxonomyLevels;

const KEY_COLUMN: &str = "Key";
const LEVEL_COLUMNS: [&str; 5] = [
    "CategoryLevel1",
    "CategoryLevel2",
    "CategoryLevel3",
    "CategoryLevel4",
    "CategoryLevel5",
];

/// Taxonomy key to its L1..L5 breakdown. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyIndex {
    entries: HashMap<String, TaxonomyLevels>,
}

impl TaxonomyIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let table = read_table(path, &Sheet::default())?;
        Self::from_table(&table)
    }

    /// Level columns absent from the table read as empty.
    pub fn from_table(table: &Table) -> Result<Self> {
        let key_idx = table.column(KEY_COLUMN).ok_or_else(|| {
            CategorizeError::config(format!("Taxonomy table has no '{KEY_COLUMN}' column"))
        })?;
        let level_idx: Vec<Option<usize>> =
            LEVEL_COLUMNS.iter().map(|c| table.column(c)).collect();

        let mut entries = HashMap::with_capacity(table.rows.len());
        for row in 0..table.rows.len() {
            let key = table.cell(row, key_idx).trim();
            if key.is_empty() {
                continue;
            }
            let levels = TaxonomyLevels(std::array::from_fn(|i| {
                level_idx[i]
                    .map(|c| table.cell(row, c).trim().to_string())
                    .unwrap_or_default()
            }));
            if entries.insert(key.to_string(), levels).is_some() {
                return Err(CategorizeError::config(format!(
                    "Taxonomy key '{key}' appears more than once"
                )));
            }
        }
        Ok(Self { entries })
    }

    #[cfg(test)]
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, [&'static str; 5])>,
        K: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, levels)| (k.into(), TaxonomyLevels(levels.map(str::to_string))))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&TaxonomyLevels> {
        self.entries.get(key)
    }

    /// Levels for `key`, or five empty levels when the key is unknown.
    pub fn project(&self, key: &str) -> TaxonomyLevels {
        self.get(key).cloned().unwrap_or_default()
    }
}
