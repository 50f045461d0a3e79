use thiserror::Error;

#[derive(Error, Debug)]
pub enum CategorizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    /// Fatal configuration problem, raised before any row is classified.
    #[error("{0}")]
    Config(String),

    #[error("Rule check failed: {0} error(s) found")]
    CheckFailed(usize),
}

impl CategorizeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CategorizeError>;
