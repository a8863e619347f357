use std::path::PathBuf;

use thiserror::Error;

/// Dataset pipeline error types
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Missing precondition: {0}")]
    MissingPrecondition(String),

    #[error("Parse error in {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for dataset operations
pub type Result<T> = std::result::Result<T, DatasetError>;

impl DatasetError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        DatasetError::Parse {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors abort the whole run; everything else is recoverable per file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DatasetError::MissingPrecondition(_)
                | DatasetError::EmptyResult(_)
                | DatasetError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DatasetError::MissingPrecondition("log".into()).is_fatal());
        assert!(DatasetError::EmptyResult("no rows".into()).is_fatal());
        assert!(!DatasetError::parse("a.json", "bad").is_fatal());
    }

    #[test]
    fn test_parse_message_names_source() {
        let err = DatasetError::parse("TRP_0001.json", "missing data list");
        assert_eq!(
            err.to_string(),
            "Parse error in TRP_0001.json: missing data list"
        );
    }
}
