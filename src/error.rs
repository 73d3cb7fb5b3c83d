//! Error taxonomy shared by the store, the schema loader and every calculator.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Schema or coefficient file missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A computed value does not match the scalar type its schema declares
    #[error("Type mismatch for '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// A required upstream document is absent for one unit of work
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// External match-data service timed out or is unreachable
    #[error("External service unavailable: {0}")]
    ExternalUnavailable(String),

    /// Store contents contradict an expectation (e.g. duplicate natural keys)
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// A computed document failed the output collection's validation
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Fatal errors abort the whole cycle; everything else degrades to a skipped unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::TypeMismatch { .. })
    }

    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Error::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("x".into()).is_fatal());
        assert!(Error::type_mismatch("auto_speaker", "int", "str").is_fatal());
        assert!(!Error::MissingInput("x".into()).is_fatal());
        assert!(!Error::ExternalUnavailable("x".into()).is_fatal());
        assert!(!Error::InconsistentState("x".into()).is_fatal());
        assert!(!Error::ValidationRejected("x".into()).is_fatal());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = Error::type_mismatch("tele_amp", "int", "bool");
        assert_eq!(
            err.to_string(),
            "Type mismatch for 'tele_amp': expected int, found bool"
        );
    }
}
