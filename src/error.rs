// ⚠️ Error taxonomy for the categorization core
//
// "No category found" is never an error: it is `None`.
// These types cover the cases that callers may need to tell apart.

use thiserror::Error;

/// Failures surfaced by the categorization core
#[derive(Debug, Error)]
pub enum CategorizerError {
    /// Malformed caller input (bad rule regex, no text at all, bad match type)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Training refused to build a model
    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    /// Model artifacts could not be written or read
    #[error("model persistence failed: {0}")]
    Persistence(String),

    /// The storage collaborator failed
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl CategorizerError {
    pub fn kind(&self) -> &'static str {
        match self {
            CategorizerError::InvalidInput(_) => "invalid_input",
            CategorizerError::InsufficientData(_) => "insufficient_data",
            CategorizerError::Persistence(_) => "persistence",
            CategorizerError::Storage(_) => "storage",
        }
    }
}

impl From<std::io::Error> for CategorizerError {
    fn from(err: std::io::Error) -> Self {
        CategorizerError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CategorizerError {
    fn from(err: serde_json::Error) -> Self {
        CategorizerError::Persistence(format!("JSON error: {}", err))
    }
}

/// Violations of the category tree invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("category not found: {0}")]
    NotFound(i64),

    #[error("category {0} cannot be its own parent")]
    SelfParent(i64),

    #[error("moving category {id} under {parent} would create a cycle")]
    Cycle { id: i64, parent: i64 },

    #[error("category with this name already exists: {0}")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, CategorizerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_kind() {
        let err = CategorizerError::InsufficientData("need at least 10 samples".to_string());
        assert_eq!(err.kind(), "insufficient_data");
        assert_eq!(
            err.to_string(),
            "insufficient training data: need at least 10 samples"
        );
    }

    #[test]
    fn test_io_error_becomes_persistence() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: CategorizerError = io_err.into();
        assert_eq!(err.kind(), "persistence");
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_storage_error_from_anyhow() {
        let err: CategorizerError = anyhow::anyhow!("database is locked").into();
        assert_eq!(err.kind(), "storage");
    }

    #[test]
    fn test_category_error_messages() {
        assert_eq!(
            CategoryError::Cycle { id: 1, parent: 3 }.to_string(),
            "moving category 1 under 3 would create a cycle"
        );
        assert_eq!(
            CategoryError::SelfParent(7).to_string(),
            "category 7 cannot be its own parent"
        );
    }
}
