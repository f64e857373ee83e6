//! Error types for the schema registry

use thiserror::Error;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors that can occur in schema registry operations
///
/// Lookups that can simply miss (by slug, by id) return `Option` instead;
/// errors here are reserved for storage problems.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err: SchemaError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "fields dir missing").into();
        assert!(err.to_string().contains("fields dir missing"));
    }
}
