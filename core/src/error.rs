use thiserror::Error;

/// ukpack error types
#[derive(Error, Debug)]
pub enum PackError {
    /// A manifest, config, layer or image is absent at its expected location
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// Malformed image reference, digest or component name
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// A manifest source could not be fetched
    #[error("Source unreachable: {source_name} - {message}")]
    SourceUnreachable {
        source_name: String,
        message: String,
    },

    /// A query that must resolve to one package matched several
    #[error("Ambiguous match: '{query}' matched {count} packages")]
    AmbiguousMatch { query: String, count: usize },

    /// Persisting an updated index failed
    #[error("Partial write failure: {0}")]
    PartialWriteFailure(String),

    /// Content does not hash to the digest it was stored or requested under
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// External build backend failure
    #[error("Build error: {0}")]
    Build(String),

    /// Archive read/write failure (tar, cpio)
    #[error("Archive error: {0}")]
    Archive(String),

    /// Operation exists in the interface but has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PackError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        PackError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Whether this error means "the thing is not there" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PackError::NotFound { .. })
    }
}

impl From<serde_json::Error> for PackError {
    fn from(err: serde_json::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PackError {
    fn from(err: serde_yaml::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

/// Result type alias for ukpack operations
pub type Result<T> = std::result::Result<T, PackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let error = PackError::not_found("config", "sha256:abc");
        assert_eq!(error.to_string(), "config not found: sha256:abc");
        assert!(error.is_not_found());
    }

    #[test]
    fn test_invalid_reference_display() {
        let error = PackError::InvalidReference("nginx@bad".to_string());
        assert_eq!(error.to_string(), "Invalid reference: nginx@bad");
        assert!(!error.is_not_found());
    }

    #[test]
    fn test_source_unreachable_display() {
        let error = PackError::SourceUnreachable {
            source_name: "https://example.com/index.yaml".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Source unreachable: https://example.com/index.yaml - connection refused"
        );
    }

    #[test]
    fn test_ambiguous_match_display() {
        let error = PackError::AmbiguousMatch {
            query: "lib/foo".to_string(),
            count: 2,
        };
        assert_eq!(
            error.to_string(),
            "Ambiguous match: 'lib/foo' matched 2 packages"
        );
    }

    #[test]
    fn test_digest_mismatch_display() {
        let error = PackError::DigestMismatch {
            expected: "sha256:aaa".to_string(),
            actual: "sha256:bbb".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Digest mismatch: expected sha256:aaa, got sha256:bbb"
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = PackError::Registry {
            registry: "ghcr.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: PackError = io_error.into();
        assert!(matches!(error, PackError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: PackError = result.unwrap_err().into();
        assert!(matches!(error, PackError::Serialization(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: PackError = result.unwrap_err().into();
        assert!(matches!(error, PackError::Serialization(_)));
    }
}
