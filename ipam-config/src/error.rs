//! Error types for configuration loading and validation

use std::path::PathBuf;
use thiserror::Error;
use validator::ValidationErrors;

/// Unified configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found error.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Configuration validation error.
    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Validation(#[source] ValidationErrors),

    /// Figment parsing error.
    #[error("Configuration parsing error: {0}")]
    Parsing(#[from] figment::Error),

    /// The storage backend tag does not name a known backend.
    #[error("unknown storage type '{0}' (expected one of: file, azure_blob, aws_s3)")]
    UnknownBackend(String),

    /// A field required by the selected backend is missing.
    #[error("{backend} storage requires '{field}'")]
    MissingField {
        backend: &'static str,
        field: &'static str,
    },
}

fn format_validation_errors(errors: &ValidationErrors) -> String {
    use std::fmt::Write;

    let mut output = String::new();
    for (field, errors) in errors.field_errors() {
        let _ = writeln!(output, "Field '{}':", field);
        for error in errors {
            let message = match &error.message {
                Some(msg) => msg.to_string(),
                None => error.code.to_string(),
            };
            let _ = writeln!(output, "  - {}", message);
        }
    }
    output
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_name_the_offending_setting() {
        let err = ConfigError::MissingField {
            backend: "aws_s3",
            field: "s3.bucket",
        };
        assert_eq!(err.to_string(), "aws_s3 storage requires 's3.bucket'");

        let err = ConfigError::UnknownBackend("consul".into());
        assert!(err.to_string().starts_with("unknown storage type 'consul'"));
    }

    #[test]
    fn figment_failures_convert() {
        let err: ConfigError = figment::Error::from("bad value".to_string()).into();
        assert!(matches!(err, ConfigError::Parsing(_)));
    }
}
