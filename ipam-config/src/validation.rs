//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across the storage and telemetry sections.

use validator::ValidationError;

/// Validate an object key or blob name: non-empty, relative, at most 1024 bytes.
pub fn validate_object_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 1024 || name.starts_with('/') {
        return Err(ValidationError::new("invalid_object_name"));
    }
    Ok(())
}

/// Validate a region identifier such as `us-east-1` (S3-compatible services accept custom names).
pub fn validate_region(region: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^[a-z0-9][a-z0-9-]*$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(region) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_region"))
    }
}

/// Validate that a log filter directive is non-empty.
pub fn validate_log_filter(filter: &str) -> Result<(), ValidationError> {
    if filter.trim().is_empty() {
        Err(ValidationError::new("empty_log_filter"))
    } else {
        Ok(())
    }
}
