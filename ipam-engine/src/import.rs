//! Import identifiers for adopting existing records.

use ipam_core::{address, IpamError, Pool};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("Import ID must be in format: name:cidr1,cidr2,cidr3 (got '{0}')")]
    Format(String),

    #[error("CIDR '{cidr}' is not valid: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("Import ID must not be empty")]
    Empty,
}

impl From<ImportError> for IpamError {
    fn from(err: ImportError) -> Self {
        IpamError::Validation(err.to_string())
    }
}

/// Parse `name:cidr1,cidr2` into a pool. Whitespace around each CIDR is
/// ignored; the CIDR order is kept.
pub fn parse_pool_import(import_id: &str) -> Result<Pool, ImportError> {
    let (name, cidr_list) = import_id
        .split_once(':')
        .ok_or_else(|| ImportError::Format(import_id.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ImportError::Format(import_id.to_string()));
    }

    let cidrs = cidr_list
        .split(',')
        .map(str::trim)
        .map(|cidr| {
            address::parse_cidr(cidr)
                .map(|_| cidr.to_string())
                .map_err(|e| ImportError::InvalidCidr {
                    cidr: cidr.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Pool::new(name, cidrs))
}

/// Allocation imports are keyed by id alone.
pub fn parse_allocation_import(import_id: &str) -> Result<&str, ImportError> {
    match import_id.trim() {
        "" => Err(ImportError::Empty),
        id => Ok(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pool_import() {
        let pool = parse_pool_import("lab:10.0.0.0/16, 2001:db8::/48").unwrap();
        assert_eq!(pool.name, "lab");
        assert_eq!(pool.cidrs, vec!["10.0.0.0/16", "2001:db8::/48"]);
    }

    #[test]
    fn only_the_first_colon_separates_the_name() {
        let pool = parse_pool_import("v6:2001:db8::/32").unwrap();
        assert_eq!(pool.name, "v6");
        assert_eq!(pool.cidrs, vec!["2001:db8::/32"]);
    }

    #[test]
    fn rejects_malformed_pool_imports() {
        assert!(matches!(
            parse_pool_import("lab"),
            Err(ImportError::Format(_))
        ));
        assert!(matches!(
            parse_pool_import(":10.0.0.0/8"),
            Err(ImportError::Format(_))
        ));
        assert!(matches!(
            parse_pool_import("lab:10.0.0.0/8,,10.1.0.0/16"),
            Err(ImportError::InvalidCidr { .. })
        ));
        assert!(matches!(
            parse_pool_import("lab:10.0.0.300/8"),
            Err(ImportError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn allocation_import_ids() {
        assert_eq!(parse_allocation_import(" vm-1 ").unwrap(), "vm-1");
        assert_eq!(parse_allocation_import("  "), Err(ImportError::Empty));
    }
}
