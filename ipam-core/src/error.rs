use std::fmt;

use ipam_config::ConfigError;
use thiserror::Error;

use crate::address::AddressError;

/// Boxed transport or serialization failure carried by [`IpamError::Backend`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, IpamError>;

/// The two keyed resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Pool,
    Allocation,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pool => f.write_str("pool"),
            ResourceKind::Allocation => f.write_str("allocation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IpamError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("no available CIDR blocks of size /{prefix_length} in pool {pool}")]
    Exhausted { pool: String, prefix_length: u8 },

    #[error("pool {pool} has {allocations} active allocations; delete them before deleting the pool")]
    PoolInUse { pool: String, allocations: usize },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("store is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl IpamError {
    pub fn not_found(kind: ResourceKind, key: impl Into<String>) -> Self {
        IpamError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn backend(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        IpamError::Backend {
            context: context.into(),
            source: source.into(),
        }
    }

    /// True for the "absent pool/allocation" sentinel only.
    pub fn is_not_found(&self) -> bool {
        matches!(self, IpamError::NotFound { .. })
    }
}

impl From<AddressError> for IpamError {
    fn from(err: AddressError) -> Self {
        IpamError::Validation(err.to_string())
    }
}
