//! # ipam-engine
//!
//! Adapter between provisioning tooling and the allocation engine: pool and
//! allocation lifecycle, import identifiers and the policies that span more
//! than one store call.

pub mod import;
pub mod ipam;

pub use import::{parse_allocation_import, parse_pool_import, ImportError};
pub use ipam::Ipam;

pub use ipam_core::{Allocation, IpamError, Pool, ResourceKind, Result};
