//! # ipam-core
//!
//! Allocation engine for hierarchical IP address space.
//!
//! ### Key Submodules:
//! - `address`: pure CIDR arithmetic (block counts, block addresses, overlap tests)
//! - `allocator`: deterministic lowest-address-first block search
//! - `model`: pools, allocations and the persisted dataset
//! - `error`: the error type shared by every layer

pub mod address;
pub mod allocator;
pub mod error;
pub mod model;

pub mod prelude {
    pub use crate::allocator::find_free_block;
    pub use crate::error::*;
    pub use crate::model::*;
}

pub use allocator::find_free_block;
pub use error::{IpamError, ResourceKind, Result};
pub use model::{Allocation, AllocationRequest, Dataset, Pool};
