//! ## ipam-core::allocator
//! **Lowest-address-first block search**
//!
//! Ranges are visited in pool list order and blocks in increasing index
//! order, so identical inputs always produce the identical block. When a
//! candidate collides with an existing allocation the scan resumes at the
//! first block past that allocation: every block in between would collide
//! with it too, so the result equals the block-by-block scan.

use ipnetwork::IpNetwork;
use tracing::{debug, warn};

use crate::address::{
    self, address_width, contains_block, last_address, last_block_index, nth_block_address,
    overlaps, to_bits,
};
use crate::error::{IpamError, Result};
use crate::model::{validate_prefix_length, Allocation, Pool};

/// Find the first free `/requested_prefix` block in `pool`.
///
/// `existing` may contain allocations of other pools; only those whose
/// `pool_name` equals the pool's name are considered.
pub fn find_free_block<'a, I>(pool: &Pool, existing: I, requested_prefix: u8) -> Result<IpNetwork>
where
    I: IntoIterator<Item = &'a Allocation>,
{
    validate_prefix_length(requested_prefix)?;

    let taken: Vec<IpNetwork> = existing
        .into_iter()
        .filter(|allocation| allocation.pool_name == pool.name)
        .filter_map(|allocation| match allocation.network() {
            Ok(network) => Some(network),
            Err(err) => {
                warn!(
                    allocation = %allocation.id,
                    error = %err,
                    "Ignoring allocation with unparsable CIDR"
                );
                None
            }
        })
        .collect();

    for cidr in &pool.cidrs {
        let range = match address::parse_cidr(cidr) {
            Ok(range) => range,
            Err(err) => {
                warn!(pool = %pool.name, error = %err, "Skipping unparsable pool range");
                continue;
            }
        };

        if let Some(block) = scan_range(&range, requested_prefix, &taken)? {
            debug!(pool = %pool.name, range = %range, block = %block, "Found free block");
            return Ok(block);
        }
    }

    Err(IpamError::Exhausted {
        pool: pool.name.clone(),
        prefix_length: requested_prefix,
    })
}

/// First free block of one range, or `None` when the range cannot serve the request.
fn scan_range(range: &IpNetwork, requested_prefix: u8, taken: &[IpNetwork]) -> Result<Option<IpNetwork>> {
    let width = address_width(range);
    if requested_prefix < range.prefix() || requested_prefix > width {
        return Ok(None);
    }

    let base = range.network();
    let base_bits = to_bits(base);
    let host_bits = width - requested_prefix;
    let last_index = last_block_index(range.prefix(), requested_prefix)?;

    let mut index: u128 = 0;
    loop {
        let first = nth_block_address(base, index, requested_prefix, width)?;
        let candidate = IpNetwork::new(first, requested_prefix)
            .map_err(|e| IpamError::Validation(e.to_string()))?;

        let mut next = index.checked_add(1);
        if contains_block(range, &candidate) {
            match taken.iter().find(|block| overlaps(&candidate, block)) {
                None => return Ok(Some(candidate)),
                Some(block) => {
                    next = index_after(base_bits, to_bits(last_address(block)), host_bits);
                }
            }
        }

        match next {
            Some(n) if n <= last_index => index = n,
            _ => return Ok(None),
        }
    }
}

/// Index of the first block starting after `taken_last`.
fn index_after(base_bits: u128, taken_last: u128, host_bits: u8) -> Option<u128> {
    if host_bits >= 128 {
        return None;
    }
    let offset = taken_last.checked_sub(base_bits)?;
    (offset >> host_bits).checked_add(1)
}
