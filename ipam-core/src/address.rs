//! ## ipam-core::address
//! **Address-space arithmetic over CIDR blocks**
//!
//! Every address is handled as an unsigned big-endian integer of its family's
//! width (32 or 128 bits) stored in a `u128`. All offset arithmetic is checked,
//! so a block index that would carry past the top of the address family is an
//! error instead of a silently wrapped address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use thiserror::Error;

pub const IPV4_BITS: u8 = 32;
pub const IPV6_BITS: u8 = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("CIDR '{cidr}' is not valid: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("prefix length /{prefix} exceeds the {width}-bit address width")]
    PrefixOutOfRange { prefix: u8, width: u8 },

    #[error("requested block /{requested} is larger than pool block /{pool}")]
    BlockLargerThanPool { pool: u8, requested: u8 },

    #[error("block count 2^{delta} does not fit in 128 bits")]
    BlockCountOverflow { delta: u8 },

    #[error("block index {index} of size /{prefix} is outside the {width}-bit address space")]
    OffsetOutOfRange { index: u128, prefix: u8, width: u8 },
}

/// Parse a CIDR string. The prefix length is mandatory; host bits may be set.
pub fn parse_cidr(cidr: &str) -> Result<IpNetwork, AddressError> {
    if !cidr.contains('/') {
        return Err(AddressError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: "missing prefix length".into(),
        });
    }
    cidr.parse::<IpNetwork>()
        .map_err(|e| AddressError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: e.to_string(),
        })
}

/// Address width of the network's family.
#[inline]
pub fn address_width(network: &IpNetwork) -> u8 {
    match network {
        IpNetwork::V4(_) => IPV4_BITS,
        IpNetwork::V6(_) => IPV6_BITS,
    }
}

#[inline]
pub fn to_bits(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Inverse of [`to_bits`] for the family selected by `width`.
pub fn from_bits(value: u128, width: u8) -> Option<IpAddr> {
    match width {
        IPV4_BITS => u32::try_from(value)
            .ok()
            .map(|v| IpAddr::V4(Ipv4Addr::from(v))),
        IPV6_BITS => Some(IpAddr::V6(Ipv6Addr::from(value))),
        _ => None,
    }
}

/// Mask covering the low `host_bits` bits.
#[inline]
fn host_mask(host_bits: u8) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    }
}

/// Number of `/requested` blocks inside a `/pool` block: `2^(requested - pool)`.
pub fn block_count(pool_prefix: u8, requested_prefix: u8) -> Result<u128, AddressError> {
    let delta = block_delta(pool_prefix, requested_prefix)?;
    if delta >= 128 {
        return Err(AddressError::BlockCountOverflow { delta });
    }
    Ok(1u128 << delta)
}

/// Highest valid block index, `2^(requested - pool) - 1`. Always representable.
pub fn last_block_index(pool_prefix: u8, requested_prefix: u8) -> Result<u128, AddressError> {
    let delta = block_delta(pool_prefix, requested_prefix)?;
    Ok(host_mask(delta))
}

fn block_delta(pool_prefix: u8, requested_prefix: u8) -> Result<u8, AddressError> {
    if requested_prefix > IPV6_BITS {
        return Err(AddressError::PrefixOutOfRange {
            prefix: requested_prefix,
            width: IPV6_BITS,
        });
    }
    requested_prefix
        .checked_sub(pool_prefix)
        .ok_or(AddressError::BlockLargerThanPool {
            pool: pool_prefix,
            requested: requested_prefix,
        })
}

/// Address of block `block_index` of size `/requested_prefix` counted from `base`.
///
/// Callers bound `block_index` by [`last_block_index`]; anything that would
/// carry past the top of a `total_bits` wide address is rejected.
pub fn nth_block_address(
    base: IpAddr,
    block_index: u128,
    requested_prefix: u8,
    total_bits: u8,
) -> Result<IpAddr, AddressError> {
    let out_of_range = AddressError::OffsetOutOfRange {
        index: block_index,
        prefix: requested_prefix,
        width: total_bits,
    };
    let host_bits =
        total_bits
            .checked_sub(requested_prefix)
            .ok_or(AddressError::PrefixOutOfRange {
                prefix: requested_prefix,
                width: total_bits,
            })?;

    let offset = if host_bits >= 128 {
        // A single block spans the whole family.
        if block_index != 0 {
            return Err(out_of_range);
        }
        0
    } else {
        block_index
            .checked_mul(1u128 << host_bits)
            .ok_or_else(|| out_of_range.clone())?
    };

    to_bits(base)
        .checked_add(offset)
        .and_then(|value| from_bits(value, total_bits))
        .ok_or(out_of_range)
}

#[inline]
pub fn first_address(network: &IpNetwork) -> IpAddr {
    network.network()
}

/// Last address of the block: network address OR the inverted mask.
pub fn last_address(network: &IpNetwork) -> IpAddr {
    let width = address_width(network);
    let value = to_bits(network.network()) | host_mask(width - network.prefix());
    // Value stays within the family width by construction.
    from_bits(value, width).unwrap_or_else(|| network.network())
}

/// True when the two blocks share at least one address.
///
/// Both blocks are prefix-aligned power-of-two ranges, so any overlap means
/// one of them contains an endpoint of the other.
pub fn overlaps(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.contains(first_address(b))
        || a.contains(last_address(b))
        || b.contains(first_address(a))
        || b.contains(last_address(a))
}

/// True when `inner` lies completely inside `outer`.
pub fn contains_block(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    outer.contains(first_address(inner)) && outer.contains(last_address(inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        parse_cidr(s).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parse_requires_prefix() {
        assert!(parse_cidr("10.0.0.0/8").is_ok());
        assert!(parse_cidr("2001:db8::/32").is_ok());
        assert!(matches!(
            parse_cidr("10.0.0.1"),
            Err(AddressError::InvalidCidr { .. })
        ));
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("not-a-cidr/8").is_err());
    }

    #[test]
    fn block_counts() {
        assert_eq!(block_count(24, 24).unwrap(), 1);
        assert_eq!(block_count(16, 27).unwrap(), 2048);
        assert_eq!(block_count(0, 127).unwrap(), 1u128 << 127);
        assert_eq!(
            block_count(25, 24),
            Err(AddressError::BlockLargerThanPool {
                pool: 25,
                requested: 24
            })
        );
        assert_eq!(
            block_count(0, 128),
            Err(AddressError::BlockCountOverflow { delta: 128 })
        );
    }

    #[test]
    fn last_index_covers_full_family() {
        assert_eq!(last_block_index(0, 128).unwrap(), u128::MAX);
        assert_eq!(last_block_index(0, 32).unwrap(), u32::MAX as u128);
        assert_eq!(last_block_index(24, 24).unwrap(), 0);
    }

    #[test]
    fn nth_block_ipv4() {
        let base = ip("10.0.0.0");
        assert_eq!(nth_block_address(base, 0, 27, 32).unwrap(), ip("10.0.0.0"));
        assert_eq!(nth_block_address(base, 1, 27, 32).unwrap(), ip("10.0.0.32"));
        assert_eq!(nth_block_address(base, 8, 27, 32).unwrap(), ip("10.0.1.0"));
    }

    #[test]
    fn nth_block_carries_across_bytes() {
        let base = ip("2001:db8::");
        assert_eq!(
            nth_block_address(base, 1, 64, 128).unwrap(),
            ip("2001:db8:0:1::")
        );
        assert_eq!(
            nth_block_address(base, 0x1_0000, 64, 128).unwrap(),
            ip("2001:db8:1::")
        );
        assert_eq!(
            nth_block_address(ip("::ff"), 1, 128, 128).unwrap(),
            ip("::100")
        );
    }

    #[test]
    fn nth_block_extreme_deltas() {
        assert_eq!(
            nth_block_address(ip("::"), u128::MAX, 128, 128).unwrap(),
            ip("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")
        );
        assert_eq!(nth_block_address(ip("::"), 0, 0, 128).unwrap(), ip("::"));
        assert!(nth_block_address(ip("::"), 1, 0, 128).is_err());
        assert!(nth_block_address(ip("255.255.255.255"), 1, 32, 32).is_err());
        assert!(nth_block_address(ip("::1"), u128::MAX, 128, 128).is_err());
    }

    #[test]
    fn last_addresses() {
        assert_eq!(last_address(&net("10.0.0.0/24")), ip("10.0.0.255"));
        assert_eq!(last_address(&net("10.0.0.7/32")), ip("10.0.0.7"));
        assert_eq!(last_address(&net("0.0.0.0/0")), ip("255.255.255.255"));
        assert_eq!(
            last_address(&net("2001:db8::/32")),
            ip("2001:db8:ffff:ffff:ffff:ffff:ffff:ffff")
        );
        assert_eq!(
            last_address(&net("::/0")),
            ip("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")
        );
    }

    #[test]
    fn overlap_detection() {
        assert!(overlaps(&net("10.0.0.0/24"), &net("10.0.0.128/25")));
        assert!(overlaps(&net("10.0.0.128/25"), &net("10.0.0.0/16")));
        assert!(overlaps(&net("10.0.0.0/24"), &net("10.0.0.0/24")));
        assert!(!overlaps(&net("10.0.0.0/25"), &net("10.0.0.128/25")));
        assert!(!overlaps(&net("10.0.0.0/24"), &net("::/0")));
    }

    #[test]
    fn containment() {
        assert!(contains_block(&net("10.0.0.0/16"), &net("10.0.3.0/24")));
        assert!(!contains_block(&net("10.0.0.0/24"), &net("10.0.0.0/16")));
    }
}
