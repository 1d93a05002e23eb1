//! Shared data model: pools, allocations and the persisted dataset.

use std::collections::BTreeMap;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::address::{self, IPV6_BITS};
use crate::error::{IpamError, Result};

/// A named, ordered set of CIDR ranges. Order decides search order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub cidrs: Vec<String>,
}

impl Pool {
    pub fn new<I, S>(name: impl Into<String>, cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            cidrs: cidrs.into_iter().map(Into::into).collect(),
        }
    }

    /// Checks the name and the syntax of every CIDR.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(IpamError::Validation("pool name must not be empty".into()));
        }
        self.networks().map(|_| ())
    }

    /// Parsed ranges, in list order.
    pub fn networks(&self) -> Result<Vec<IpNetwork>> {
        self.cidrs
            .iter()
            .map(|cidr| address::parse_cidr(cidr).map_err(IpamError::from))
            .collect()
    }
}

/// A sub-block carved from a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub pool_name: String,
    pub allocated_cidr: String,
    pub prefix_length: u8,
}

impl Allocation {
    pub fn network(&self) -> Result<IpNetwork> {
        address::parse_cidr(&self.allocated_cidr).map_err(IpamError::from)
    }

    /// Syntax checks: non-empty keys, valid CIDR, prefix length matching the mask.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(IpamError::Validation("allocation id must not be empty".into()));
        }
        if self.pool_name.trim().is_empty() {
            return Err(IpamError::Validation("pool name must not be empty".into()));
        }
        validate_prefix_length(self.prefix_length)?;
        let network = self.network()?;
        if network.prefix() != self.prefix_length {
            return Err(IpamError::Validation(format!(
                "prefix length {} does not match allocated CIDR {}",
                self.prefix_length, self.allocated_cidr
            )));
        }
        Ok(())
    }
}

/// Input of the atomic allocate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub id: String,
    pub pool_name: String,
    pub prefix_length: u8,
}

impl AllocationRequest {
    pub fn new(id: impl Into<String>, pool_name: impl Into<String>, prefix_length: u8) -> Self {
        Self {
            id: id.into(),
            pool_name: pool_name.into(),
            prefix_length,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(IpamError::Validation("allocation id must not be empty".into()));
        }
        if self.pool_name.trim().is_empty() {
            return Err(IpamError::Validation("pool name must not be empty".into()));
        }
        validate_prefix_length(self.prefix_length)
    }

    /// Whether `allocation` is the result this request would produce.
    pub fn matches(&self, allocation: &Allocation) -> bool {
        allocation.id == self.id
            && allocation.pool_name == self.pool_name
            && allocation.prefix_length == self.prefix_length
    }
}

pub fn validate_prefix_length(prefix_length: u8) -> Result<()> {
    if prefix_length > IPV6_BITS {
        return Err(IpamError::Validation(format!(
            "prefix length must be between 0 and 128, got {}",
            prefix_length
        )));
    }
    Ok(())
}

/// Everything a store persists, serialized as one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub pools: BTreeMap<String, Pool>,
    #[serde(default)]
    pub allocations: BTreeMap<String, Allocation>,
}

impl Dataset {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Indented JSON, the durable representation shared by every backend.
    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn allocations_in<'a>(&'a self, pool_name: &'a str) -> impl Iterator<Item = &'a Allocation> {
        self.allocations
            .values()
            .filter(move |allocation| allocation.pool_name == pool_name)
    }
}
