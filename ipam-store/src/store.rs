//! ## ipam-store::store
//! **The persistent store contract and its single implementation**
//!
//! One `RwLock` guards the dataset of a store instance: reads share it, every
//! mutation holds it exclusively from the read of current state until the
//! medium has accepted the rewritten document. Mutations are applied to a
//! staged copy and only committed once the write succeeded.

use ipam_core::{
    find_free_block, Allocation, AllocationRequest, Dataset, IpamError, Pool, ResourceKind,
    Result,
};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::medium::Medium;

/// Capability set shared by every backend.
pub trait IpamStore: Send + Sync {
    fn get_pool(&self, name: &str) -> Result<Pool>;
    fn list_pools(&self) -> Result<Vec<Pool>>;
    /// Upsert by name.
    fn save_pool(&self, pool: &Pool) -> Result<()>;
    fn delete_pool(&self, name: &str) -> Result<()>;

    fn get_allocation(&self, id: &str) -> Result<Allocation>;
    fn list_allocations(&self) -> Result<Vec<Allocation>>;
    fn list_allocations_by_pool(&self, pool_name: &str) -> Result<Vec<Allocation>>;
    /// Upsert by id.
    fn save_allocation(&self, allocation: &Allocation) -> Result<()>;
    fn delete_allocation(&self, id: &str) -> Result<()>;

    /// Read the pool and its allocations, pick a block and persist the new
    /// allocation under one exclusive lock acquisition.
    ///
    /// An existing allocation with the same id, pool and prefix length is
    /// returned unchanged; one with different parameters is a conflict.
    fn allocate(&self, request: &AllocationRequest) -> Result<Allocation>;

    /// Location of the backing document.
    fn describe(&self) -> String;

    fn close(&self) -> Result<()>;
}

struct State {
    dataset: Dataset,
    closed: bool,
}

/// Dataset cache over a [`Medium`], implementing [`IpamStore`].
pub struct PersistentStore<M: Medium> {
    medium: M,
    state: RwLock<State>,
}

impl<M: Medium> PersistentStore<M> {
    /// Load the dataset once. An absent document yields an empty dataset;
    /// every other load failure is returned.
    pub fn open(medium: M) -> Result<Self> {
        let dataset = match medium.fetch()? {
            Some(bytes) => Dataset::from_json(&bytes).map_err(|e| {
                IpamError::backend(
                    format!("failed to decode dataset from {}", medium.describe()),
                    e,
                )
            })?,
            None => {
                info!(backend = %medium.describe(), "No existing dataset, starting empty");
                Dataset::default()
            }
        };

        info!(
            backend = %medium.describe(),
            pools = dataset.pools.len(),
            allocations = dataset.allocations.len(),
            "Store ready"
        );

        Ok(Self {
            medium,
            state: RwLock::new(State {
                dataset,
                closed: false,
            }),
        })
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    fn read<T>(&self, f: impl FnOnce(&Dataset) -> Result<T>) -> Result<T> {
        let state = self.state.read();
        if state.closed {
            return Err(IpamError::Closed);
        }
        f(&state.dataset)
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Dataset) -> Result<T>) -> Result<T> {
        let mut state = self.state.write();
        if state.closed {
            return Err(IpamError::Closed);
        }
        let mut staged = state.dataset.clone();
        let out = f(&mut staged)?;
        self.persist(&staged)?;
        state.dataset = staged;
        Ok(out)
    }

    fn persist(&self, dataset: &Dataset) -> Result<()> {
        let bytes = dataset
            .to_json_pretty()
            .map_err(|e| IpamError::backend("failed to marshal storage data", e))?;
        self.medium.publish(&bytes)?;
        debug!(backend = %self.medium.describe(), bytes = bytes.len(), "Dataset persisted");
        Ok(())
    }
}

impl<M: Medium> IpamStore for PersistentStore<M> {
    fn get_pool(&self, name: &str) -> Result<Pool> {
        self.read(|dataset| {
            dataset
                .pools
                .get(name)
                .cloned()
                .ok_or_else(|| IpamError::not_found(ResourceKind::Pool, name))
        })
    }

    fn list_pools(&self) -> Result<Vec<Pool>> {
        self.read(|dataset| Ok(dataset.pools.values().cloned().collect()))
    }

    fn save_pool(&self, pool: &Pool) -> Result<()> {
        pool.validate()?;
        self.mutate(|dataset| {
            dataset.pools.insert(pool.name.clone(), pool.clone());
            Ok(())
        })
    }

    fn delete_pool(&self, name: &str) -> Result<()> {
        self.mutate(|dataset| {
            dataset
                .pools
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| IpamError::not_found(ResourceKind::Pool, name))
        })
    }

    fn get_allocation(&self, id: &str) -> Result<Allocation> {
        self.read(|dataset| {
            dataset
                .allocations
                .get(id)
                .cloned()
                .ok_or_else(|| IpamError::not_found(ResourceKind::Allocation, id))
        })
    }

    fn list_allocations(&self) -> Result<Vec<Allocation>> {
        self.read(|dataset| Ok(dataset.allocations.values().cloned().collect()))
    }

    fn list_allocations_by_pool(&self, pool_name: &str) -> Result<Vec<Allocation>> {
        self.read(|dataset| Ok(dataset.allocations_in(pool_name).cloned().collect()))
    }

    fn save_allocation(&self, allocation: &Allocation) -> Result<()> {
        allocation.validate()?;
        self.mutate(|dataset| {
            dataset
                .allocations
                .insert(allocation.id.clone(), allocation.clone());
            Ok(())
        })
    }

    fn delete_allocation(&self, id: &str) -> Result<()> {
        self.mutate(|dataset| {
            dataset
                .allocations
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| IpamError::not_found(ResourceKind::Allocation, id))
        })
    }

    fn allocate(&self, request: &AllocationRequest) -> Result<Allocation> {
        request.validate()?;

        let mut state = self.state.write();
        if state.closed {
            return Err(IpamError::Closed);
        }

        if let Some(existing) = state.dataset.allocations.get(&request.id) {
            if request.matches(existing) {
                debug!(id = %existing.id, cidr = %existing.allocated_cidr, "Allocation already present");
                return Ok(existing.clone());
            }
            return Err(IpamError::Conflict(format!(
                "allocation '{}' already exists as {} in pool {}",
                existing.id, existing.allocated_cidr, existing.pool_name
            )));
        }

        let pool = state
            .dataset
            .pools
            .get(&request.pool_name)
            .ok_or_else(|| IpamError::not_found(ResourceKind::Pool, &request.pool_name))?;
        let block = find_free_block(pool, state.dataset.allocations.values(), request.prefix_length)?;

        let allocation = Allocation {
            id: request.id.clone(),
            pool_name: request.pool_name.clone(),
            allocated_cidr: block.to_string(),
            prefix_length: request.prefix_length,
        };

        let mut staged = state.dataset.clone();
        staged
            .allocations
            .insert(allocation.id.clone(), allocation.clone());
        self.persist(&staged)?;
        state.dataset = staged;

        Ok(allocation)
    }

    fn describe(&self) -> String {
        self.medium.describe()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        info!(backend = %self.medium.describe(), "Store closed");
        self.medium.close()
    }
}
