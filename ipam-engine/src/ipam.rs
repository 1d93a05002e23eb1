//! ## ipam-engine::ipam
//! **Pool and allocation lifecycle on top of a persistent store**
//!
//! The store serializes individual operations and makes `allocate` atomic.
//! Checks that span several store calls (pool deletion against live
//! allocations, range updates against existing blocks) additionally run
//! under the adapter's pool guard, which allocation creation also takes.

use ipam_config::IpamConfig;
use ipam_core::address::{self, IPV6_BITS};
use ipam_core::{Allocation, AllocationRequest, IpamError, Pool, Result};
use ipam_store::{open_store, IpamStore};
use ipam_telemetry::{EventLogger, MetricsRecorder};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::import::{parse_allocation_import, parse_pool_import};

pub struct Ipam {
    store: Box<dyn IpamStore>,
    metrics: MetricsRecorder,
    pool_guard: Mutex<()>,
}

impl Ipam {
    pub fn new(store: Box<dyn IpamStore>, metrics: MetricsRecorder) -> Self {
        Self {
            store,
            metrics,
            pool_guard: Mutex::new(()),
        }
    }

    /// Open the configured backend and a fresh metrics registry.
    pub fn from_config(config: &IpamConfig) -> Result<Self> {
        let store = open_store(&config.storage)?;
        let metrics = MetricsRecorder::new()
            .map_err(|e| IpamError::backend("failed to register metrics", e))?;
        Ok(Self::new(store, metrics))
    }

    pub fn store(&self) -> &dyn IpamStore {
        self.store.as_ref()
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    #[instrument(level = "debug", skip(self, cidrs))]
    pub fn create_pool<S: AsRef<str>>(&self, name: &str, cidrs: &[S]) -> Result<Pool> {
        let pool = build_pool(name, cidrs)?;
        let _guard = self.pool_guard.lock();

        match self.store.get_pool(&pool.name) {
            Ok(existing) if existing.cidrs == pool.cidrs => {
                debug!(pool = %pool.name, "Pool already present");
                return Ok(existing);
            }
            Ok(existing) => {
                return Err(IpamError::Conflict(format!(
                    "pool {} already exists with ranges [{}]",
                    existing.name,
                    existing.cidrs.join(", ")
                )))
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        self.save_pool(&pool)?;
        EventLogger::log_event("pool", "created", &pool.name, &pool.cidrs.join(","));
        Ok(pool)
    }

    /// `Ok(None)` when the pool no longer exists.
    pub fn read_pool(&self, name: &str) -> Result<Option<Pool>> {
        absent_as_none(self.store.get_pool(name.trim()))
    }

    pub fn list_pools(&self) -> Result<Vec<Pool>> {
        self.store.list_pools()
    }

    /// Replace the ranges of an existing pool. Every allocation of the pool
    /// must still lie inside one of the new ranges.
    #[instrument(level = "debug", skip(self, cidrs))]
    pub fn update_pool<S: AsRef<str>>(&self, name: &str, cidrs: &[S]) -> Result<Pool> {
        let pool = build_pool(name, cidrs)?;
        let _guard = self.pool_guard.lock();

        self.store.get_pool(&pool.name)?;
        self.ensure_allocations_covered(&pool)?;
        self.save_pool(&pool)?;
        EventLogger::log_event("pool", "updated", &pool.name, &pool.cidrs.join(","));
        Ok(pool)
    }

    /// Rejected with [`IpamError::PoolInUse`] while allocations reference the pool.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_pool(&self, name: &str) -> Result<()> {
        let name = name.trim();
        let _guard = self.pool_guard.lock();

        let allocations = self.store.list_allocations_by_pool(name)?;
        if !allocations.is_empty() {
            return Err(IpamError::PoolInUse {
                pool: name.to_string(),
                allocations: allocations.len(),
            });
        }

        {
            let _timer = self.metrics.persist_latency.start_timer();
            self.store.delete_pool(name)?;
        }
        self.metrics.pools_deleted.inc();
        EventLogger::log_event("pool", "deleted", name, "");
        Ok(())
    }

    /// Adopt a pool described as `name:cidr1,cidr2`. An existing pool of the
    /// same name is overwritten as long as its allocations stay covered.
    #[instrument(level = "debug", skip(self))]
    pub fn import_pool(&self, import_id: &str) -> Result<Pool> {
        let pool = parse_pool_import(import_id)?;
        let _guard = self.pool_guard.lock();

        match self.store.get_pool(&pool.name) {
            Ok(_) => self.ensure_allocations_covered(&pool)?,
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        self.save_pool(&pool)?;
        EventLogger::log_event("pool", "imported", &pool.name, &pool.cidrs.join(","));
        Ok(pool)
    }

    /// Reserve the lowest free block of `prefix_length` in `pool_name`.
    /// Surrounding whitespace in keys is ignored, as for every operation here.
    ///
    /// Repeating a request for an existing id with the same pool and prefix
    /// length returns the existing allocation.
    #[instrument(level = "debug", skip(self))]
    pub fn create_allocation(
        &self,
        id: &str,
        pool_name: &str,
        prefix_length: i64,
    ) -> Result<Allocation> {
        let (id, pool_name) = (id.trim(), pool_name.trim());
        let prefix_length = checked_prefix_length(prefix_length)?;
        let request = AllocationRequest::new(id, pool_name, prefix_length);
        request.validate()?;

        let _guard = self.pool_guard.lock();
        let existed = match self.store.get_allocation(id) {
            Ok(_) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };

        let result = {
            let _timer = self.metrics.persist_latency.start_timer();
            self.store.allocate(&request)
        };

        match result {
            Ok(allocation) => {
                if !existed {
                    self.metrics.allocations_created.inc();
                    EventLogger::log_event(
                        "allocation",
                        "created",
                        &allocation.id,
                        &allocation.allocated_cidr,
                    );
                }
                Ok(allocation)
            }
            Err(err @ IpamError::Exhausted { .. }) => {
                self.metrics.allocation_exhaustions.inc();
                warn!(id, pool = pool_name, prefix_length, "Pool exhausted");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// `Ok(None)` when the allocation no longer exists.
    pub fn read_allocation(&self, id: &str) -> Result<Option<Allocation>> {
        absent_as_none(self.store.get_allocation(id.trim()))
    }

    /// All allocations, or only those of `pool_name`.
    pub fn list_allocations(&self, pool_name: Option<&str>) -> Result<Vec<Allocation>> {
        match pool_name {
            Some(pool) => self.store.list_allocations_by_pool(pool.trim()),
            None => self.store.list_allocations(),
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub fn delete_allocation(&self, id: &str) -> Result<()> {
        let id = id.trim();
        {
            let _timer = self.metrics.persist_latency.start_timer();
            self.store.delete_allocation(id)?;
        }
        self.metrics.allocations_deleted.inc();
        EventLogger::log_event("allocation", "deleted", id, "");
        Ok(())
    }

    /// Adopt an allocation by id. It must already be recorded.
    pub fn import_allocation(&self, import_id: &str) -> Result<Allocation> {
        let id = parse_allocation_import(import_id)?;
        let allocation = self.store.get_allocation(id)?;
        EventLogger::log_event(
            "allocation",
            "imported",
            &allocation.id,
            &allocation.allocated_cidr,
        );
        Ok(allocation)
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    fn save_pool(&self, pool: &Pool) -> Result<()> {
        let _timer = self.metrics.persist_latency.start_timer();
        self.store.save_pool(pool)?;
        self.metrics.pools_saved.inc();
        Ok(())
    }

    fn ensure_allocations_covered(&self, pool: &Pool) -> Result<()> {
        let ranges = pool.networks()?;
        for allocation in self.store.list_allocations_by_pool(&pool.name)? {
            let block = match allocation.network() {
                Ok(block) => block,
                Err(err) => {
                    warn!(id = %allocation.id, error = %err, "Skipping unparsable allocation");
                    continue;
                }
            };
            if !ranges
                .iter()
                .any(|range| address::contains_block(range, &block))
            {
                return Err(IpamError::Conflict(format!(
                    "allocation {} ({}) would fall outside the ranges of pool {}",
                    allocation.id, allocation.allocated_cidr, pool.name
                )));
            }
        }
        Ok(())
    }
}

fn build_pool<S: AsRef<str>>(name: &str, cidrs: &[S]) -> Result<Pool> {
    let pool = Pool::new(name.trim(), cidrs.iter().map(|c| c.as_ref().trim()));
    pool.validate()?;
    Ok(pool)
}

fn checked_prefix_length(prefix_length: i64) -> Result<u8> {
    u8::try_from(prefix_length)
        .ok()
        .filter(|p| *p <= IPV6_BITS)
        .ok_or_else(|| {
            IpamError::Validation(format!(
                "prefix length must be between 0 and 128, got {}",
                prefix_length
            ))
        })
}

fn absent_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_length_bounds() {
        assert_eq!(checked_prefix_length(0).unwrap(), 0);
        assert_eq!(checked_prefix_length(128).unwrap(), 128);
        assert!(matches!(
            checked_prefix_length(-1),
            Err(IpamError::Validation(_))
        ));
        assert!(matches!(
            checked_prefix_length(129),
            Err(IpamError::Validation(_))
        ));
        assert!(checked_prefix_length(1_000).is_err());
    }

    #[test]
    fn pool_inputs_are_trimmed() {
        let pool = build_pool(" lab ", &[" 10.0.0.0/16", "10.1.0.0/16 "]).unwrap();
        assert_eq!(pool.name, "lab");
        assert_eq!(pool.cidrs, vec!["10.0.0.0/16", "10.1.0.0/16"]);
        assert!(build_pool("lab", &["10.0.0.0"]).is_err());
        assert!(build_pool("  ", &["10.0.0.0/8"]).is_err());
    }
}
