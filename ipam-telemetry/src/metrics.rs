//! ## ipam-telemetry::metrics
//! **Prometheus counters and histograms for allocation activity**

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub allocations_created: IntCounter,
    pub allocation_exhaustions: IntCounter,
    pub allocations_deleted: IntCounter,
    pub pools_saved: IntCounter,
    pub pools_deleted: IntCounter,
    pub persist_latency: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let allocations_created =
            IntCounter::new("ipam_allocations_total", "Allocations handed out")?;
        let allocation_exhaustions = IntCounter::new(
            "ipam_exhaustion_total",
            "Allocation requests that found no free block",
        )?;
        let allocations_deleted =
            IntCounter::new("ipam_allocations_deleted_total", "Allocations released")?;
        let pools_saved = IntCounter::new("ipam_pools_saved_total", "Pool creates and updates")?;
        let pools_deleted = IntCounter::new("ipam_pools_deleted_total", "Pools deleted")?;

        let persist_latency = Histogram::with_opts(
            HistogramOpts::new(
                "ipam_persist_latency_seconds",
                "Duration of store mutations including the backend write",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.25, 1.0, 5.0]),
        )?;

        registry.register(Box::new(allocations_created.clone()))?;
        registry.register(Box::new(allocation_exhaustions.clone()))?;
        registry.register(Box::new(allocations_deleted.clone()))?;
        registry.register(Box::new(pools_saved.clone()))?;
        registry.register(Box::new(pools_deleted.clone()))?;
        registry.register(Box::new(persist_latency.clone()))?;

        Ok(Self {
            registry,
            allocations_created,
            allocation_exhaustions,
            allocations_deleted,
            pools_saved,
            pools_deleted,
            persist_latency,
        })
    }

    /// Text exposition of every registered metric.
    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = MetricsRecorder::new().unwrap();
        metrics.allocations_created.inc();
        metrics.allocations_created.inc();
        metrics.allocation_exhaustions.inc();
        metrics.persist_latency.observe(0.002);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("ipam_allocations_total 2"));
        assert!(text.contains("ipam_exhaustion_total 1"));
        assert!(text.contains("ipam_persist_latency_seconds_count 1"));
    }

    #[test]
    fn recorders_have_independent_registries() {
        let a = MetricsRecorder::new().unwrap();
        let b = MetricsRecorder::new().unwrap();
        a.pools_deleted.inc();
        assert_eq!(b.pools_deleted.get(), 0);
    }
}
