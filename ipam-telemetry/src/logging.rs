//! ## ipam-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! `RUST_LOG` wins over the configured filter when it is set.

use ipam_config::TelemetryConfig;
use tracing::info_span;
use tracing_subscriber::{fmt, EnvFilter};

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Install the global fmt subscriber.
    ///
    /// Fails when a global subscriber is already installed.
    pub fn try_init(config: &TelemetryConfig) -> Result<(), InitError> {
        fmt()
            .with_env_filter(Self::filter(config))
            .with_thread_names(config.thread_names)
            .with_writer(std::io::stderr)
            .try_init()
    }

    /// Like [`EventLogger::try_init`], ignoring an already installed subscriber.
    pub fn init(config: &TelemetryConfig) {
        let _ = Self::try_init(config);
    }

    fn filter(config: &TelemetryConfig) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Record a resource lifecycle event inside an `ipam_event` span.
    #[inline]
    pub fn log_event(resource: &str, action: &str, key: &str, detail: &str) {
        let span = info_span!("ipam_event", resource, action);
        let _entered = span.enter();
        tracing::info!(key, detail, "IPAM {} {}", resource, action);
    }
}
