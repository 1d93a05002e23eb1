//! # IPAM Configuration System
//!
//! Layered configuration for the address management engine.
//!
//! ## Features
//! - **Unified Configuration**: one record selects and parameterizes the storage backend
//! - **Validation**: runtime validation of every loaded section
//! - **Environment Awareness**: `IPAM_*` variables override files

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod storage;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use storage::{
    AzureBlobConfig, BackendSpec, S3Config, S3Credentials, S3Settings, StorageConfig,
    DEFAULT_OBJECT_NAME,
};
pub use telemetry::TelemetryConfig;

/// Environment variable prefix for overrides (`IPAM_STORAGE__BACKEND=aws_s3`).
pub const ENV_PREFIX: &str = "IPAM_";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct IpamConfig {
    /// Persistent store backend selection.
    #[validate(nested)]
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging parameters.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl IpamConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/ipam.yaml` - base settings, skipped when missing.
    /// 3. `config/<IPAM_ENV>.yaml` - environment‑specific overrides.
    /// 4. `IPAM_*` environment variables (`__` separates nested keys).
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(IpamConfig::default()));

        if Path::new("config/ipam.yaml").exists() {
            figment = figment.merge(Yaml::file("config/ipam.yaml"));
        }

        if let Ok(env) = std::env::var("IPAM_ENV") {
            let env_file = format!("config/{}.yaml", env);
            if Path::new(&env_file).exists() {
                figment = figment.merge(Yaml::file(env_file));
            }
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific YAML or JSON file, then apply `IPAM_*` overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(IpamConfig::default()));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Yaml::file(path)),
        };

        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
