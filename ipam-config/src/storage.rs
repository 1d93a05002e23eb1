//! Storage backend configuration.
//!
//! The record carries a backend tag plus the fields of every backend; only the
//! section named by the tag is read. [`StorageConfig::resolve`] turns the record
//! into a [`BackendSpec`] once, before any data operation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;
use crate::ConfigError;

/// Default name of the persisted document for object/blob backends.
pub const DEFAULT_OBJECT_NAME: &str = "ipam-storage.json";

/// Storage backend configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct StorageConfig {
    /// Backend type: `file` (default), `azure_blob` or `aws_s3`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Path of the dataset file for the `file` backend.
    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,

    /// Azure Blob Storage parameters.
    #[validate(nested)]
    #[serde(default)]
    pub azure: AzureBlobConfig,

    /// AWS S3 (or S3-compatible) parameters.
    #[validate(nested)]
    #[serde(default)]
    pub s3: S3Config,
}

fn default_backend() -> String {
    "file".into()
}

fn default_file_path() -> PathBuf {
    PathBuf::from(DEFAULT_OBJECT_NAME)
}

fn default_object_name() -> String {
    DEFAULT_OBJECT_NAME.into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            file_path: default_file_path(),
            azure: AzureBlobConfig::default(),
            s3: S3Config::default(),
        }
    }
}

/// Azure Blob Storage parameters.
#[derive(Serialize, Deserialize, Validate, Clone)]
pub struct AzureBlobConfig {
    /// Storage account connection string.
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Blob container name.
    #[serde(default)]
    pub container: Option<String>,

    /// Blob holding the dataset.
    #[validate(custom(function = validation::validate_object_name))]
    #[serde(default = "default_object_name")]
    pub blob_name: String,
}

impl Default for AzureBlobConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            container: None,
            blob_name: default_object_name(),
        }
    }
}

impl fmt::Debug for AzureBlobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobConfig")
            .field("connection_string", &redacted(&self.connection_string))
            .field("container", &self.container)
            .field("blob_name", &self.blob_name)
            .finish()
    }
}

/// AWS S3 parameters.
#[derive(Serialize, Deserialize, Validate, Clone)]
pub struct S3Config {
    /// AWS region (e.g. `us-east-1`).
    #[validate(custom(function = validation::validate_region))]
    #[serde(default)]
    pub region: Option<String>,

    /// Bucket name.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Object key of the dataset.
    #[validate(custom(function = validation::validate_object_name))]
    #[serde(default = "default_object_name")]
    pub object_key: String,

    /// Access key id. Falls back to the environment credential chain when unset.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key, required together with `access_key_id`.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Session token for temporary credentials.
    #[serde(default)]
    pub session_token: Option<String>,

    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[validate(url)]
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: None,
            bucket: None,
            object_key: default_object_name(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint: None,
            skip_tls_verify: false,
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("object_key", &self.object_key)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redacted(&self.secret_access_key))
            .field("session_token", &redacted(&self.session_token))
            .field("endpoint", &self.endpoint)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .finish()
    }
}

fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<redacted>")
}

/// Static credentials for S3 request signing.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Fully resolved S3 backend parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub region: String,
    pub bucket: String,
    pub object_key: String,
    pub credentials: Option<S3Credentials>,
    pub endpoint: Option<String>,
    pub skip_tls_verify: bool,
}

/// A backend selection with every required field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSpec {
    File {
        path: PathBuf,
    },
    AzureBlob {
        connection_string: String,
        container: String,
        blob_name: String,
    },
    AwsS3(S3Settings),
}

impl BackendSpec {
    /// Backend tag as written in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendSpec::File { .. } => "file",
            BackendSpec::AzureBlob { .. } => "azure_blob",
            BackendSpec::AwsS3(_) => "aws_s3",
        }
    }
}

fn required(
    value: &Option<String>,
    backend: &'static str,
    field: &'static str,
) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::MissingField { backend, field }),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

impl StorageConfig {
    /// Configuration for a local file backend.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: "file".into(),
            file_path: path.into(),
            ..Self::default()
        }
    }

    /// Resolve the backend tag and check the fields that backend requires.
    pub fn resolve(&self) -> Result<BackendSpec, ConfigError> {
        match self.backend.trim() {
            "" | "file" => Ok(BackendSpec::File {
                path: self.file_path.clone(),
            }),
            "azure_blob" => Ok(BackendSpec::AzureBlob {
                connection_string: required(
                    &self.azure.connection_string,
                    "azure_blob",
                    "azure.connection_string",
                )?,
                container: required(&self.azure.container, "azure_blob", "azure.container")?,
                blob_name: self.azure.blob_name.clone(),
            }),
            "aws_s3" => {
                let region = required(&self.s3.region, "aws_s3", "s3.region")?;
                let bucket = required(&self.s3.bucket, "aws_s3", "s3.bucket")?;
                let credentials = match (
                    non_empty(&self.s3.access_key_id),
                    non_empty(&self.s3.secret_access_key),
                ) {
                    (Some(access_key_id), Some(secret_access_key)) => Some(S3Credentials {
                        access_key_id,
                        secret_access_key,
                        session_token: non_empty(&self.s3.session_token),
                    }),
                    (Some(_), None) => {
                        return Err(ConfigError::MissingField {
                            backend: "aws_s3",
                            field: "s3.secret_access_key",
                        })
                    }
                    (None, Some(_)) => {
                        return Err(ConfigError::MissingField {
                            backend: "aws_s3",
                            field: "s3.access_key_id",
                        })
                    }
                    (None, None) => None,
                };
                Ok(BackendSpec::AwsS3(S3Settings {
                    region,
                    bucket,
                    object_key: self.s3.object_key.clone(),
                    credentials,
                    endpoint: non_empty(&self.s3.endpoint),
                    skip_tls_verify: self.s3.skip_tls_verify,
                }))
            }
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_lives_in_working_directory() {
        assert_eq!(
            StorageConfig::default().resolve().unwrap(),
            BackendSpec::File {
                path: PathBuf::from("ipam-storage.json")
            }
        );
    }

    #[test]
    fn empty_tag_defaults_to_file() {
        let config = StorageConfig {
            backend: String::new(),
            ..StorageConfig::file("state.json")
        };
        assert_eq!(
            config.resolve().unwrap(),
            BackendSpec::File {
                path: PathBuf::from("state.json")
            }
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let config = StorageConfig {
            backend: "consul".into(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::UnknownBackend(tag)) if tag == "consul"
        ));
    }

    #[test]
    fn azure_requires_connection_string_and_container() {
        let mut config = StorageConfig {
            backend: "azure_blob".into(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::MissingField {
                field: "azure.connection_string",
                ..
            })
        ));

        config.azure.connection_string = Some("UseDevelopmentStorage=true".into());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::MissingField {
                field: "azure.container",
                ..
            })
        ));

        config.azure.container = Some("ipam".into());
        let spec = config.resolve().unwrap();
        assert_eq!(spec.kind(), "azure_blob");
    }

    #[test]
    fn s3_credentials_must_be_paired() {
        let mut config = StorageConfig {
            backend: "aws_s3".into(),
            ..StorageConfig::default()
        };
        config.s3.region = Some("us-east-1".into());
        config.s3.bucket = Some("infra".into());
        config.s3.access_key_id = Some("AKID".into());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::MissingField {
                field: "s3.secret_access_key",
                ..
            })
        ));

        config.s3.access_key_id = None;
        config.s3.secret_access_key = Some("secret".into());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::MissingField {
                field: "s3.access_key_id",
                ..
            })
        ));

        config.s3.access_key_id = Some("AKID".into());
        match config.resolve().unwrap() {
            BackendSpec::AwsS3(settings) => {
                assert_eq!(settings.object_key, DEFAULT_OBJECT_NAME);
                assert_eq!(
                    settings.credentials.map(|c| c.access_key_id),
                    Some("AKID".to_string())
                );
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut config = S3Config::default();
        config.secret_access_key = Some("very-secret".into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
