//! Backend selection from configuration.

use ipam_config::{BackendSpec, StorageConfig};
use ipam_core::Result;
use tracing::info;

use crate::azure::AzureBlobMedium;
use crate::file::FileMedium;
use crate::s3::S3Medium;
use crate::store::{IpamStore, PersistentStore};

pub type FileStore = PersistentStore<FileMedium>;
pub type S3Store = PersistentStore<S3Medium>;
pub type AzureBlobStore = PersistentStore<AzureBlobMedium>;

/// Open the store described by `config`, loading its dataset once.
///
/// Unknown backend tags and missing required fields are configuration errors;
/// load failures of the chosen backend are returned as backend errors.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn IpamStore>> {
    let spec = config.resolve()?;
    info!(backend = spec.kind(), "Opening IPAM store");

    let store: Box<dyn IpamStore> = match spec {
        BackendSpec::File { path } => Box::new(FileStore::open(FileMedium::new(path))?),
        BackendSpec::AzureBlob {
            connection_string,
            container,
            blob_name,
        } => Box::new(AzureBlobStore::open(AzureBlobMedium::new(
            &connection_string,
            &container,
            &blob_name,
        )?)?),
        BackendSpec::AwsS3(settings) => Box::new(S3Store::open(S3Medium::new(&settings)?)?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipam_config::ConfigError;
    use ipam_core::{IpamError, Pool};

    #[test]
    fn opens_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::file(dir.path().join("ipam.json"));

        let store = open_store(&config).unwrap();
        store.save_pool(&Pool::new("lab", ["10.0.0.0/16"])).unwrap();
        store.close().unwrap();

        let reopened = open_store(&config).unwrap();
        assert_eq!(reopened.get_pool("lab").unwrap().cidrs, vec!["10.0.0.0/16"]);
        assert!(reopened.describe().starts_with("file://"));
    }

    #[test]
    fn unknown_backend_is_a_configuration_error() {
        let config = StorageConfig {
            backend: "etcd".into(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            open_store(&config),
            Err(IpamError::Configuration(ConfigError::UnknownBackend(_)))
        ));
    }

    #[test]
    fn missing_azure_fields_are_reported() {
        let config = StorageConfig {
            backend: "azure_blob".into(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            open_store(&config),
            Err(IpamError::Configuration(ConfigError::MissingField {
                backend: "azure_blob",
                ..
            }))
        ));
    }
}
