//! # ipam-store
//!
//! Persistent storage of pools and allocations.
//!
//! Every backend keeps the whole dataset as one JSON document and differs
//! only in where that document lives:
//! - `file`: a local file, replaced atomically on each write
//! - `s3`: an AWS S3 (or compatible) object
//! - `azure`: an Azure Blob Storage block blob
//!
//! [`PersistentStore`] layers the in-memory cache, locking and write-through
//! semantics over any [`Medium`].

mod azure;
mod credentials;
mod factory;
mod file;
mod http;
mod medium;
mod s3;
mod store;

pub use azure::AzureBlobMedium;
pub use factory::{open_store, AzureBlobStore, FileStore, S3Store};
pub use file::FileMedium;
pub use http::TransportError;
pub use medium::{Medium, MemoryMedium};
pub use s3::S3Medium;
pub use store::{IpamStore, PersistentStore};
