//! Byte-level storage media.
//!
//! A medium only moves the serialized dataset; locking, copying and
//! serialization live in [`crate::PersistentStore`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipam_core::{IpamError, Result};
use parking_lot::Mutex;

/// Where the full dataset document lives.
pub trait Medium: Send + Sync {
    /// Human-readable location, used in logs and error context.
    fn describe(&self) -> String;

    /// Read the whole document. `Ok(None)` means the object does not exist yet.
    fn fetch(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the whole document.
    fn publish(&self, bytes: &[u8]) -> Result<()>;

    /// Release transport resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process medium. Clones share the same buffer, so two stores opened on
/// clones observe the same "remote" object.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    buffer: Arc<Mutex<Option<Vec<u8>>>>,
    read_only: Arc<AtomicBool>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        let medium = Self::default();
        *medium.buffer.lock() = Some(bytes.into());
        medium
    }

    /// Current document bytes, if any were written.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.buffer.lock().clone()
    }

    /// Reject subsequent writes, simulating an unavailable backend.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl Medium for MemoryMedium {
    fn describe(&self) -> String {
        "memory".into()
    }

    fn fetch(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.buffer.lock().clone())
    }

    fn publish(&self, bytes: &[u8]) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(IpamError::backend(
                "failed to write memory medium",
                "medium is read-only",
            ));
        }
        *self.buffer.lock() = Some(bytes.to_vec());
        Ok(())
    }
}
