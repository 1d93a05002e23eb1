//! Local file medium.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use ipam_core::{IpamError, Result};
use tracing::warn;

use crate::medium::Medium;

/// Dataset stored as one JSON file. Writes go to a sibling temporary file
/// that is renamed over the target.
#[derive(Debug, Clone)]
pub struct FileMedium {
    path: PathBuf,
}

impl FileMedium {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ipam-storage".into());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

impl Medium for FileMedium {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn fetch(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            // A zero-length file carries no dataset yet.
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(IpamError::backend(
                format!("failed to read storage file {}", self.path.display()),
                err,
            )),
        }
    }

    fn publish(&self, bytes: &[u8]) -> Result<()> {
        let context = || format!("failed to write storage file {}", self.path.display());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| IpamError::backend(context(), e))?;
        }

        let temp = self.temp_path();
        write_and_replace(&temp, &self.path, bytes).map_err(|e| {
            if let Err(cleanup) = fs::remove_file(&temp) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %cleanup, "Failed to remove temporary file");
                }
            }
            IpamError::backend(context(), e)
        })
    }
}

fn write_and_replace(temp: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp, target)
}
