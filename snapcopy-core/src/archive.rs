/*!
Local snapshot archive produced by a download and consumed by an upload.
*/

use crate::Result;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Archive file name used for a snapshot id
pub fn archive_file_name(snapshot_id: &str) -> String {
    format!("{snapshot_id}.tar")
}

/// A downloaded snapshot archive on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchive {
    path: PathBuf,
    size: u64,
    sha256: String,
}

impl LocalArchive {
    /// Inspect an archive that already exists on disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let mut hasher = Sha256::new();
        let size = io::copy(&mut file, &mut hasher)?;
        let sha256 = format!("{:x}", hasher.finalize());

        debug!(path = %path.display(), size, sha256 = %sha256, "Inspected local archive");
        Ok(Self { path, size, sha256 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name sent with the upload
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot.tar".to_string())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex-encoded SHA-256 of the archive contents
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Delete the archive; deleting an already missing file is not an error
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
