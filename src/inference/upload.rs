//! Scoped temporary storage for uploaded images

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::utils::error::Result;

/// Prefix of every temporary upload file name
pub const TEMP_FILE_PREFIX: &str = "pred_";

/// An uploaded file written to disk, removed when dropped
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    /// Write `bytes` to a uniquely named file in `dir`
    pub fn persist(dir: &Path, bytes: &[u8], extension: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(format!("{}{}.{}", TEMP_FILE_PREFIX, Uuid::new_v4(), extension));
        std::fs::write(&path, bytes)?;
        debug!("Saved upload to {:?} ({} bytes)", path, bytes.len());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary upload {:?}", self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary upload {:?}: {}", self.path, e),
        }
    }
}

/// Extension to use for the stored copy of an upload
///
/// Only short alphanumeric extensions from the client file name are kept;
/// decoding guesses the format from content anyway.
pub fn upload_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "img".to_string())
}
