//! Class-labeled image directory discovery
//!
//! A labeled dataset is laid out as one subdirectory per class:
//!
//! ```text
//! root_dir/
//! ├── Espeletia_grandiflora/
//! │   ├── 101.jpg
//! │   └── 102.jpg
//! ├── Tremarctos_ornatus/
//! │   └── ...
//! └── ...
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::utils::error::{Result, SpeciesError};

/// File extensions accepted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A class directory and the image files directly inside it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassImages {
    /// Class name (the directory name)
    pub class_name: String,
    /// Path to the class directory
    pub dir: PathBuf,
    /// Image files, sorted by file name
    pub images: Vec<PathBuf>,
}

impl ClassImages {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Check whether a path has one of the accepted image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// List the immediate subdirectory names of `root`, sorted in byte order
///
/// Symbolic links to directories are followed.
///
/// The sorted order is the class index order the classifier is trained with.
pub fn list_class_names(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(SpeciesError::PathNotFound(root.to_path_buf()));
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        // symlinked class directories count as classes
        if !entry.path().is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => {
                return Err(SpeciesError::Dataset(format!(
                    "Class directory name is not valid UTF-8: {:?}",
                    raw
                )))
            }
        }
    }
    names.sort();

    Ok(names)
}

/// List the image files directly inside `class_dir`, sorted by file name
pub fn list_images(class_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for entry in WalkDir::new(class_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            SpeciesError::Dataset(format!("Failed to read {:?}: {}", class_dir, e))
        })?;
        // path().is_file() follows symlinks; dangling links are skipped
        if entry.path().is_file() && is_image_file(entry.path()) {
            images.push(entry.path().to_path_buf());
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    Ok(images)
}

/// Discover every class directory under `root` with its images
///
/// Classes without images are returned too, with an empty list, so callers
/// can report them.
pub fn discover_classes(root: &Path) -> Result<Vec<ClassImages>> {
    let mut classes = Vec::new();

    for class_name in list_class_names(root)? {
        let dir = root.join(&class_name);
        let images = list_images(&dir)?;
        debug!("Class '{}': {} images", class_name, images.len());
        classes.push(ClassImages {
            class_name,
            dir,
            images,
        });
    }

    Ok(classes)
}
