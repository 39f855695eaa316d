//! In-memory labeled image sets for training
//!
//! Images are decoded and resized to the model input size once, up front.
//! Augmentation and rescaling happen per batch so every epoch sees fresh
//! random transforms.

use std::path::Path;

use image::RgbImage;
use rand::Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::dataset::{discover_classes, Augmenter};
use crate::inference::{decode_image, rescale_pixels, resize_rgb};
use crate::model::SpeciesRegistry;
use crate::utils::error::Result;

/// Resized images with their class indices
#[derive(Debug, Clone, Default)]
pub struct LabeledImages {
    images: Vec<RgbImage>,
    labels: Vec<usize>,
    image_size: u32,
    skipped: usize,
}

/// Pixels and targets of one mini-batch
#[derive(Debug, Clone)]
pub struct BatchData {
    /// Flattened NHWC pixels in [0, 1]
    pub pixels: Vec<f32>,
    pub targets: Vec<i64>,
}

impl BatchData {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl LabeledImages {
    /// Load every image under the class directories of `root`
    ///
    /// Class indices come from `registry`. Classes it does not know are
    /// skipped with a warning, as are files that fail to decode.
    pub fn load(root: &Path, registry: &SpeciesRegistry, image_size: u32) -> Result<Self> {
        let mut samples = Vec::new();
        for class in discover_classes(root)? {
            match registry.index_of(&class.class_name) {
                Some(label) => samples.extend(class.images.into_iter().map(|path| (path, label))),
                None => warn!(
                    "Class '{}' in {:?} is not in the species list; skipping {} images",
                    class.class_name,
                    root,
                    class.len()
                ),
            }
        }

        let loaded: Vec<Option<(RgbImage, usize)>> = samples
            .par_iter()
            .map(|(path, label)| {
                match decode_image(path).and_then(|image| resize_rgb(&image, image_size)) {
                    Ok(rgb) => Some((rgb, *label)),
                    Err(e) => {
                        warn!("Skipping unreadable image: {}", e);
                        None
                    }
                }
            })
            .collect();

        let skipped = loaded.iter().filter(|item| item.is_none()).count();
        let (images, labels): (Vec<_>, Vec<_>) = loaded.into_iter().flatten().unzip();

        info!(
            "Loaded {} images from {:?} ({} skipped)",
            images.len(),
            root,
            skipped
        );

        Ok(Self {
            images,
            labels,
            image_size,
            skipped,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Files that could not be decoded
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of images per class index
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for &label in &self.labels {
            if label < num_classes {
                counts[label] += 1;
            }
        }
        counts
    }

    /// Build the batch for `indices`, augmenting when an augmenter is given
    ///
    /// Out-of-range indices are ignored.
    pub fn batch<R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        augmenter: Option<&Augmenter>,
        rng: &mut R,
    ) -> BatchData {
        let side = self.image_size as usize;
        let mut pixels = Vec::with_capacity(indices.len() * side * side * 3);
        let mut targets = Vec::with_capacity(indices.len());

        for &i in indices {
            let (Some(image), Some(&label)) = (self.images.get(i), self.labels.get(i)) else {
                continue;
            };
            match augmenter {
                Some(augmenter) => pixels.extend(rescale_pixels(&augmenter.augment(image, rng))),
                None => pixels.extend(rescale_pixels(image)),
            }
            targets.push(label as i64);
        }

        BatchData { pixels, targets }
    }
}
