//! Dataset module for class-labeled image trees
//!
//! This module provides:
//! - Discovery of class directories and their image files
//! - Deterministic train/validation/test partitioning per class
//! - Random geometric augmentation of training images

pub mod augmentation;
pub mod loader;
pub mod partition;

pub use augmentation::{apply_affine, AffineParams, AugmentationConfig, Augmenter};
pub use loader::{discover_classes, is_image_file, list_class_names, list_images, ClassImages};
pub use partition::{
    partition_class, partition_dataset, split_class, ClassOutcome, ClassReport, ClassSplit,
    PartitionConfig, PartitionReport, Subset,
};
