//! # Species Classifier
//!
//! Identification of páramo species from photographs.
//!
//! ## Modules
//!
//! - `dataset`: class directory discovery and deterministic train/val/test partitioning
//! - `model`: MobileNetV2-style network, the classifier interface and the species registry
//! - `inference`: preprocessing and the prediction pipeline used by the HTTP service
//! - `training`: supervised training with augmentation, producing a model artifact
//! - `backend`: Burn backends for inference and training
//! - `utils`: logging, errors and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use species_classifier::inference::{Predictor, PredictorConfig};
//! use species_classifier::model::{load_classifier, SpeciesRegistry};
//!
//! let registry = SpeciesRegistry::resolve(Some(model_dir), Some(train_dir));
//! let classifier = load_classifier(model_dir).ok();
//! let predictor = Predictor::new(classifier, Arc::new(registry), PredictorConfig::default());
//! let prediction = predictor.classify_path("frailejon.jpg".as_ref())?;
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::{partition_dataset, PartitionConfig, PartitionReport};
pub use inference::{PredictError, Prediction, Predictor, PredictorConfig, UploadedFile};
pub use model::{Classifier, SpeciesRegistry};
pub use training::{run_training, TrainingConfig, TrainingSummary};
pub use utils::error::{Result, SpeciesError};

/// Square input size expected by the classifier
pub const IMAGE_SIZE: u32 = 224;

/// Default seed for dataset partitioning and training
pub const DEFAULT_SEED: u64 = 42;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
