//! Model module: network definition, classifier abstraction and species registry
//!
//! - [`cnn`]: MobileNetV2-style network in Burn
//! - [`classifier`]: the opaque scoring interface and its Burn implementation
//! - [`registry`]: index-aligned species names

pub mod classifier;
pub mod cnn;
pub mod registry;

pub use classifier::{
    init_model_artifact, load_classifier, BurnClassifier, Classifier, ClassifierOutput,
    ImageTensor, MODEL_CONFIG_FILE, MODEL_WEIGHTS_FILE, PROBABILITIES_OUTPUT,
};
pub use cnn::{SpeciesNet, SpeciesNetConfig};
pub use registry::{
    LabelMapping, RegistrySource, SpeciesRegistry, FALLBACK_SPECIES, LABELS_FILE_NAME,
};
