//! Training module
//!
//! - [`data`]: decoded, resized training images and batch assembly
//! - [`supervised`]: the Adam/cross-entropy training loop that produces a model artifact

pub mod data;
pub mod supervised;

pub use data::{BatchData, LabeledImages};
pub use supervised::{run_training, EpochMetrics, TrainingConfig, TrainingSummary};
