//! Backend selection
//!
//! Serving and training both run on the CPU through the NdArray backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

/// Backend used for inference
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

/// Autodiff backend for training
pub type TrainingBackend = Autodiff<InferenceBackend>;

/// Get the default inference device
pub fn default_device() -> <InferenceBackend as Backend>::Device {
    <InferenceBackend as Backend>::Device::default()
}

/// Get a human-readable name for the inference backend
pub fn backend_name() -> &'static str {
    "NdArray (CPU)"
}
