//! Inference module for species prediction
//!
//! This module provides:
//! - Image preprocessing into the classifier's NHWC input
//! - Scoped temporary storage of uploaded files
//! - The prediction pipeline shared by the HTTP service and the CLI

pub mod predictor;
pub mod preprocess;
pub mod upload;

pub use predictor::{
    PredictError, Prediction, Predictor, PredictorConfig, UploadedFile, MSG_NO_FILE_PART,
    MSG_NO_SELECTED_FILE,
};
pub use preprocess::{decode_image, load_image_tensor, preprocess_image, rescale_pixels, resize_rgb};
pub use upload::{upload_extension, TempUpload, TEMP_FILE_PREFIX};
