//! Image preprocessing for the classifier
//!
//! Decode, convert to RGB, resize exactly to the model input size with
//! nearest-neighbour sampling, scale to [0, 1] and lay out as NHWC with a
//! batch dimension of one.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageReader, RgbImage};

use crate::model::ImageTensor;
use crate::utils::error::{Result, SpeciesError};

/// Decode an image file, sniffing the format from its contents
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| SpeciesError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| SpeciesError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| SpeciesError::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// Resize to `size` x `size` RGB with nearest-neighbour sampling
pub fn resize_rgb(image: &DynamicImage, size: u32) -> Result<RgbImage> {
    if size == 0 {
        return Err(SpeciesError::InvalidInput(
            "image size must be positive".to_string(),
        ));
    }
    Ok(image.resize_exact(size, size, FilterType::Nearest).to_rgb8())
}

/// Scale RGB8 pixels to [0, 1], keeping the interleaved HWC layout
pub fn rescale_pixels(rgb: &RgbImage) -> Vec<f32> {
    rgb.as_raw().iter().map(|&v| v as f32 / 255.0).collect()
}

/// Load an image file and turn it into a `[1, size, size, 3]` tensor
pub fn load_image_tensor(path: &Path, size: u32) -> Result<ImageTensor> {
    preprocess_image(&decode_image(path)?, size)
}

/// Turn a decoded image into a `[1, size, size, 3]` tensor
pub fn preprocess_image(image: &DynamicImage, size: u32) -> Result<ImageTensor> {
    let rgb = resize_rgb(image, size)?;
    ImageTensor::new(rescale_pixels(&rgb), [1, size as usize, size as usize, 3])
}
