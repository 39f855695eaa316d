//! Random geometric augmentation for training images
//!
//! Each training image gets a random rotation, a random shift along both
//! axes and a coin-flip horizontal mirror. Pixels that fall outside the
//! source are filled with the nearest edge pixel. Rescaling to [0, 1]
//! happens afterwards, in the batcher.

use image::RgbImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Augmentation ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees, drawn from [-r, r]
    pub rotation_degrees: f32,
    /// Maximum shift as a fraction of width and height
    pub shift_fraction: f32,
    /// Mirror half of the images horizontally
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            shift_fraction: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// No augmentation at all
    pub fn disabled() -> Self {
        Self {
            rotation_degrees: 0.0,
            shift_fraction: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_degrees <= 0.0 && self.shift_fraction <= 0.0 && !self.horizontal_flip
    }
}

/// Parameters drawn for one image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// Rotation in radians, counter-clockwise
    pub angle: f32,
    /// Horizontal shift in pixels
    pub shift_x: f32,
    /// Vertical shift in pixels
    pub shift_y: f32,
    pub flip: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            angle: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            flip: false,
        }
    }
}

/// Applies random augmentation drawn from an [`AugmentationConfig`]
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw augmentation parameters for an image of the given size
    pub fn sample_params<R: Rng + ?Sized>(
        &self,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> AffineParams {
        let mut params = AffineParams::identity();

        if self.config.rotation_degrees > 0.0 {
            let r = self.config.rotation_degrees;
            params.angle = rng.gen_range(-r..=r).to_radians();
        }
        if self.config.shift_fraction > 0.0 {
            let s = self.config.shift_fraction;
            params.shift_x = rng.gen_range(-s..=s) * width as f32;
            params.shift_y = rng.gen_range(-s..=s) * height as f32;
        }
        if self.config.horizontal_flip {
            params.flip = rng.gen_bool(0.5);
        }

        params
    }

    /// Return a randomly augmented copy of `image`
    pub fn augment<R: Rng + ?Sized>(&self, image: &RgbImage, rng: &mut R) -> RgbImage {
        if self.config.is_identity() {
            return image.clone();
        }
        let params = self.sample_params(image.width(), image.height(), rng);
        apply_affine(image, &params)
    }
}

/// Rotate about the center, shift, then mirror, sampling nearest pixels
///
/// Works by inverse mapping: every output pixel looks up its source pixel,
/// clamped to the image bounds.
pub fn apply_affine(image: &RgbImage, params: &AffineParams) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || *params == AffineParams::identity() {
        return image.clone();
    }

    let (sin, cos) = params.angle.sin_cos();
    let cx = (width - 1) as f32 / 2.0;
    let cy = (height - 1) as f32 / 2.0;
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    RgbImage::from_fn(width, height, |x, y| {
        let x = if params.flip { max_x - x as f32 } else { x as f32 };
        let dx = x - params.shift_x - cx;
        let dy = y as f32 - params.shift_y - cy;

        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;

        let sx = sx.round().clamp(0.0, max_x) as u32;
        let sy = sy.round().clamp(0.0, max_y) as u32;
        *image.get_pixel(sx, sy)
    })
}
