use std::time::Instant;

use fast_image_resize::images::Image;
use fast_image_resize::{PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use tracing::debug;

use crate::error::InputError;

/// Model inputs are always 8-bit RGB.
pub const CHANNELS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    pub height: usize,
    pub width: usize,
    /// Every 8-bit channel value is divided by this.
    pub divisor: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            height: 240,
            width: 240,
            divisor: 255.0,
        }
    }
}

impl PreprocessConfig {
    /// Shape of the tensor handed to the model, batch axis first (NHWC).
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.height, self.width, CHANNELS]
    }
}

#[derive(Debug, Default)]
pub struct Processor {
    pub config: PreprocessConfig,
}

impl Processor {
    /// Create a new instance of the Processor struct
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Turn one image into the model input.
    ///
    /// Any channel layout or bit depth is canonicalized to 8-bit RGB first
    /// (grayscale is replicated, alpha is dropped). The image is then stretched
    /// to the configured size with nearest-neighbour sampling and every channel
    /// is scaled into `[0, 1]`. Output shape is always `(1, height, width, 3)`.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>, InputError> {
        let t = Instant::now();
        let (orig_width, orig_height) = image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(InputError::Empty {
                width: orig_width,
                height: orig_height,
            });
        }

        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let (width, height) = (self.config.width, self.config.height);
        let mut dst_image = Image::new(width as u32, height as u32, PixelType::U8x3);

        let options = ResizeOptions::new().resize_alg(ResizeAlg::Nearest);
        let mut resizer = Resizer::new();
        resizer
            .resize(&rgb, &mut dst_image, Some(&options))
            .map_err(|e| InputError::Resize(e.to_string()))?;

        let pixels = dst_image.buffer();
        let divisor = self.config.divisor;
        let tensor = Array4::from_shape_fn((1, height, width, CHANNELS), |(_, y, x, c)| {
            pixels[(y * width + x) * CHANNELS + c] as f32 / divisor
        });

        debug!(
            orig_width,
            orig_height,
            shape = ?tensor.shape(),
            elapsed_us = t.elapsed().as_micros() as u64,
            "preprocessed image"
        );
        Ok(tensor)
    }
}
