use crate::error::CompositeError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};

/// Horizontal transform applied to subsequent draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    #[default]
    Identity,
    /// Mirror around the vertical axis
    MirrorX,
}

/// Fixed-size RGBA drawing surface owned by a single capture
pub struct Canvas {
    pixels: RgbaImage,
    transform: Transform,
}

impl Canvas {
    /// Opaque black canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])),
            transform: Transform::Identity,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn reset_transform(&mut self) {
        self.transform = Transform::Identity;
    }

    /// Stretch `source` (or its `region` as x, y, width, height) over the
    /// whole canvas and alpha-blend it on top, honouring the transform.
    pub fn draw_image(&mut self, source: &RgbaImage, region: Option<(u32, u32, u32, u32)>) {
        let (width, height) = self.dimensions();

        let cropped;
        let source = match region {
            Some((x, y, w, h)) if (x, y, w, h) != (0, 0, source.width(), source.height()) => {
                cropped = imageops::crop_imm(source, x, y, w, h).to_image();
                &cropped
            }
            _ => source,
        };

        let mut scaled = if source.dimensions() == (width, height) {
            source.clone()
        } else {
            imageops::resize(source, width, height, FilterType::Triangle)
        };

        if self.transform == Transform::MirrorX {
            imageops::flip_horizontal_in_place(&mut scaled);
        }

        imageops::overlay(&mut self.pixels, &scaled, 0, 0);
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// JPEG-encode the canvas; alpha is dropped
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, CompositeError> {
        let rgb = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(self.pixels.clone()).to_rgb8());

        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder
            .encode_image(&rgb)
            .map_err(|e| CompositeError::Encoding {
                details: e.to_string(),
            })?;

        if buf.is_empty() {
            return Err(CompositeError::EmptyOutput);
        }
        Ok(buf)
    }
}
