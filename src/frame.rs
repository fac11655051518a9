use crate::error::CompositeError;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Which physical camera is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// User-facing camera, previewed mirrored
    #[default]
    Front,
    /// Environment-facing camera
    Back,
}

impl Facing {
    pub fn toggled(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }

    /// Front camera output is mirrored to match the live preview.
    pub fn is_mirrored(self) -> bool {
        matches!(self, Facing::Front)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG - compressed JPEG frames
    Mjpeg,
    /// Packed 8-bit RGBA
    Rgba8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0,
            FrameFormat::Rgba8 => 4,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// Snapshot of a device stream at the instant of capture
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub id: u64,
    pub captured_at: SystemTime,
    /// Shared so handing a snapshot to the compositor never copies pixels
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl CaptureFrame {
    pub fn new(
        id: u64,
        captured_at: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            captured_at,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Wrap an already decoded RGBA image
    pub fn from_rgba(id: u64, image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(
            id,
            SystemTime::now(),
            image.into_raw(),
            width,
            height,
            FrameFormat::Rgba8,
        )
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// A frame with a zero dimension cannot be composited
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }

    /// Decode the frame into an RGBA pixel buffer
    pub fn to_rgba_image(&self) -> Result<RgbaImage, CompositeError> {
        if self.is_empty() {
            return Err(CompositeError::EmptyFrame {
                width: self.width,
                height: self.height,
            });
        }

        match self.format {
            FrameFormat::Rgba8 => {
                if !self.validate_size() {
                    return Err(CompositeError::FrameDecode {
                        details: format!(
                            "frame {} has {} bytes, expected {}",
                            self.id,
                            self.data.len(),
                            self.expected_size().unwrap_or_default()
                        ),
                    });
                }
                RgbaImage::from_raw(self.width, self.height, self.data.as_ref().clone()).ok_or_else(
                    || CompositeError::FrameDecode {
                        details: format!("frame {} buffer does not match its dimensions", self.id),
                    },
                )
            }
            FrameFormat::Mjpeg => {
                let decoded = image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)
                    .map_err(|e| CompositeError::FrameDecode {
                        details: format!("JPEG decode failed for frame {}: {}", self.id, e),
                    })?;
                Ok(decoded.to_rgba8())
            }
        }
    }
}
