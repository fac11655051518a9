/// Portrait 9:16
pub const TARGET_ASPECT: f64 = 9.0 / 16.0;

/// Output height used when nothing else is configured
pub const OUTPUT_HEIGHT: u32 = 1920;

/// Source region to sample, in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRect {
    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }

    /// Integer rectangle clamped to a `width`×`height` source
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x = (self.x.round().max(0.0) as u32).min(width.saturating_sub(1));
        let y = (self.y.round().max(0.0) as u32).min(height.saturating_sub(1));
        let w = (self.width.round().max(1.0) as u32).min(width - x);
        let h = (self.height.round().max(1.0) as u32).min(height - y);
        (x, y, w, h)
    }
}

/// Centered crop of a `width`×`height` source at `aspect` (width / height).
///
/// Returns `None` for a source without pixels.
pub fn compute_crop(width: u32, height: u32, aspect: f64) -> Option<CropRect> {
    if width == 0 || height == 0 || !(aspect > 0.0) {
        return None;
    }

    let (w, h) = (width as f64, height as f64);
    let rect = if w / h > aspect {
        let crop_width = h * aspect;
        CropRect {
            x: (w - crop_width) / 2.0,
            y: 0.0,
            width: crop_width,
            height: h,
        }
    } else {
        let crop_height = w / aspect;
        CropRect {
            x: 0.0,
            y: (h - crop_height) / 2.0,
            width: w,
            height: crop_height,
        }
    };

    Some(rect)
}

/// Output canvas size for a fixed height
pub fn output_size(height: u32, aspect: f64) -> (u32, u32) {
    let width = (height as f64 * aspect).round().max(1.0) as u32;
    (width, height)
}
