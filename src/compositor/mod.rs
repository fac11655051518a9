mod canvas;
mod core;
mod geometry;

pub use canvas::{Canvas, Transform};
pub use self::core::{CompositeResult, Compositor};
pub use geometry::{compute_crop, output_size, CropRect, OUTPUT_HEIGHT, TARGET_ASPECT};
