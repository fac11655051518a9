use super::canvas::{Canvas, Transform};
use super::geometry::{compute_crop, output_size};
use crate::config::CompositorConfig;
use crate::error::CompositeError;
use crate::frame::{CaptureFrame, Facing};
use crate::overlay::{Overlay, OverlayLoader};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Encoded capture ready for the asset sink
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub bytes: Vec<u8>,
    /// Overlay drawn on top, `None` when the capture has no overlay
    pub overlay_id: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
}

/// Turns one live frame plus an optional overlay into a portrait JPEG
pub struct Compositor {
    config: CompositorConfig,
    loader: Arc<dyn OverlayLoader>,
}

impl Compositor {
    pub fn new(config: CompositorConfig, loader: Arc<dyn OverlayLoader>) -> Self {
        Self { config, loader }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Canvas size of every composite, independent of the source resolution
    pub fn output_size(&self) -> (u32, u32) {
        output_size(self.config.output_height, self.config.aspect())
    }

    /// Draw frame, reset transform, load and draw overlay, encode.
    ///
    /// Front-facing frames are mirrored to match the live preview; the
    /// overlay is always drawn unmirrored.
    pub async fn composite(
        &self,
        frame: CaptureFrame,
        facing: Facing,
        overlay: Option<&Overlay>,
    ) -> Result<CompositeResult, CompositeError> {
        if frame.is_empty() {
            return Err(CompositeError::EmptyFrame {
                width: frame.width,
                height: frame.height,
            });
        }

        let started = Instant::now();
        let (width, height) = self.output_size();
        let aspect = self.config.aspect();

        let mut canvas = run_blocking("draw frame", move || {
            let source = frame.to_rgba_image()?;
            let (src_w, src_h) = source.dimensions();
            let crop = compute_crop(src_w, src_h, aspect).ok_or(CompositeError::EmptyFrame {
                width: src_w,
                height: src_h,
            })?;

            let mut canvas = Canvas::new(width, height);
            if facing.is_mirrored() {
                canvas.set_transform(Transform::MirrorX);
            }
            canvas.draw_image(&source, Some(crop.to_pixels(src_w, src_h)));
            Ok(canvas)
        })
        .await?;

        canvas.reset_transform();

        let overlay_id = match overlay {
            Some(overlay) => {
                let image = self.load_overlay(overlay).await?;
                canvas = run_blocking("draw overlay", move || {
                    canvas.draw_image(&image, None);
                    Ok(canvas)
                })
                .await?;
                Some(overlay.id)
            }
            None => None,
        };

        let quality = self.config.jpeg_quality;
        let bytes = run_blocking("encode", move || canvas.encode_jpeg(quality)).await?;

        info!(
            "Composited {}x{} {} capture ({} bytes, overlay {:?}) in {:?}",
            width,
            height,
            facing,
            bytes.len(),
            overlay_id,
            started.elapsed()
        );

        Ok(CompositeResult {
            bytes,
            overlay_id,
            width,
            height,
            facing,
        })
    }

    /// Stretch an overlay over an already stored photo at the photo's own size
    pub async fn merge_overlay(
        &self,
        photo_jpeg: Vec<u8>,
        overlay: &Overlay,
    ) -> Result<Vec<u8>, CompositeError> {
        let image = self.load_overlay(overlay).await?;
        let quality = self.config.jpeg_quality;

        run_blocking("merge overlay", move || {
            let photo = image::load_from_memory(&photo_jpeg)
                .map_err(|e| CompositeError::FrameDecode {
                    details: format!("stored photo: {}", e),
                })?
                .to_rgba8();

            let (width, height) = photo.dimensions();
            let mut canvas = Canvas::new(width, height);
            canvas.draw_image(&photo, None);
            canvas.draw_image(&image, None);
            canvas.encode_jpeg(quality)
        })
        .await
    }

    /// Fetch and decode an overlay, bounded by the configured timeout
    async fn load_overlay(&self, overlay: &Overlay) -> Result<RgbaImage, CompositeError> {
        let timeout = self.config.overlay_load_timeout();
        let bytes = match tokio::time::timeout(timeout, self.loader.load(overlay)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Overlay {} did not load within {}ms",
                    overlay.id,
                    timeout.as_millis()
                );
                return Err(CompositeError::OverlayLoad {
                    overlay_id: overlay.id,
                    details: format!("timed out after {}ms", timeout.as_millis()),
                });
            }
        };
        debug!("Loaded overlay {} ({} bytes)", overlay.id, bytes.len());

        let overlay_id = overlay.id;
        run_blocking("decode overlay", move || {
            image::load_from_memory(&bytes)
                .map(|decoded| decoded.to_rgba8())
                .map_err(|e| CompositeError::OverlayLoad {
                    overlay_id,
                    details: format!("undecodable image: {}", e),
                })
        })
        .await
    }
}

async fn run_blocking<T, F>(step: &'static str, work: F) -> Result<T, CompositeError>
where
    F: FnOnce() -> Result<T, CompositeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CompositeError::Render {
            details: format!("{} task failed: {}", step, e),
        })?
}
