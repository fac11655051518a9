use super::stream::DeviceStream;
use super::test_pattern::TestPatternSource;
use crate::config::{CameraBackend, CameraConfig};
use crate::error::CameraError;
use crate::frame::Facing;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Acquires live capture streams from a camera backend
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Request a stream for the given facing at the backend's preferred
    /// resolution. The caller must have released its previous stream.
    async fn acquire(&self, facing: Facing) -> Result<DeviceStream, CameraError>;

    /// Stop all tracks of a stream. Idempotent.
    fn release(&self, stream: &DeviceStream) {
        stream.release();
    }

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the frame source selected in the configuration
pub fn build_frame_source(config: &CameraConfig) -> Result<Arc<dyn FrameSource>, CameraError> {
    match config.backend {
        CameraBackend::TestPattern => {
            info!(
                "Using test pattern camera ({}x{} @ {}fps)",
                config.resolution.0, config.resolution.1, config.fps
            );
            Ok(Arc::new(TestPatternSource::from_config(config)))
        }
        #[cfg(all(feature = "camera", target_os = "linux"))]
        CameraBackend::V4l2 => {
            info!(
                "Using GStreamer v4l2 camera (front=/dev/video{}, back=/dev/video{})",
                config.front_device, config.back_device
            );
            Ok(Arc::new(super::gst::GstFrameSource::new(config.clone())?))
        }
        #[cfg(not(all(feature = "camera", target_os = "linux")))]
        CameraBackend::V4l2 => Err(CameraError::Configuration {
            details: "v4l2 backend requires the `camera` feature on Linux".to_string(),
        }),
    }
}
