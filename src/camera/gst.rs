use super::source::FrameSource;
use super::stream::{DeviceStream, StreamFeed, Track};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{CaptureFrame, Facing, FrameFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// GStreamer v4l2 camera; one pipeline per acquired stream
pub struct GstFrameSource {
    config: CameraConfig,
    next_stream_id: AtomicU64,
}

impl GstFrameSource {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        Ok(Self {
            config,
            next_stream_id: AtomicU64::new(1),
        })
    }

    /// Build the pipeline description for one device
    fn build_pipeline_string(&self, device_index: u32) -> String {
        let (width, height) = self.config.resolution;
        let fps = self.config.fps;

        match self.config.format.as_str() {
            "RGBA" => format!(
                "v4l2src device=/dev/video{} do-timestamp=true ! \
                 videoconvert ! videoscale ! \
                 video/x-raw,format=RGBA,width={},height={},framerate={}/1 ! \
                 appsink name=sink sync=false max-buffers=2 drop=true emit-signals=false",
                device_index, width, height, fps
            ),
            _ => format!(
                "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
                 image/jpeg,width={},height={},framerate={}/1 ! \
                 queue max-size-buffers=4 leaky=downstream ! \
                 appsink name=sink sync=false max-buffers=2 drop=true emit-signals=false",
                device_index, width, height, fps
            ),
        }
    }

    fn frame_format(&self) -> FrameFormat {
        match self.config.format.as_str() {
            "RGBA" => FrameFormat::Rgba8,
            _ => FrameFormat::Mjpeg,
        }
    }

    /// Convert a sample into a frame, repacking rows when the stride has padding
    fn sample_to_frame(
        sample: &gstreamer::Sample,
        frame_id: u64,
        format: FrameFormat,
    ) -> Result<CaptureFrame, CameraError> {
        let buffer = sample.buffer().ok_or_else(|| CameraError::TrackAcquisition {
            details: "No buffer in sample".to_string(),
        })?;
        let caps = sample.caps().ok_or_else(|| CameraError::TrackAcquisition {
            details: "No caps in sample".to_string(),
        })?;
        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::TrackAcquisition {
                details: format!("Failed to map buffer: {}", e),
            })?;

        let (width, height, data) = match format {
            FrameFormat::Mjpeg => {
                let structure = caps.structure(0).ok_or_else(|| CameraError::TrackAcquisition {
                    details: "Caps without structure".to_string(),
                })?;
                let width = structure.get::<i32>("width").unwrap_or(0).max(0) as u32;
                let height = structure.get::<i32>("height").unwrap_or(0).max(0) as u32;
                (width, height, map.as_slice().to_vec())
            }
            FrameFormat::Rgba8 => {
                let info = VideoInfo::from_caps(caps).map_err(|e| CameraError::TrackAcquisition {
                    details: format!("Failed to get video info: {}", e),
                })?;
                let width = info.width();
                let height = info.height();
                let stride = info.stride()[0].max(0) as usize;
                let data = pack_rgba_rows(map.as_slice(), width, height, stride)?;
                (width, height, data)
            }
        };

        Ok(CaptureFrame::new(
            frame_id,
            SystemTime::now(),
            data,
            width,
            height,
            format,
        ))
    }

    async fn run_pipeline(
        pipeline: Pipeline,
        appsink: AppSink,
        feed: StreamFeed,
        format: FrameFormat,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    let _ = tx.send(sample);
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        let mut frame_id = 0u64;
        loop {
            tokio::select! {
                _ = feed.released() => break,
                sample = rx.recv() => {
                    let Some(sample) = sample else {
                        warn!("GStreamer sample channel closed for stream {}", feed.stream_id());
                        break;
                    };
                    match Self::sample_to_frame(&sample, frame_id, format) {
                        Ok(frame) => {
                            trace!(
                                "Captured frame {} ({}x{}) on stream {}",
                                frame_id, frame.width, frame.height, feed.stream_id()
                            );
                            if !feed.publish(frame) {
                                break;
                            }
                            frame_id += 1;
                        }
                        Err(e) => error!("Error processing GStreamer sample: {}", e),
                    }
                }
            }
        }

        let _ = pipeline.set_state(gstreamer::State::Null);
        info!("GStreamer pipeline for stream {} stopped", feed.stream_id());
    }
}

#[async_trait]
impl FrameSource for GstFrameSource {
    async fn acquire(&self, facing: Facing) -> Result<DeviceStream, CameraError> {
        let device_index = self.config.device_for(facing);
        let device_path = format!("/dev/video{}", device_index);

        if !Path::new(&device_path).exists() {
            return Err(CameraError::Unavailable {
                facing,
                details: format!("{} does not exist", device_path),
            });
        }

        let pipeline_desc = self.build_pipeline_string(device_index);
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Configuration {
                details: "Pipeline has no appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            // v4l2src fails to start when the device is busy or access is refused
            warn!("Failed to start {} for {} camera: {}", device_path, facing, e);
            return Err(CameraError::PermissionDenied { facing });
        }

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (stream, feed) = DeviceStream::open(id, facing, vec![Track::video(device_path.clone())]);

        tokio::spawn(Self::run_pipeline(pipeline, appsink, feed, self.frame_format()));

        info!("Acquired {} camera stream {} from {}", facing, id, device_path);
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "v4l2"
    }
}

/// Copy `height` rows of `width` RGBA pixels out of a buffer laid out with
/// `stride` bytes per row. Short buffers are an error, never a panic.
fn pack_rgba_rows(
    src: &[u8],
    width: u32,
    height: u32,
    stride: usize,
) -> Result<Vec<u8>, CameraError> {
    let row = width as usize * 4;
    let height = height as usize;
    let short_buffer = || CameraError::TrackAcquisition {
        details: format!(
            "Buffer of {} bytes is too short for {}x{} RGBA (stride {})",
            src.len(),
            width,
            height,
            stride
        ),
    };

    if stride == row {
        return src
            .get(..row * height)
            .map(|rows| rows.to_vec())
            .ok_or_else(short_buffer);
    }
    if stride < row {
        return Err(short_buffer());
    }

    let mut packed = Vec::with_capacity(row * height);
    for y in 0..height {
        let start = y * stride;
        let line = src.get(start..start + row).ok_or_else(short_buffer)?;
        packed.extend_from_slice(line);
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rgba_rows_strips_padding() {
        // 2x2 RGBA with 4 bytes of padding per row
        let mut src = Vec::new();
        for y in 0..2u8 {
            src.extend_from_slice(&[y; 8]);
            src.extend_from_slice(&[0xff; 4]);
        }
        let packed = pack_rgba_rows(&src, 2, 2, 12).unwrap();
        assert_eq!(packed, [[0u8; 8], [1u8; 8]].concat());
    }

    #[test]
    fn test_pack_rgba_rows_rejects_short_buffers() {
        let src = vec![0u8; 20];
        assert!(matches!(
            pack_rgba_rows(&src, 2, 3, 8),
            Err(CameraError::TrackAcquisition { .. })
        ));
        assert!(matches!(
            pack_rgba_rows(&src[..16], 2, 2, 12),
            Err(CameraError::TrackAcquisition { .. })
        ));
        assert!(matches!(
            pack_rgba_rows(&src, 4, 1, 8),
            Err(CameraError::TrackAcquisition { .. })
        ));
    }
}
