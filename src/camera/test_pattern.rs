use super::source::FrameSource;
use super::stream::{DeviceStream, StreamFeed, Track};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{CaptureFrame, Facing, FrameFormat};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

/// Left half of every test pattern frame
pub const PATTERN_LEFT: [u8; 4] = [220, 40, 40, 255];
/// Right half of every test pattern frame
pub const PATTERN_RIGHT: [u8; 4] = [40, 40, 220, 255];

/// Outcome of the simulated permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAccess {
    Granted,
    Denied,
    Unavailable,
}

/// Synthetic camera producing a split red/blue frame.
///
/// Keeps the streams it handed out until they are released, plus running
/// counts, so callers can check that no tracks leak.
pub struct TestPatternSource {
    resolution: (u32, u32),
    fps: u32,
    first_frame_delay: Duration,
    access: RwLock<SourceAccess>,
    next_stream_id: AtomicU64,
    streams: Mutex<Vec<DeviceStream>>,
    acquired: AtomicUsize,
    // released streams already dropped from `streams`
    pruned: AtomicUsize,
}

impl TestPatternSource {
    pub fn new(resolution: (u32, u32), fps: u32) -> Self {
        Self {
            resolution,
            fps: fps.max(1),
            first_frame_delay: Duration::ZERO,
            access: RwLock::new(SourceAccess::Granted),
            next_stream_id: AtomicU64::new(1),
            streams: Mutex::new(Vec::new()),
            acquired: AtomicUsize::new(0),
            pruned: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(config.resolution, config.fps)
    }

    /// Delay before the first frame (and therefore readiness)
    pub fn with_first_frame_delay(mut self, delay: Duration) -> Self {
        self.first_frame_delay = delay;
        self
    }

    pub fn set_access(&self, access: SourceAccess) {
        *self.access.write() = access;
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn released_count(&self) -> usize {
        let streams = self.streams.lock();
        self.pruned.load(Ordering::Acquire) + streams.iter().filter(|s| s.is_released()).count()
    }

    /// Number of stream handles still tracked
    pub fn tracked_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Streams that have not been released
    pub fn active_streams(&self) -> Vec<DeviceStream> {
        self.streams
            .lock()
            .iter()
            .filter(|s| !s.is_released())
            .cloned()
            .collect()
    }

    fn render_pattern(&self) -> Arc<Vec<u8>> {
        let (width, height) = self.resolution;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..height {
            for x in 0..width {
                let pixel = if x < width / 2 {
                    PATTERN_LEFT
                } else {
                    PATTERN_RIGHT
                };
                data.extend_from_slice(&pixel);
            }
        }
        Arc::new(data)
    }

    async fn run_producer(
        feed: StreamFeed,
        pattern: Arc<Vec<u8>>,
        resolution: (u32, u32),
        frame_interval: Duration,
        first_frame_delay: Duration,
    ) {
        if !first_frame_delay.is_zero() {
            tokio::select! {
                _ = feed.released() => return,
                _ = tokio::time::sleep(first_frame_delay) => {}
            }
        }

        let mut ticker = tokio::time::interval(frame_interval);
        let mut frame_id = 0u64;

        loop {
            tokio::select! {
                _ = feed.released() => break,
                _ = ticker.tick() => {
                    let frame = CaptureFrame {
                        id: frame_id,
                        captured_at: SystemTime::now(),
                        data: Arc::clone(&pattern),
                        width: resolution.0,
                        height: resolution.1,
                        format: FrameFormat::Rgba8,
                    };
                    if !feed.publish(frame) {
                        break;
                    }
                    trace!("Test pattern frame {} on stream {}", frame_id, feed.stream_id());
                    frame_id += 1;
                }
            }
        }

        debug!("Test pattern producer for stream {} stopped", feed.stream_id());
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn acquire(&self, facing: Facing) -> Result<DeviceStream, CameraError> {
        match *self.access.read() {
            SourceAccess::Granted => {}
            SourceAccess::Denied => return Err(CameraError::PermissionDenied { facing }),
            SourceAccess::Unavailable => {
                return Err(CameraError::Unavailable {
                    facing,
                    details: "test pattern device disabled".to_string(),
                })
            }
        }

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (stream, feed) = DeviceStream::open(
            id,
            facing,
            vec![Track::video(format!("test-pattern-{}", facing))],
        );

        tokio::spawn(Self::run_producer(
            feed,
            self.render_pattern(),
            self.resolution,
            Duration::from_micros(1_000_000 / self.fps as u64),
            self.first_frame_delay,
        ));

        {
            let mut streams = self.streams.lock();
            let before = streams.len();
            streams.retain(|s| !s.is_released());
            self.pruned.fetch_add(before - streams.len(), Ordering::AcqRel);
            streams.push(stream.clone());
            self.acquired.fetch_add(1, Ordering::AcqRel);
        }
        info!(
            "Acquired {} test pattern stream {} ({}x{})",
            facing, id, self.resolution.0, self.resolution.1
        );
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "test_pattern"
    }
}
