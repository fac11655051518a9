use crate::error::CameraError;
use crate::frame::{CaptureFrame, Facing};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One media track of a device stream
#[derive(Debug)]
pub struct Track {
    label: String,
    live: AtomicBool,
}

impl Track {
    pub fn video(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            live: AtomicBool::new(true),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn stop(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}

/// State shared between a stream handle and the backend feeding it
struct StreamShared {
    id: u64,
    facing: Facing,
    tracks: Vec<Track>,
    latest: RwLock<Option<CaptureFrame>>,
    dimensions: watch::Sender<Option<(u32, u32)>>,
    released: AtomicBool,
    cancel: CancellationToken,
}

/// Handle to a live capture feed.
///
/// The stream is ready once the backend has published its first frame and
/// therefore its dimensions. Releasing stops every track and signals the
/// backend to shut its producer down.
#[derive(Clone)]
pub struct DeviceStream {
    shared: Arc<StreamShared>,
}

/// Producer side of a [`DeviceStream`], held by the capture backend
#[derive(Clone)]
pub struct StreamFeed {
    shared: Arc<StreamShared>,
}

impl DeviceStream {
    /// Create a stream and the feed the backend pushes frames into
    pub fn open(id: u64, facing: Facing, tracks: Vec<Track>) -> (Self, StreamFeed) {
        let (dimensions, _) = watch::channel(None);
        let shared = Arc::new(StreamShared {
            id,
            facing,
            tracks,
            latest: RwLock::new(None),
            dimensions,
            released: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        (
            Self {
                shared: Arc::clone(&shared),
            },
            StreamFeed { shared },
        )
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn facing(&self) -> Facing {
        self.shared.facing
    }

    pub fn tracks(&self) -> &[Track] {
        &self.shared.tracks
    }

    pub fn live_track_count(&self) -> usize {
        self.shared.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Frame dimensions, available only once the stream is ready
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        *self.shared.dimensions.borrow()
    }

    pub fn is_ready(&self) -> bool {
        !self.is_released() && self.dimensions().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Wait until the stream reports its dimensions
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(u32, u32), CameraError> {
        if self.is_released() {
            return Err(CameraError::Released {
                stream_id: self.shared.id,
            });
        }

        let mut rx = self.shared.dimensions.subscribe();
        let cancel = self.shared.cancel.clone();
        let timeout_ms = timeout.as_millis() as u64;

        let wait = async {
            tokio::select! {
                ready = rx.wait_for(|dims| dims.is_some()) => {
                    ready.ok().and_then(|dims| *dims)
                }
                _ = cancel.cancelled() => None,
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(dims)) => Ok(dims),
            Ok(None) => Err(CameraError::Released {
                stream_id: self.shared.id,
            }),
            Err(_) => Err(CameraError::NotReady { timeout_ms }),
        }
    }

    /// Snapshot of the most recent frame
    pub fn snapshot(&self) -> Result<CaptureFrame, CameraError> {
        if self.is_released() {
            return Err(CameraError::Released {
                stream_id: self.shared.id,
            });
        }

        self.shared
            .latest
            .read()
            .clone()
            .ok_or(CameraError::NotReady { timeout_ms: 0 })
    }

    /// Stop every track. Returns false when the stream was already released.
    pub fn release(&self) -> bool {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            trace!("Stream {} already released", self.shared.id);
            return false;
        }

        let stopped = self.shared.tracks.iter().filter(|t| t.stop()).count();
        self.shared.cancel.cancel();
        self.shared.latest.write().take();

        debug!(
            "Released {} stream {} ({} track(s) stopped)",
            self.shared.facing, self.shared.id, stopped
        );
        true
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("id", &self.shared.id)
            .field("facing", &self.shared.facing)
            .field("dimensions", &self.dimensions())
            .field("released", &self.is_released())
            .finish()
    }
}

impl StreamFeed {
    pub fn stream_id(&self) -> u64 {
        self.shared.id
    }

    /// Publish a frame. The first frame marks the stream ready.
    /// Returns false once the stream has been released.
    pub fn publish(&self, frame: CaptureFrame) -> bool {
        if self.shared.released.load(Ordering::Acquire) {
            return false;
        }

        let dims = frame.dimensions();
        *self.shared.latest.write() = Some(frame);
        self.shared.dimensions.send_if_modified(|current| {
            if *current == Some(dims) {
                false
            } else {
                *current = Some(dims);
                true
            }
        });
        true
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Resolves when the consumer releases the stream
    pub async fn released(&self) {
        self.shared.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use std::time::SystemTime;

    fn frame(id: u64, width: u32, height: u32) -> CaptureFrame {
        CaptureFrame::new(
            id,
            SystemTime::now(),
            vec![0u8; (width * height * 4) as usize],
            width,
            height,
            FrameFormat::Rgba8,
        )
    }

    #[tokio::test]
    async fn test_stream_becomes_ready_on_first_frame() {
        let (stream, feed) = DeviceStream::open(1, Facing::Front, vec![Track::video("test")]);
        assert!(!stream.is_ready());
        assert!(stream.dimensions().is_none());
        assert!(stream.snapshot().is_err());

        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.wait_ready(Duration::from_secs(1)).await })
        };

        assert!(feed.publish(frame(0, 64, 36)));
        assert_eq!(waiter.await.unwrap().unwrap(), (64, 36));
        assert!(stream.is_ready());
        assert_eq!(stream.snapshot().unwrap().id, 0);
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let (stream, _feed) = DeviceStream::open(2, Facing::Back, vec![Track::video("test")]);
        let result = stream.wait_ready(Duration::from_millis(20)).await;
        assert_eq!(result, Err(CameraError::NotReady { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (stream, feed) = DeviceStream::open(3, Facing::Front, vec![Track::video("test")]);
        feed.publish(frame(0, 8, 8));
        assert_eq!(stream.live_track_count(), 1);

        assert!(stream.release());
        assert!(!stream.release());
        assert!(stream.is_released());
        assert_eq!(stream.live_track_count(), 0);
        assert!(!stream.is_ready());
        assert!(!feed.publish(frame(1, 8, 8)));
        assert_eq!(
            stream.snapshot().unwrap_err(),
            CameraError::Released { stream_id: 3 }
        );

        // the producer side observes the release
        tokio::time::timeout(Duration::from_millis(100), feed.released())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_interrupts_wait_ready() {
        let (stream, _feed) = DeviceStream::open(4, Facing::Front, vec![Track::video("test")]);
        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.wait_ready(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        stream.release();
        assert_eq!(
            waiter.await.unwrap(),
            Err(CameraError::Released { stream_id: 4 })
        );
    }
}
