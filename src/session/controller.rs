use super::state::{CaptureOutcome, CaptureState, DeviceState, SessionStats, SkipReason};
use crate::camera::{DeviceStream, FrameSource};
use crate::compositor::Compositor;
use crate::config::SessionConfig;
use crate::error::{CameraError, Result, SinkError};
use crate::events::{BoothEvent, EventBus, NoticeLevel};
use crate::frame::Facing;
use crate::overlay::{OverlayRegistry, OverlaySelection};
use crate::storage::{AssetSink, StoredAsset};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// The one device stream a session may hold
struct DeviceSlot {
    facing: Facing,
    stream: Option<DeviceStream>,
}

/// Held while a capture is composited and stored
struct CaptureLatch<'a>(&'a AtomicBool);

impl<'a> CaptureLatch<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CaptureLatch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cosmetic flash; independent of the capture latch
#[derive(Default)]
struct Flash {
    generation: AtomicU64,
    active: AtomicBool,
}

/// Drives one booth: owns the device stream, the overlay selection and the
/// capture pipeline. Every failure ends up as a notice on the event bus.
pub struct CaptureSession {
    source: Arc<dyn FrameSource>,
    compositor: Arc<Compositor>,
    overlays: Arc<dyn OverlayRegistry>,
    sink: Arc<dyn AssetSink>,
    event_bus: Arc<EventBus>,
    config: SessionConfig,
    ready_timeout: Duration,

    device: AsyncMutex<DeviceSlot>,
    device_state: RwLock<DeviceState>,
    // set by teardown under the device lock; no stream is acquired after it
    closed: AtomicBool,
    capturing: AtomicBool,
    selection: RwLock<OverlaySelection>,
    flash: Arc<Flash>,
    stats: Mutex<SessionStats>,
}

impl CaptureSession {
    pub(super) fn new(
        source: Arc<dyn FrameSource>,
        compositor: Arc<Compositor>,
        overlays: Arc<dyn OverlayRegistry>,
        sink: Arc<dyn AssetSink>,
        event_bus: Arc<EventBus>,
        config: SessionConfig,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            source,
            compositor,
            overlays,
            sink,
            event_bus,
            device: AsyncMutex::new(DeviceSlot {
                facing: config.default_facing,
                stream: None,
            }),
            config,
            ready_timeout,
            device_state: RwLock::new(DeviceState::NoDevice),
            closed: AtomicBool::new(false),
            capturing: AtomicBool::new(false),
            selection: RwLock::new(OverlaySelection::None),
            flash: Arc::new(Flash::default()),
            stats: Mutex::new(SessionStats::default()),
        }
    }

    pub fn device_state(&self) -> DeviceState {
        *self.device_state.read()
    }

    pub fn capture_state(&self) -> CaptureState {
        if self.capturing.load(Ordering::Acquire) {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        }
    }

    pub fn selection(&self) -> OverlaySelection {
        *self.selection.read()
    }

    pub fn is_flashing(&self) -> bool {
        self.flash.active.load(Ordering::Acquire)
    }

    /// True once `teardown` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Facing of the current (or next) stream
    pub async fn facing(&self) -> Facing {
        self.device.lock().await.facing
    }

    /// Dimensions of the held stream, once ready
    pub async fn stream_dimensions(&self) -> Option<(u32, u32)> {
        self.device
            .lock()
            .await
            .stream
            .as_ref()
            .and_then(|stream| stream.dimensions())
    }

    /// Release any held stream and acquire one for the current facing
    pub async fn start(&self) -> std::result::Result<(u32, u32), CameraError> {
        let mut slot = self.device.lock().await;
        let facing = slot.facing;
        self.acquire_into(&mut slot, facing).await
    }

    /// Flip front/back and restart the device
    pub async fn switch_facing(&self) -> std::result::Result<(u32, u32), CameraError> {
        let mut slot = self.device.lock().await;
        // a switch queued behind teardown must not reopen the camera
        if self.is_closed() {
            debug!("Ignoring camera switch after teardown");
            return Err(CameraError::SessionClosed);
        }
        let facing = slot.facing.toggled();
        slot.facing = facing;
        info!("Switching to {} camera", facing);
        self.acquire_into(&mut slot, facing).await
    }

    /// Release the stream unconditionally. Final: later starts and
    /// switches fail with `SessionClosed`.
    pub async fn teardown(&self) {
        let mut slot = self.device.lock().await;
        self.closed.store(true, Ordering::Release);
        if let Some(stream) = slot.stream.take() {
            self.source.release(&stream);
        }
        let facing = slot.facing;
        self.set_device_state(DeviceState::NoDevice, facing).await;
        info!("Capture session torn down");
    }

    /// Choose the overlay for the next capture. Unknown ids are rejected.
    pub async fn select_overlay(
        &self,
        selection: OverlaySelection,
    ) -> std::result::Result<OverlaySelection, SinkError> {
        if let OverlaySelection::Overlay(id) = selection {
            if self.overlays.get(id).await?.is_none() {
                return Err(SinkError::NotFound { kind: "Overlay", id });
            }
        }

        *self.selection.write() = selection;
        debug!("Overlay selection: {:?}", selection);
        Ok(selection)
    }

    /// Select by catalogue position (newest first); `None` clears the overlay
    pub async fn select_overlay_at(
        &self,
        position: Option<usize>,
    ) -> std::result::Result<OverlaySelection, SinkError> {
        let selection = match position {
            None => OverlaySelection::None,
            Some(position) => {
                let overlays = self.overlays.list().await?;
                let overlay = overlays.get(position).ok_or(SinkError::NotFound {
                    kind: "Overlay position",
                    id: position as u64,
                })?;
                OverlaySelection::Overlay(overlay.id)
            }
        };
        self.select_overlay(selection).await
    }

    /// Apply `session.default_overlay` against the current catalogue
    pub async fn apply_default_overlay(&self) -> std::result::Result<OverlaySelection, SinkError> {
        let overlays = self.overlays.list().await?;
        let selection = self.config.default_overlay.resolve(&overlays);
        *self.selection.write() = selection;
        info!("Default overlay: {:?}", selection);
        Ok(selection)
    }

    /// Take a photo. A no-op while the device is not ready or another
    /// capture is in flight; returns to Idle on success and failure alike.
    pub async fn capture(&self) -> CaptureOutcome {
        if self.device_state() != DeviceState::Ready {
            return self.skip(SkipReason::NotReady);
        }
        let Some(_latch) = CaptureLatch::try_acquire(&self.capturing) else {
            return self.skip(SkipReason::CaptureInFlight);
        };

        // Flash runs on its own timer, independent of how long storing takes
        let generation = self.start_flash().await;
        let result = self.run_capture().await;
        self.schedule_flash_end(generation);

        match result {
            Ok(asset) => {
                self.stats.lock().captures_saved += 1;
                self.notice(
                    NoticeLevel::Info,
                    "Photo Captured!",
                    "Your photo has been saved.".to_string(),
                )
                .await;
                CaptureOutcome::Saved(asset)
            }
            Err(e) => {
                self.stats.lock().captures_failed += 1;
                self.notice(NoticeLevel::Error, "Capture Failed", e.to_string())
                    .await;
                CaptureOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run_capture(&self) -> Result<StoredAsset> {
        // a switch in progress holds the slot
        let stream = match self.device.try_lock() {
            Ok(slot) => slot.stream.clone(),
            Err(_) => None,
        }
        .ok_or(CameraError::NotReady { timeout_ms: 0 })?;

        let facing = stream.facing();
        let frame = stream.snapshot()?;

        let overlay = match self.selection() {
            OverlaySelection::None => None,
            OverlaySelection::Overlay(id) => {
                let overlay = self.overlays.get(id).await?;
                if overlay.is_none() {
                    warn!("Selected overlay {} no longer exists, capturing without it", id);
                    *self.selection.write() = OverlaySelection::None;
                }
                overlay
            }
        };

        let result = self
            .compositor
            .composite(frame, facing, overlay.as_ref())
            .await?;
        let asset = self.sink.submit(result.bytes, result.overlay_id).await?;

        self.event_bus
            .notify(BoothEvent::PhotoCaptured {
                photo_id: asset.id,
                url: asset.url.clone(),
                overlay_id: result.overlay_id,
            })
            .await;
        Ok(asset)
    }

    async fn acquire_into(
        &self,
        slot: &mut DeviceSlot,
        facing: Facing,
    ) -> std::result::Result<(u32, u32), CameraError> {
        if self.is_closed() {
            return Err(CameraError::SessionClosed);
        }
        // Never hold two streams at once
        if let Some(previous) = slot.stream.take() {
            self.source.release(&previous);
        }
        self.set_device_state(DeviceState::Acquiring, facing).await;
        self.stats.lock().acquisitions += 1;

        let acquired = match self.source.acquire(facing).await {
            Ok(stream) => match stream.wait_ready(self.ready_timeout).await {
                Ok(dimensions) => Ok((stream, dimensions)),
                // a stream that never got ready is released, not kept
                Err(e) => {
                    self.source.release(&stream);
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match acquired {
            Ok((stream, (width, height))) => {
                info!(
                    "{} camera ready ({}x{}, stream {})",
                    facing,
                    width,
                    height,
                    stream.id()
                );
                slot.stream = Some(stream);
                self.set_device_state(DeviceState::Ready, facing).await;
                Ok((width, height))
            }
            Err(e) => {
                self.stats.lock().acquisition_failures += 1;
                self.set_device_state(DeviceState::NoDevice, facing).await;
                self.notice(NoticeLevel::Error, "Camera Error", e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn set_device_state(&self, state: DeviceState, facing: Facing) {
        let previous = std::mem::replace(&mut *self.device_state.write(), state);
        if previous != state {
            debug!("Device state {:?} -> {:?}", previous, state);
            self.event_bus
                .notify(BoothEvent::DeviceStateChanged {
                    state: state.as_str().to_string(),
                    facing,
                })
                .await;
        }
    }

    async fn start_flash(&self) -> u64 {
        let generation = self.flash.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.flash.active.store(true, Ordering::Release);
        self.event_bus
            .notify(BoothEvent::FlashStarted {
                timestamp: SystemTime::now(),
            })
            .await;
        generation
    }

    /// End the flash after the configured duration unless a newer one started
    fn schedule_flash_end(&self, generation: u64) {
        let flash = Arc::clone(&self.flash);
        let event_bus = Arc::clone(&self.event_bus);
        let duration = self.config.flash_duration();

        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if flash.generation.load(Ordering::Acquire) == generation {
                flash.active.store(false, Ordering::Release);
                event_bus
                    .notify(BoothEvent::FlashEnded {
                        timestamp: SystemTime::now(),
                    })
                    .await;
            }
        });
    }

    fn skip(&self, reason: SkipReason) -> CaptureOutcome {
        debug!("Capture skipped: {:?}", reason);
        self.stats.lock().captures_skipped += 1;
        CaptureOutcome::Skipped(reason)
    }

    async fn notice(&self, level: NoticeLevel, title: &str, message: String) {
        self.event_bus
            .notify(BoothEvent::Notice {
                level,
                title: title.to_string(),
                message,
            })
            .await;
    }
}
