use super::controller::CaptureSession;
use crate::camera::FrameSource;
use crate::compositor::Compositor;
use crate::config::{SessionConfig, TwiboothConfig};
use crate::error::{Result, TwiboothError};
use crate::events::EventBus;
use crate::overlay::OverlayRegistry;
use crate::storage::AssetSink;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`CaptureSession`]
pub struct CaptureSessionBuilder {
    source: Option<Arc<dyn FrameSource>>,
    compositor: Option<Arc<Compositor>>,
    overlays: Option<Arc<dyn OverlayRegistry>>,
    sink: Option<Arc<dyn AssetSink>>,
    event_bus: Option<Arc<EventBus>>,
    config: SessionConfig,
    ready_timeout: Duration,
}

impl CaptureSessionBuilder {
    pub fn new() -> Self {
        let defaults = TwiboothConfig::default();
        Self {
            source: None,
            compositor: None,
            overlays: None,
            sink: None,
            event_bus: None,
            config: defaults.session,
            ready_timeout: defaults.camera.ready_timeout(),
        }
    }

    pub fn source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn compositor(mut self, compositor: Arc<Compositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    pub fn overlays(mut self, overlays: Arc<dyn OverlayRegistry>) -> Self {
        self.overlays = Some(overlays);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AssetSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// How long `start` waits for the first frame
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CaptureSession> {
        let missing = |what: &str| {
            TwiboothError::component("capture_session".to_string(), format!("{} must be specified", what))
        };

        Ok(CaptureSession::new(
            self.source.ok_or_else(|| missing("Frame source"))?,
            self.compositor.ok_or_else(|| missing("Compositor"))?,
            self.overlays.ok_or_else(|| missing("Overlay registry"))?,
            self.sink.ok_or_else(|| missing("Asset sink"))?,
            self.event_bus.ok_or_else(|| missing("Event bus"))?,
            self.config,
            self.ready_timeout,
        ))
    }
}

impl Default for CaptureSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
