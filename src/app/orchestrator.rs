use super::types::{ComponentState, ShutdownReason};
use crate::camera::{build_frame_source, FrameSource};
use crate::compositor::Compositor;
use crate::config::TwiboothConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use crate::overlay::{LocalOverlayStore, OverlayLoader, OverlayRegistry};
use crate::session::{CaptureSession, CaptureSessionBuilder};
use crate::storage::{AssetSink, GalleryFeed, LocalAssetStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(feature = "gallery")]
use crate::gallery::{GalleryServer, GalleryServerBuilder};

/// Wires the booth together: stores, compositor, capture session, gallery
/// feed and server, keyboard control
pub struct TwiboothOrchestrator {
    pub(super) config: TwiboothConfig,
    pub(super) event_bus: Arc<EventBus>,

    // Components
    pub(super) photos: Arc<LocalAssetStore>,
    pub(super) overlays: Arc<LocalOverlayStore>,
    pub(super) session: Arc<CaptureSession>,
    pub(super) feed: Arc<GalleryFeed>,
    #[cfg(feature = "gallery")]
    pub(super) gallery_server: Option<Arc<GalleryServer>>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl TwiboothOrchestrator {
    /// Create an orchestrator using the configured camera backend
    pub async fn new(config: TwiboothConfig) -> Result<Self> {
        let source = build_frame_source(&config.camera)?;
        Self::with_source(config, source).await
    }

    /// Create an orchestrator around an existing frame source
    pub async fn with_source(config: TwiboothConfig, source: Arc<dyn FrameSource>) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let photos = Arc::new(
            LocalAssetStore::open(&config.storage)
                .await?
                .with_event_bus(Arc::clone(&event_bus)),
        );
        let overlays = Arc::new(
            LocalOverlayStore::open(&config.storage)
                .await?
                .with_event_bus(Arc::clone(&event_bus)),
        );

        let compositor = Arc::new(Compositor::new(
            config.compositor.clone(),
            Arc::clone(&overlays) as Arc<dyn OverlayLoader>,
        ));

        let session = Arc::new(
            CaptureSessionBuilder::new()
                .source(source)
                .compositor(Arc::clone(&compositor))
                .overlays(Arc::clone(&overlays) as Arc<dyn OverlayRegistry>)
                .sink(Arc::clone(&photos) as Arc<dyn AssetSink>)
                .event_bus(Arc::clone(&event_bus))
                .config(config.session.clone())
                .ready_timeout(config.camera.ready_timeout())
                .build()?,
        );

        let feed = Arc::new(GalleryFeed::new(Arc::clone(&photos)));

        #[cfg(feature = "gallery")]
        let gallery_server = if config.gallery.enabled {
            Some(Arc::new(
                GalleryServerBuilder::new()
                    .config(config.gallery.clone())
                    .photos(Arc::clone(&photos))
                    .overlays(Arc::clone(&overlays))
                    .compositor(Arc::clone(&compositor))
                    .feed(Arc::clone(&feed))
                    .event_bus(Arc::clone(&event_bus))
                    .build()?,
            ))
        } else {
            None
        };

        let keyboard_handler = Some(KeyboardInputHandler::new(Arc::clone(&event_bus)));
        let keyboard_enabled = config.system.keyboard;

        info!(
            "Booth assembled: {:?} camera backend, photos in {}",
            config.camera.backend,
            photos.dir().display()
        );

        Ok(Self {
            config,
            event_bus,
            photos,
            overlays,
            session,
            feed,
            #[cfg(feature = "gallery")]
            gallery_server,
            keyboard_handler,
            keyboard_enabled,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Enable or disable terminal keyboard control
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn session(&self) -> Arc<CaptureSession> {
        Arc::clone(&self.session)
    }

    pub fn photos(&self) -> Arc<LocalAssetStore> {
        Arc::clone(&self.photos)
    }

    pub fn overlays(&self) -> Arc<LocalOverlayStore> {
        Arc::clone(&self.overlays)
    }

    pub fn feed(&self) -> Arc<GalleryFeed> {
        Arc::clone(&self.feed)
    }
}
