use crate::{
    compositor::Compositor,
    config::GalleryConfig,
    error::{GalleryError, Result, TwiboothError},
    events::EventBus,
    overlay::LocalOverlayStore,
    storage::{GalleryFeed, LocalAssetStore},
};
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::handlers::{
    all_photos_handler, delete_photo_handler, download_photo_handler, feed_handler,
    feed_more_handler, health_handler, list_overlays_handler, list_photos_handler,
    overlay_file_handler, photo_file_handler, set_photo_overlay_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct GalleryState {
    pub(crate) photos: Arc<LocalAssetStore>,
    pub(crate) overlays: Arc<LocalOverlayStore>,
    pub(crate) compositor: Arc<Compositor>,
    pub(crate) feed: Arc<GalleryFeed>,
    pub(crate) event_bus: Arc<EventBus>,
}

/// HTTP server for browsing, re-framing and downloading stored photos
pub struct GalleryServer {
    pub(crate) config: GalleryConfig,
    pub(crate) state: GalleryState,
}

impl GalleryServer {
    pub fn new(config: GalleryConfig, state: GalleryState) -> Self {
        Self { config, state }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// All gallery routes bound to the server state
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/photos", get(list_photos_handler))
            .route("/api/photos/all", get(all_photos_handler))
            .route("/api/photos/:id", delete(delete_photo_handler))
            .route("/api/photos/:id/download", get(download_photo_handler))
            .route("/api/photos/:id/overlay", put(set_photo_overlay_handler))
            .route("/api/overlays", get(list_overlays_handler))
            .route("/api/feed", get(feed_handler))
            .route("/api/feed/more", post(feed_more_handler))
            .route("/photos/:file", get(photo_file_handler))
            .route("/overlays/:file", get(overlay_file_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until the token is cancelled
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let app = self.router();
        let addr = self.address();

        info!("Starting gallery server on {}", addr);

        let listener =
            tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| GalleryError::BindFailed {
                    address: addr.clone(),
                    source: e,
                })?;

        info!("Gallery server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| GalleryError::StartupFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("Gallery server stopped");
        Ok(())
    }
}

/// Gallery server builder
pub struct GalleryServerBuilder {
    config: Option<GalleryConfig>,
    photos: Option<Arc<LocalAssetStore>>,
    overlays: Option<Arc<LocalOverlayStore>>,
    compositor: Option<Arc<Compositor>>,
    feed: Option<Arc<GalleryFeed>>,
    event_bus: Option<Arc<EventBus>>,
}

impl GalleryServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            photos: None,
            overlays: None,
            compositor: None,
            feed: None,
            event_bus: None,
        }
    }

    pub fn config(mut self, config: GalleryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn photos(mut self, photos: Arc<LocalAssetStore>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub fn overlays(mut self, overlays: Arc<LocalOverlayStore>) -> Self {
        self.overlays = Some(overlays);
        self
    }

    /// Used to merge overlays into downloads
    pub fn compositor(mut self, compositor: Arc<Compositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    /// Shared feed; a fresh one over the photo store is created when unset
    pub fn feed(mut self, feed: Arc<GalleryFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<GalleryServer> {
        let missing = |what: &str| {
            TwiboothError::Gallery(GalleryError::StartupFailed {
                details: format!("{} is required", what),
            })
        };

        let config = self.config.ok_or_else(|| missing("Gallery configuration"))?;
        let photos = self.photos.ok_or_else(|| missing("Photo store"))?;
        let overlays = self.overlays.ok_or_else(|| missing("Overlay store"))?;
        let compositor = self.compositor.ok_or_else(|| missing("Compositor"))?;
        let event_bus = self.event_bus.ok_or_else(|| missing("Event bus"))?;
        let feed = self
            .feed
            .unwrap_or_else(|| Arc::new(GalleryFeed::new(Arc::clone(&photos))));

        Ok(GalleryServer::new(
            config,
            GalleryState {
                photos,
                overlays,
                compositor,
                feed,
                event_bus,
            },
        ))
    }
}

impl Default for GalleryServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
