use super::model::Overlay;
use crate::error::{CompositeError, SinkError};
use async_trait::async_trait;

/// Read side of the overlay catalogue
#[async_trait]
pub trait OverlayRegistry: Send + Sync {
    /// All overlays, newest first. May be empty.
    async fn list(&self) -> Result<Vec<Overlay>, SinkError>;

    async fn get(&self, id: u64) -> Result<Option<Overlay>, SinkError> {
        Ok(self.list().await?.into_iter().find(|overlay| overlay.id == id))
    }
}

/// Resolves an overlay's image to encoded bytes
#[async_trait]
pub trait OverlayLoader: Send + Sync {
    async fn load(&self, overlay: &Overlay) -> Result<Vec<u8>, CompositeError>;
}
