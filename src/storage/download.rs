use super::photos::LocalAssetStore;
use crate::compositor::Compositor;
use crate::error::{Result, SinkError};
use crate::overlay::OverlayRegistry;
use tracing::{info, warn};

/// A photo prepared for download
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Whether the associated overlay was merged in
    pub merged: bool,
}

/// Load a photo and, when it references an existing overlay, merge that
/// overlay into it. A reference to a deleted overlay downloads the plain photo.
pub async fn prepare_download(
    photos: &LocalAssetStore,
    overlays: &dyn OverlayRegistry,
    compositor: &Compositor,
    photo_id: u64,
) -> Result<Download> {
    let photo = photos.get(photo_id).await?.ok_or(SinkError::NotFound {
        kind: "Photo",
        id: photo_id,
    })?;
    let bytes = photos.read(&photo).await?;

    let overlay = match photo.overlay_id {
        Some(overlay_id) => {
            let overlay = overlays.get(overlay_id).await?;
            if overlay.is_none() {
                warn!(
                    "Photo {} references missing overlay {}, downloading without it",
                    photo_id, overlay_id
                );
            }
            overlay
        }
        None => None,
    };

    let download = match overlay {
        Some(overlay) => Download {
            file_name: format!("twibbon-photo-{}.jpg", photo_id),
            bytes: compositor.merge_overlay(bytes, &overlay).await?,
            merged: true,
        },
        None => Download {
            file_name: format!("photo-{}.jpg", photo_id),
            bytes,
            merged: false,
        },
    };

    info!(
        "Prepared {} ({} bytes)",
        download.file_name,
        download.bytes.len()
    );
    Ok(download)
}
