use super::model::Overlay;
use super::registry::{OverlayLoader, OverlayRegistry};
use crate::config::StorageConfig;
use crate::error::{CompositeError, SinkError};
use crate::events::{BoothEvent, ChangeKind, EventBus};
use crate::storage::files::{ensure_dir, is_safe_file_name, public_url, unique_file_name, write_atomic};
use crate::storage::index::JsonIndex;
use async_trait::async_trait;
use chrono::Utc;
use image::ImageFormat;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const OVERLAY_FOLDER: &str = "overlays";
const OVERLAY_PREFIX: &str = "twibbon";

/// Overlay catalogue kept on local disk: PNG files plus a JSON index
pub struct LocalOverlayStore {
    dir: PathBuf,
    base_url: String,
    index: JsonIndex<Overlay>,
    write_lock: Mutex<()>,
    event_bus: Option<Arc<EventBus>>,
}

impl LocalOverlayStore {
    /// Open (creating if needed) the overlay folder below `storage.path`
    pub async fn open(config: &StorageConfig) -> Result<Self, SinkError> {
        let root = PathBuf::from(&config.path);
        let dir = root.join(OVERLAY_FOLDER);
        ensure_dir(&dir).await?;

        info!("Overlay store at {}", dir.display());
        Ok(Self {
            dir,
            base_url: config.public_base_url.clone(),
            index: JsonIndex::new(root.join("overlays.json")),
            write_lock: Mutex::new(()),
            event_bus: None,
        })
    }

    /// Publish `OverlaysChanged` on every mutation
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a stored overlay file, if the name is acceptable
    pub fn file_path(&self, file_name: &str) -> Option<PathBuf> {
        is_safe_file_name(file_name).then(|| self.dir.join(file_name))
    }

    pub async fn create(&self, name: &str, image: Vec<u8>) -> Result<Overlay, SinkError> {
        let name = validate_name(name)?;
        let png = normalize_png(image).await?;

        let _guard = self.write_lock.lock().await;
        let _index_lock = self.index.lock().await?;
        let mut document = self.index.load().await?;

        let file_name = self.write_image(&png).await?;
        let overlay = Overlay {
            id: document.allocate_id(),
            name,
            image_url: public_url(&self.base_url, OVERLAY_FOLDER, &file_name),
            file_name,
            created_at: Utc::now(),
        };
        document.records.push(overlay.clone());

        if let Err(e) = self.index.save(&document).await {
            self.remove_file(&overlay.file_name).await;
            return Err(e);
        }

        info!("Created overlay {} '{}'", overlay.id, overlay.name);
        self.notify(ChangeKind::Inserted, overlay.id).await;
        Ok(overlay)
    }

    /// Rename and/or replace the image of an overlay
    pub async fn update(
        &self,
        id: u64,
        name: Option<&str>,
        image: Option<Vec<u8>>,
    ) -> Result<Overlay, SinkError> {
        let name = name.map(validate_name).transpose()?;
        let png = match image {
            Some(image) => Some(normalize_png(image).await?),
            None => None,
        };

        let _guard = self.write_lock.lock().await;
        let _index_lock = self.index.lock().await?;
        let mut document = self.index.load().await?;
        let position = document
            .records
            .iter()
            .position(|overlay| overlay.id == id)
            .ok_or(SinkError::NotFound { kind: "Overlay", id })?;

        let mut replaced_file = None;
        let mut updated = document.records[position].clone();
        if let Some(name) = name {
            updated.name = name;
        }
        if let Some(png) = png {
            let file_name = self.write_image(&png).await?;
            updated.image_url = public_url(&self.base_url, OVERLAY_FOLDER, &file_name);
            replaced_file = Some(std::mem::replace(&mut updated.file_name, file_name));
        }
        document.records[position] = updated.clone();

        if let Err(e) = self.index.save(&document).await {
            if replaced_file.is_some() {
                self.remove_file(&updated.file_name).await;
            }
            return Err(e);
        }
        if let Some(old_file) = replaced_file {
            self.remove_file(&old_file).await;
        }

        info!("Updated overlay {} '{}'", updated.id, updated.name);
        self.notify(ChangeKind::Updated, id).await;
        Ok(updated)
    }

    /// Remove the overlay record and its image. Photos keep their reference.
    pub async fn delete(&self, id: u64) -> Result<Overlay, SinkError> {
        let _guard = self.write_lock.lock().await;
        let _index_lock = self.index.lock().await?;
        let mut document = self.index.load().await?;
        let position = document
            .records
            .iter()
            .position(|overlay| overlay.id == id)
            .ok_or(SinkError::NotFound { kind: "Overlay", id })?;

        let overlay = document.records.remove(position);
        self.index.save(&document).await?;
        self.remove_file(&overlay.file_name).await;

        info!("Deleted overlay {} '{}'", overlay.id, overlay.name);
        self.notify(ChangeKind::Deleted, id).await;
        Ok(overlay)
    }

    async fn write_image(&self, png: &[u8]) -> Result<String, SinkError> {
        let file_name = unique_file_name(&self.dir, OVERLAY_PREFIX, "png").await;
        write_atomic(&self.dir.join(&file_name), png).await?;
        debug!("Wrote overlay image {} ({} bytes)", file_name, png.len());
        Ok(file_name)
    }

    async fn remove_file(&self, file_name: &str) {
        let path = self.dir.join(file_name);
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove overlay file {}: {}", path.display(), e);
        }
    }

    async fn notify(&self, change: ChangeKind, overlay_id: u64) {
        if let Some(event_bus) = &self.event_bus {
            event_bus
                .notify(BoothEvent::OverlaysChanged { change, overlay_id })
                .await;
        }
    }
}

#[async_trait]
impl OverlayRegistry for LocalOverlayStore {
    async fn list(&self) -> Result<Vec<Overlay>, SinkError> {
        let mut overlays = self.index.load().await?.records;
        overlays.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(overlays)
    }
}

#[async_trait]
impl OverlayLoader for LocalOverlayStore {
    async fn load(&self, overlay: &Overlay) -> Result<Vec<u8>, CompositeError> {
        let path = self
            .file_path(&overlay.file_name)
            .ok_or_else(|| CompositeError::OverlayLoad {
                overlay_id: overlay.id,
                details: format!("invalid file name '{}'", overlay.file_name),
            })?;

        fs::read(&path)
            .await
            .map_err(|e| CompositeError::OverlayLoad {
                overlay_id: overlay.id,
                details: format!("{}: {}", path.display(), e),
            })
    }
}

fn validate_name(name: &str) -> Result<String, SinkError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SinkError::InvalidAsset {
            details: "overlay name must not be empty".to_string(),
        });
    }
    Ok(name.to_string())
}

/// Accept any decodable image and store it as PNG
async fn normalize_png(image: Vec<u8>) -> Result<Vec<u8>, SinkError> {
    if image.is_empty() {
        return Err(SinkError::EmptyAsset);
    }
    if matches!(image::guess_format(&image), Ok(ImageFormat::Png)) {
        return Ok(image);
    }

    tokio::task::spawn_blocking(move || {
        let decoded = image::load_from_memory(&image).map_err(|e| SinkError::InvalidAsset {
            details: format!("overlay is not a supported image: {}", e),
        })?;
        let mut png = Vec::new();
        decoded
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| SinkError::InvalidAsset {
                details: format!("failed to convert overlay to PNG: {}", e),
            })?;
        Ok(png)
    })
    .await
    .map_err(|e| SinkError::InvalidAsset {
        details: format!("overlay conversion task failed: {}", e),
    })?
}
