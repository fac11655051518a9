use super::files::{ensure_dir, is_safe_file_name, public_url, unique_file_name, write_atomic};
use super::index::JsonIndex;
use crate::config::StorageConfig;
use crate::error::SinkError;
use crate::events::{BoothEvent, ChangeKind, EventBus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PHOTO_FOLDER: &str = "photos";
const PHOTO_PREFIX: &str = "photo";

/// Receipt for a submitted image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub id: u64,
    pub url: String,
}

/// Destination for composited captures
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Persist an encoded JPEG together with the overlay it was made with
    async fn submit(&self, bytes: Vec<u8>, overlay_id: Option<u64>)
        -> Result<StoredAsset, SinkError>;
}

/// Photo record as kept in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPhoto {
    pub id: u64,
    pub url: String,
    pub file_name: String,
    pub overlay_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// One slice of a newest-first listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: usize,
    pub has_more: bool,
}

/// Photo collection on local disk: JPEG files plus a JSON index
pub struct LocalAssetStore {
    dir: PathBuf,
    base_url: String,
    page_size: usize,
    index: JsonIndex<StoredPhoto>,
    write_lock: Mutex<()>,
    event_bus: Option<Arc<EventBus>>,
}

impl LocalAssetStore {
    /// Open (creating if needed) the photo folder below `storage.path`
    pub async fn open(config: &StorageConfig) -> Result<Self, SinkError> {
        let root = PathBuf::from(&config.path);
        let dir = root.join(PHOTO_FOLDER);
        ensure_dir(&dir).await?;

        info!("Photo store at {}", dir.display());
        Ok(Self {
            dir,
            base_url: config.public_base_url.clone(),
            page_size: config.page_size.max(1),
            index: JsonIndex::new(root.join("photos.json")),
            write_lock: Mutex::new(()),
            event_bus: None,
        })
    }

    /// Publish `PhotosChanged` on every mutation
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Path of a stored photo file, if the name is acceptable
    pub fn file_path(&self, file_name: &str) -> Option<PathBuf> {
        is_safe_file_name(file_name).then(|| self.dir.join(file_name))
    }

    pub async fn get(&self, id: u64) -> Result<Option<StoredPhoto>, SinkError> {
        Ok(self
            .index
            .load()
            .await?
            .records
            .into_iter()
            .find(|photo| photo.id == id))
    }

    /// All photos, newest first
    pub async fn list_all(&self) -> Result<Vec<StoredPhoto>, SinkError> {
        let mut photos = self.index.load().await?.records;
        photos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(photos)
    }

    /// `limit` photos starting at `offset`, newest first
    pub async fn list_page(&self, offset: usize, limit: usize) -> Result<Page<StoredPhoto>, SinkError> {
        let photos = self.list_all().await?;
        let total = photos.len();
        let items: Vec<StoredPhoto> = photos.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + items.len() < total;

        debug!(
            "Listed photos {}..{} of {}",
            offset,
            offset + items.len(),
            total
        );
        Ok(Page {
            items,
            offset,
            has_more,
        })
    }

    /// Re-associate a photo with another overlay (or none)
    pub async fn update_overlay(
        &self,
        id: u64,
        overlay_id: Option<u64>,
    ) -> Result<StoredPhoto, SinkError> {
        let _guard = self.write_lock.lock().await;
        let _index_lock = self.index.lock().await?;
        let mut document = self.index.load().await?;
        let photo = document
            .records
            .iter_mut()
            .find(|photo| photo.id == id)
            .ok_or(SinkError::NotFound { kind: "Photo", id })?;

        photo.overlay_id = overlay_id;
        let updated = photo.clone();
        self.index.save(&document).await?;

        info!("Photo {} now uses overlay {:?}", id, overlay_id);
        self.notify(ChangeKind::Updated, id).await;
        Ok(updated)
    }

    /// Remove the record and its file. A file that is already gone is only logged.
    pub async fn delete(&self, id: u64) -> Result<StoredPhoto, SinkError> {
        let _guard = self.write_lock.lock().await;
        let _index_lock = self.index.lock().await?;
        let mut document = self.index.load().await?;
        let position = document
            .records
            .iter()
            .position(|photo| photo.id == id)
            .ok_or(SinkError::NotFound { kind: "Photo", id })?;

        let photo = document.records.remove(position);
        self.index.save(&document).await?;

        let path = self.dir.join(&photo.file_name);
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove photo file {}: {}", path.display(), e);
        }

        info!("Deleted photo {} ({})", photo.id, photo.file_name);
        self.notify(ChangeKind::Deleted, id).await;
        Ok(photo)
    }

    /// Encoded bytes of a stored photo
    pub async fn read(&self, photo: &StoredPhoto) -> Result<Vec<u8>, SinkError> {
        let path = self.file_path(&photo.file_name).ok_or_else(|| SinkError::InvalidAsset {
            details: format!("invalid file name '{}'", photo.file_name),
        })?;
        fs::read(&path).await.map_err(|e| SinkError::io(&path, e))
    }

    async fn notify(&self, change: ChangeKind, photo_id: u64) {
        if let Some(event_bus) = &self.event_bus {
            event_bus
                .notify(BoothEvent::PhotosChanged { change, photo_id })
                .await;
        }
    }
}

#[async_trait]
impl AssetSink for LocalAssetStore {
    async fn submit(
        &self,
        bytes: Vec<u8>,
        overlay_id: Option<u64>,
    ) -> Result<StoredAsset, SinkError> {
        if bytes.is_empty() {
            return Err(SinkError::EmptyAsset);
        }
        if !matches!(image::guess_format(&bytes), Ok(ImageFormat::Jpeg)) {
            return Err(SinkError::InvalidAsset {
                details: "photos must be JPEG encoded".to_string(),
            });
        }

        let _guard = self.write_lock.lock().await;
        // boothctl may be writing the same index; hold the file lock until saved
        let _index_lock = self.index.lock().await?;
        let mut document = self.index.load().await?;

        let file_name = unique_file_name(&self.dir, PHOTO_PREFIX, "jpg").await;
        let path = self.dir.join(&file_name);
        write_atomic(&path, &bytes).await?;

        let photo = StoredPhoto {
            id: document.allocate_id(),
            url: public_url(&self.base_url, PHOTO_FOLDER, &file_name),
            file_name,
            overlay_id,
            created_at: Utc::now(),
        };
        document.records.push(photo.clone());

        if let Err(e) = self.index.save(&document).await {
            if let Err(remove_err) = fs::remove_file(&path).await {
                warn!("Failed to clean up {}: {}", path.display(), remove_err);
            }
            return Err(e);
        }

        info!(
            "Stored photo {} as {} ({} bytes)",
            photo.id,
            photo.file_name,
            bytes.len()
        );
        self.notify(ChangeKind::Inserted, photo.id).await;

        Ok(StoredAsset {
            id: photo.id,
            url: photo.url,
        })
    }
}
