use super::*;
use crate::config::{DefaultOverlay, StorageConfig};
use crate::error::{CompositeError, SinkError};
use crate::events::{BoothEvent, ChangeKind, EventBus};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_storage_config(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        path: dir.path().to_string_lossy().to_string(),
        public_base_url: "http://booth.local:8080".to_string(),
        page_size: 12,
    }
}

fn encode(format: ImageFormat) -> Vec<u8> {
    let image = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 128]));
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    };
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

#[tokio::test]
async fn test_create_and_list_overlays() {
    let dir = TempDir::new().unwrap();
    let store = LocalOverlayStore::open(&create_test_storage_config(&dir))
        .await
        .unwrap();

    assert!(store.list().await.unwrap().is_empty());

    let first = store.create("Graduation", encode(ImageFormat::Png)).await.unwrap();
    let second = store.create("  Birthday ", encode(ImageFormat::Png)).await.unwrap();

    assert!(first.file_name.starts_with("twibbon-") && first.file_name.ends_with(".png"));
    assert_eq!(
        first.image_url,
        format!("http://booth.local:8080/overlays/{}", first.file_name)
    );
    assert_eq!(second.name, "Birthday");

    // newest first
    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);

    assert_eq!(store.get(first.id).await.unwrap(), Some(first.clone()));
    assert_eq!(store.get(999).await.unwrap(), None);

    let bytes = store.load(&first).await.unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
}

#[tokio::test]
async fn test_create_rejects_blank_name_and_bad_images() {
    let dir = TempDir::new().unwrap();
    let store = LocalOverlayStore::open(&create_test_storage_config(&dir))
        .await
        .unwrap();

    assert!(matches!(
        store.create("   ", encode(ImageFormat::Png)).await,
        Err(SinkError::InvalidAsset { .. })
    ));
    assert!(matches!(
        store.create("Empty", Vec::new()).await,
        Err(SinkError::EmptyAsset)
    ));
    assert!(matches!(
        store.create("Garbage", b"not an image".to_vec()).await,
        Err(SinkError::InvalidAsset { .. })
    ));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_png_upload_is_stored_as_png() {
    let dir = TempDir::new().unwrap();
    let store = LocalOverlayStore::open(&create_test_storage_config(&dir))
        .await
        .unwrap();

    let overlay = store.create("Jpeg", encode(ImageFormat::Jpeg)).await.unwrap();
    let bytes = store.load(&overlay).await.unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
}

#[tokio::test]
async fn test_update_replaces_image_file() {
    let dir = TempDir::new().unwrap();
    let store = LocalOverlayStore::open(&create_test_storage_config(&dir))
        .await
        .unwrap();

    let original = store.create("Old", encode(ImageFormat::Png)).await.unwrap();
    let renamed = store.update(original.id, Some("New"), None).await.unwrap();
    assert_eq!(renamed.name, "New");
    assert_eq!(renamed.file_name, original.file_name);

    let replaced = store
        .update(original.id, None, Some(encode(ImageFormat::Png)))
        .await
        .unwrap();
    assert_ne!(replaced.file_name, original.file_name);
    assert!(!store.dir().join(&original.file_name).exists());
    assert!(store.dir().join(&replaced.file_name).exists());

    assert!(matches!(
        store.update(42, Some("Missing"), None).await,
        Err(SinkError::NotFound { id: 42, .. })
    ));
    assert!(matches!(
        store.update(original.id, Some(""), None).await,
        Err(SinkError::InvalidAsset { .. })
    ));
}

#[tokio::test]
async fn test_delete_removes_record_and_file() {
    let dir = TempDir::new().unwrap();
    let bus = Arc::new(EventBus::new(16));
    let mut receiver = bus.subscribe();
    let store = LocalOverlayStore::open(&create_test_storage_config(&dir))
        .await
        .unwrap()
        .with_event_bus(Arc::clone(&bus));

    let overlay = store.create("Gone", encode(ImageFormat::Png)).await.unwrap();
    let deleted = store.delete(overlay.id).await.unwrap();
    assert_eq!(deleted.id, overlay.id);
    assert!(!store.dir().join(&overlay.file_name).exists());
    assert!(store.list().await.unwrap().is_empty());

    // deleted overlays can no longer be loaded
    assert!(matches!(
        store.load(&overlay).await,
        Err(CompositeError::OverlayLoad { .. })
    ));
    assert!(matches!(
        store.delete(overlay.id).await,
        Err(SinkError::NotFound { .. })
    ));

    let changes: Vec<ChangeKind> = std::iter::from_fn(|| receiver.try_recv().ok())
        .filter_map(|event| match event {
            BoothEvent::OverlaysChanged { change, .. } => Some(change),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![ChangeKind::Inserted, ChangeKind::Deleted]);
}

#[tokio::test]
async fn test_unsafe_file_names_are_not_loaded() {
    let dir = TempDir::new().unwrap();
    let store = LocalOverlayStore::open(&create_test_storage_config(&dir))
        .await
        .unwrap();

    let mut overlay = store.create("Ok", encode(ImageFormat::Png)).await.unwrap();
    overlay.file_name = "../overlays.json".to_string();
    assert!(store.file_path(&overlay.file_name).is_none());
    assert!(matches!(
        store.load(&overlay).await,
        Err(CompositeError::OverlayLoad { .. })
    ));
}

#[tokio::test]
async fn test_second_store_sees_changes() {
    let dir = TempDir::new().unwrap();
    let config = create_test_storage_config(&dir);
    let writer = LocalOverlayStore::open(&config).await.unwrap();
    let reader = LocalOverlayStore::open(&config).await.unwrap();

    writer.create("Shared", encode(ImageFormat::Png)).await.unwrap();
    assert_eq!(reader.list().await.unwrap().len(), 1);
}

#[test]
fn test_default_overlay_resolution() {
    let overlays = vec![Overlay {
        id: 7,
        name: "Newest".to_string(),
        image_url: "http://booth.local:8080/overlays/twibbon-1.png".to_string(),
        file_name: "twibbon-1.png".to_string(),
        created_at: chrono::Utc::now(),
    }];

    assert_eq!(DefaultOverlay::None.resolve(&overlays), OverlaySelection::None);
    assert_eq!(
        DefaultOverlay::First.resolve(&overlays),
        OverlaySelection::Overlay(7)
    );
    assert_eq!(DefaultOverlay::First.resolve(&[]), OverlaySelection::None);
}

#[test]
fn test_overlay_selection_conversions() {
    assert_eq!(OverlaySelection::default(), OverlaySelection::None);
    assert!(OverlaySelection::None.is_none());
    assert_eq!(OverlaySelection::from(Some(3)).overlay_id(), Some(3));
    assert_eq!(OverlaySelection::from(None).overlay_id(), None);
}

#[tokio::test]
async fn test_concurrent_writers_share_one_catalogue() {
    let dir = TempDir::new().unwrap();
    let config = create_test_storage_config(&dir);
    let booth = Arc::new(LocalOverlayStore::open(&config).await.unwrap());
    let admin = Arc::new(LocalOverlayStore::open(&config).await.unwrap());

    let creates: Vec<_> = (0..8)
        .map(|i| {
            let store = if i % 2 == 0 {
                Arc::clone(&booth)
            } else {
                Arc::clone(&admin)
            };
            tokio::spawn(async move {
                store
                    .create(&format!("Frame {}", i), encode(ImageFormat::Png))
                    .await
            })
        })
        .collect();
    for create in creates {
        create.await.unwrap().unwrap();
    }

    let overlays = admin.list().await.unwrap();
    assert_eq!(overlays.len(), 8);
    let mut ids: Vec<u64> = overlays.iter().map(|overlay| overlay.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
}
