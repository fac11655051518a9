use super::*;
use crate::compositor::Compositor;
use crate::config::{StorageConfig, TwiboothConfig};
use crate::error::{SinkError, TwiboothError};
use crate::events::{BoothEvent, ChangeKind, EventBus};
use crate::overlay::{LocalOverlayStore, OverlayRegistry};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn create_test_storage_config(dir: &TempDir, page_size: usize) -> StorageConfig {
    StorageConfig {
        path: dir.path().to_string_lossy().to_string(),
        public_base_url: "http://booth.local:8080/".to_string(),
        page_size,
    }
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let rgb = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([200, 30, 30, 255]),
    ))
    .to_rgb8();
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}

fn overlay_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(9, 16, Rgba([0, 255, 0, 255])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

async fn open_store(dir: &TempDir, page_size: usize) -> LocalAssetStore {
    LocalAssetStore::open(&create_test_storage_config(dir, page_size))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_submit_stores_file_and_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 12).await;

    let asset = store.submit(jpeg(18, 32), Some(3)).await.unwrap();
    let photo = store.get(asset.id).await.unwrap().unwrap();

    assert!(photo.file_name.starts_with("photo-") && photo.file_name.ends_with(".jpg"));
    assert_eq!(
        asset.url,
        format!("http://booth.local:8080/photos/{}", photo.file_name)
    );
    assert_eq!(photo.url, asset.url);
    assert_eq!(photo.overlay_id, Some(3));
    assert!(store.dir().join(&photo.file_name).exists());
    assert_eq!(store.read(&photo).await.unwrap(), jpeg(18, 32));
}

#[tokio::test]
async fn test_submit_rejects_empty_and_non_jpeg() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 12).await;

    assert!(matches!(
        store.submit(Vec::new(), None).await,
        Err(SinkError::EmptyAsset)
    ));
    assert!(matches!(
        store.submit(overlay_png(), None).await,
        Err(SinkError::InvalidAsset { .. })
    ));
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pages_are_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 2).await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(store.submit(jpeg(9, 16), None).await.unwrap().id);
    }
    ids.reverse();

    let first = store.list_page(0, 2).await.unwrap();
    assert_eq!(
        first.items.iter().map(|p| p.id).collect::<Vec<_>>(),
        ids[..2]
    );
    assert!(first.has_more);

    let last = store.list_page(4, 2).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].id, ids[4]);
    assert!(!last.has_more);

    let beyond = store.list_page(10, 2).await.unwrap();
    assert!(beyond.items.is_empty());
    assert!(!beyond.has_more);

    assert_eq!(store.list_all().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_update_overlay_and_delete() {
    let dir = TempDir::new().unwrap();
    let bus = Arc::new(EventBus::new(16));
    let mut receiver = bus.subscribe();
    let store = open_store(&dir, 12).await.with_event_bus(Arc::clone(&bus));

    let asset = store.submit(jpeg(9, 16), None).await.unwrap();
    let updated = store.update_overlay(asset.id, Some(8)).await.unwrap();
    assert_eq!(updated.overlay_id, Some(8));
    let cleared = store.update_overlay(asset.id, None).await.unwrap();
    assert_eq!(cleared.overlay_id, None);

    let deleted = store.delete(asset.id).await.unwrap();
    assert!(!store.dir().join(&deleted.file_name).exists());
    assert!(store.get(asset.id).await.unwrap().is_none());

    assert!(matches!(
        store.delete(asset.id).await,
        Err(SinkError::NotFound { kind: "Photo", .. })
    ));
    assert!(matches!(
        store.update_overlay(asset.id, None).await,
        Err(SinkError::NotFound { .. })
    ));

    let changes: Vec<ChangeKind> = std::iter::from_fn(|| receiver.try_recv().ok())
        .filter_map(|event| match event {
            BoothEvent::PhotosChanged { change, .. } => Some(change),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec![
            ChangeKind::Inserted,
            ChangeKind::Updated,
            ChangeKind::Updated,
            ChangeKind::Deleted
        ]
    );
}

#[tokio::test]
async fn test_delete_tolerates_missing_file() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 12).await;

    let asset = store.submit(jpeg(9, 16), None).await.unwrap();
    let photo = store.get(asset.id).await.unwrap().unwrap();
    tokio::fs::remove_file(store.dir().join(&photo.file_name))
        .await
        .unwrap();

    assert!(store.delete(asset.id).await.is_ok());
}

#[tokio::test]
async fn test_feed_pages_and_refresh() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir, 2).await);
    for _ in 0..3 {
        store.submit(jpeg(9, 16), None).await.unwrap();
    }

    let feed = GalleryFeed::new(Arc::clone(&store));
    assert!(feed.is_empty());
    assert!(!feed.has_more());

    feed.refresh().await.unwrap();
    assert_eq!(feed.len(), 2);
    assert!(feed.has_more());
    assert!(!feed.is_loading());

    assert_eq!(feed.load_more().await.unwrap(), 1);
    assert_eq!(feed.len(), 3);
    assert!(!feed.has_more());
    // nothing left to load
    assert_eq!(feed.load_more().await.unwrap(), 0);

    feed.refresh().await.unwrap();
    let snapshot = feed.snapshot();
    assert_eq!(snapshot.photos.len(), 2);
    assert!(snapshot.has_more);
    assert!(snapshot.refreshed_at.is_some());
}

#[tokio::test]
async fn test_feed_follows_change_notifications() {
    let dir = TempDir::new().unwrap();
    let bus = Arc::new(EventBus::new(16));
    let store = Arc::new(open_store(&dir, 12).await.with_event_bus(Arc::clone(&bus)));
    let feed = Arc::new(GalleryFeed::new(Arc::clone(&store)));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(Arc::clone(&feed).run(
        Arc::clone(&bus),
        Duration::from_secs(3600),
        cancel.clone(),
    ));

    // the initial tick loads the empty collection
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.submit(jpeg(9, 16), None).await.unwrap();

    let mut waited = Duration::ZERO;
    while feed.len() < 1 && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(feed.len(), 1);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_download_merges_existing_overlay() {
    let dir = TempDir::new().unwrap();
    let config = create_test_storage_config(&dir, 12);
    let photos = open_store(&dir, 12).await;
    let overlays = Arc::new(LocalOverlayStore::open(&config).await.unwrap());
    let compositor = Compositor::new(
        TwiboothConfig::default().compositor,
        Arc::clone(&overlays) as Arc<dyn crate::overlay::OverlayLoader>,
    );

    let overlay = overlays.create("Frame", overlay_png()).await.unwrap();
    let plain = photos.submit(jpeg(18, 32), None).await.unwrap();
    let framed = photos.submit(jpeg(18, 32), Some(overlay.id)).await.unwrap();

    let download = prepare_download(&photos, overlays.as_ref(), &compositor, plain.id)
        .await
        .unwrap();
    assert_eq!(download.file_name, format!("photo-{}.jpg", plain.id));
    assert!(!download.merged);

    let download = prepare_download(&photos, overlays.as_ref(), &compositor, framed.id)
        .await
        .unwrap();
    assert_eq!(download.file_name, format!("twibbon-photo-{}.jpg", framed.id));
    assert!(download.merged);
    let merged = image::load_from_memory(&download.bytes).unwrap().to_rgba8();
    assert_eq!(merged.dimensions(), (18, 32));
    assert!(merged.get_pixel(9, 16).0[1] > 200);

    // a deleted overlay leaves a dangling reference that downloads plain
    overlays.delete(overlay.id).await.unwrap();
    assert!(overlays.get(overlay.id).await.unwrap().is_none());
    let download = prepare_download(&photos, overlays.as_ref(), &compositor, framed.id)
        .await
        .unwrap();
    assert_eq!(download.file_name, format!("photo-{}.jpg", framed.id));
    assert!(!download.merged);

    assert!(matches!(
        prepare_download(&photos, overlays.as_ref(), &compositor, 999).await,
        Err(TwiboothError::Sink(SinkError::NotFound { id: 999, .. }))
    ));
}

#[tokio::test]
async fn test_two_stores_on_one_directory_keep_every_photo() {
    let dir = TempDir::new().unwrap();
    let booth = Arc::new(open_store(&dir, 12).await);
    let admin = Arc::new(open_store(&dir, 12).await);
    let bytes = jpeg(8, 8);

    let submits: Vec<_> = (0..20)
        .map(|i| {
            let store = if i % 2 == 0 {
                Arc::clone(&booth)
            } else {
                Arc::clone(&admin)
            };
            let bytes = bytes.clone();
            tokio::spawn(async move { store.submit(bytes, None).await })
        })
        .collect();

    let mut ids = Vec::new();
    for submit in submits {
        ids.push(submit.await.unwrap().unwrap().id);
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<u64>>());

    let photos = booth.list_all().await.unwrap();
    assert_eq!(photos.len(), 20);
    for photo in &photos {
        assert!(booth.dir().join(&photo.file_name).exists());
    }
    let files = std::fs::read_dir(booth.dir()).unwrap().count();
    assert_eq!(files, 20);
}
