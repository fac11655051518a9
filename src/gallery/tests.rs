use super::server::GalleryServerBuilder;
use crate::compositor::Compositor;
use crate::config::{GalleryConfig, StorageConfig, TwiboothConfig};
use crate::events::EventBus;
use crate::overlay::{LocalOverlayStore, OverlayLoader};
use crate::storage::{AssetSink, GalleryFeed, LocalAssetStore};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct Fixture {
    _dir: TempDir,
    photos: Arc<LocalAssetStore>,
    overlays: Arc<LocalOverlayStore>,
    feed: Arc<GalleryFeed>,
    router: Router,
}

fn create_test_gallery_config() -> GalleryConfig {
    GalleryConfig {
        enabled: true,
        ip: "127.0.0.1".to_string(),
        port: 0,
        poll_interval_secs: 30,
    }
}

fn jpeg() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(18, 32, Rgb([40, 40, 200])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}

fn png() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(9, 16, Rgba([0, 255, 0, 128])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

async fn fixture(page_size: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let storage = StorageConfig {
        path: dir.path().to_string_lossy().to_string(),
        public_base_url: "http://booth.local:8080".to_string(),
        page_size,
    };
    let event_bus = Arc::new(EventBus::new(32));
    let photos = Arc::new(LocalAssetStore::open(&storage).await.unwrap());
    let overlays = Arc::new(LocalOverlayStore::open(&storage).await.unwrap());
    let compositor = Arc::new(Compositor::new(
        TwiboothConfig::default().compositor,
        Arc::clone(&overlays) as Arc<dyn OverlayLoader>,
    ));
    let feed = Arc::new(GalleryFeed::new(Arc::clone(&photos)));

    let server = GalleryServerBuilder::new()
        .config(create_test_gallery_config())
        .photos(Arc::clone(&photos))
        .overlays(Arc::clone(&overlays))
        .compositor(compositor)
        .feed(Arc::clone(&feed))
        .event_bus(event_bus)
        .build()
        .unwrap();

    Fixture {
        _dir: dir,
        router: server.router(),
        photos,
        overlays,
        feed,
    }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, Vec<u8>, Option<String>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec(), disposition)
}

fn json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_builder_requires_stores() {
    let result = GalleryServerBuilder::new()
        .config(create_test_gallery_config())
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_health() {
    let fixture = fixture(12).await;
    let (status, body, _) = send(&fixture.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "healthy");
}

#[tokio::test]
async fn test_photo_pages() {
    let fixture = fixture(2).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(fixture.photos.submit(jpeg(), None).await.unwrap().id);
    }

    let (status, body, _) = send(&fixture.router, Method::GET, "/api/photos", None).await;
    assert_eq!(status, StatusCode::OK);
    let page = json(&body);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);
    assert_eq!(page["items"][0]["id"], ids[2]);
    assert_eq!(page["has_more"], true);

    let (_, body, _) = send(
        &fixture.router,
        Method::GET,
        "/api/photos?offset=2&limit=5",
        None,
    )
    .await;
    let page = json(&body);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["has_more"], false);

    let (_, body, _) = send(&fixture.router, Method::GET, "/api/photos/all", None).await;
    assert_eq!(json(&body).as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_download_names_follow_overlay() {
    let fixture = fixture(12).await;
    let overlay = fixture.overlays.create("Frame", png()).await.unwrap();
    let plain = fixture.photos.submit(jpeg(), None).await.unwrap();
    let framed = fixture
        .photos
        .submit(jpeg(), Some(overlay.id))
        .await
        .unwrap();

    let (status, body, disposition) = send(
        &fixture.router,
        Method::GET,
        &format!("/api/photos/{}/download", plain.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        disposition.unwrap(),
        format!("attachment; filename=\"photo-{}.jpg\"", plain.id)
    );
    assert!(image::load_from_memory(&body).is_ok());

    let (status, _, disposition) = send(
        &fixture.router,
        Method::GET,
        &format!("/api/photos/{}/download", framed.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        disposition.unwrap(),
        format!("attachment; filename=\"twibbon-photo-{}.jpg\"", framed.id)
    );

    let (status, _, _) = send(&fixture.router, Method::GET, "/api/photos/99/download", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_overlay_and_delete() {
    let fixture = fixture(12).await;
    let overlay = fixture.overlays.create("Frame", png()).await.unwrap();
    let photo = fixture.photos.submit(jpeg(), None).await.unwrap();
    let uri = format!("/api/photos/{}/overlay", photo.id);

    let body = format!("{{\"overlay_id\": {}}}", overlay.id);
    let (status, response, _) = send(&fixture.router, Method::PUT, &uri, Some(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&response)["overlay_id"], overlay.id);

    let (status, _, _) = send(
        &fixture.router,
        Method::PUT,
        &uri,
        Some("{\"overlay_id\": 4242}"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, response, _) = send(
        &fixture.router,
        Method::PUT,
        &uri,
        Some("{\"overlay_id\": null}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json(&response)["overlay_id"].is_null());

    let delete_uri = format!("/api/photos/{}", photo.id);
    let (status, _, _) = send(&fixture.router, Method::DELETE, &delete_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&fixture.router, Method::DELETE, &delete_uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_serves_stored_files() {
    let fixture = fixture(12).await;
    let overlay = fixture.overlays.create("Frame", png()).await.unwrap();
    let asset = fixture.photos.submit(jpeg(), None).await.unwrap();
    let photo = fixture.photos.get(asset.id).await.unwrap().unwrap();

    let (status, body, _) = send(
        &fixture.router,
        Method::GET,
        &format!("/photos/{}", photo.file_name),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, jpeg());

    let (status, _, _) = send(
        &fixture.router,
        Method::GET,
        &format!("/overlays/{}", overlay.file_name),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&fixture.router, Method::GET, "/photos/missing.jpg", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body, _) = send(&fixture.router, Method::GET, "/api/overlays", None).await;
    assert_eq!(json(&body)[0]["name"], "Frame");
}

#[tokio::test]
async fn test_feed_endpoints() {
    let fixture = fixture(2).await;
    for _ in 0..3 {
        fixture.photos.submit(jpeg(), None).await.unwrap();
    }

    // nothing loaded until the feed is refreshed
    let (_, body, _) = send(&fixture.router, Method::GET, "/api/feed", None).await;
    assert!(json(&body)["photos"].as_array().unwrap().is_empty());

    fixture.feed.refresh().await.unwrap();
    let (_, body, _) = send(&fixture.router, Method::GET, "/api/feed", None).await;
    let feed = json(&body);
    assert_eq!(feed["photos"].as_array().unwrap().len(), 2);
    assert_eq!(feed["has_more"], true);

    let (status, body, _) = send(&fixture.router, Method::POST, "/api/feed/more", None).await;
    assert_eq!(status, StatusCode::OK);
    let more = json(&body);
    assert_eq!(more["added"], 1);
    assert_eq!(more["feed"]["photos"].as_array().unwrap().len(), 3);
    assert_eq!(more["feed"]["has_more"], false);
}
