use crate::error::{SinkError, TwiboothError};
use crate::overlay::{Overlay, OverlayRegistry};
use crate::storage::{prepare_download, Page, StoredPhoto};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use super::server::GalleryState;

const MAX_PAGE_LIMIT: usize = 100;

/// Error body returned by the JSON API
pub struct ApiError(TwiboothError);

impl From<TwiboothError> for ApiError {
    fn from(error: TwiboothError) -> Self {
        Self(error)
    }
}

impl From<SinkError> for ApiError {
    fn from(error: SinkError) -> Self {
        Self(TwiboothError::Sink(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TwiboothError::Sink(SinkError::NotFound { .. }) => StatusCode::NOT_FOUND,
            TwiboothError::Sink(SinkError::EmptyAsset | SinkError::InvalidAsset { .. }) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Gallery request failed: {}", self.0);
        } else {
            debug!("Gallery request rejected: {}", self.0);
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// Body of `PUT /api/photos/:id/overlay`
#[derive(Debug, Deserialize)]
pub struct OverlayAssignment {
    pub overlay_id: Option<u64>,
}

/// One page of photos, newest first
pub async fn list_photos_handler(
    State(state): State<GalleryState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<StoredPhoto>>, ApiError> {
    let offset = query.offset.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or_else(|| state.photos.page_size())
        .clamp(1, MAX_PAGE_LIMIT);

    Ok(Json(state.photos.list_page(offset, limit).await?))
}

pub async fn all_photos_handler(
    State(state): State<GalleryState>,
) -> Result<Json<Vec<StoredPhoto>>, ApiError> {
    Ok(Json(state.photos.list_all().await?))
}

/// Photo as an attachment, merged with its overlay when it still exists
pub async fn download_photo_handler(
    State(state): State<GalleryState>,
    Path(id): Path<u64>,
) -> Result<Response, ApiError> {
    let download = prepare_download(
        &state.photos,
        state.overlays.as_ref(),
        &state.compositor,
        id,
    )
    .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.file_name),
            ),
        ],
        download.bytes,
    )
        .into_response())
}

/// Re-associate a photo with another overlay, or clear it with `null`
pub async fn set_photo_overlay_handler(
    State(state): State<GalleryState>,
    Path(id): Path<u64>,
    Json(body): Json<OverlayAssignment>,
) -> Result<Json<StoredPhoto>, ApiError> {
    if let Some(overlay_id) = body.overlay_id {
        if state.overlays.get(overlay_id).await?.is_none() {
            return Err(SinkError::NotFound {
                kind: "Overlay",
                id: overlay_id,
            }
            .into());
        }
    }

    Ok(Json(state.photos.update_overlay(id, body.overlay_id).await?))
}

pub async fn delete_photo_handler(
    State(state): State<GalleryState>,
    Path(id): Path<u64>,
) -> Result<Json<StoredPhoto>, ApiError> {
    let photo = state.photos.delete(id).await?;
    info!("Photo {} deleted via gallery", id);
    Ok(Json(photo))
}

pub async fn list_overlays_handler(
    State(state): State<GalleryState>,
) -> Result<Json<Vec<Overlay>>, ApiError> {
    Ok(Json(state.overlays.list().await?))
}

/// Current cached feed
pub async fn feed_handler(State(state): State<GalleryState>) -> impl IntoResponse {
    Json(state.feed.snapshot())
}

/// Append the next feed page
pub async fn feed_more_handler(
    State(state): State<GalleryState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let added = state.feed.load_more().await?;
    Ok(Json(serde_json::json!({
        "added": added,
        "feed": state.feed.snapshot(),
    })))
}

pub async fn photo_file_handler(
    State(state): State<GalleryState>,
    Path(file): Path<String>,
) -> Response {
    serve_file(state.photos.file_path(&file), "image/jpeg").await
}

pub async fn overlay_file_handler(
    State(state): State<GalleryState>,
    Path(file): Path<String>,
) -> Response {
    serve_file(state.overlays.file_path(&file), "image/png").await
}

async fn serve_file(path: Option<PathBuf>, content_type: &'static str) -> Response {
    let Some(path) = path else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<GalleryState>) -> impl IntoResponse {
    let feed = state.feed.snapshot();

    let health_info = serde_json::json!({
        "status": "healthy",
        "feed": {
            "photos_loaded": feed.photos.len(),
            "has_more": feed.has_more,
            "loading": feed.loading,
            "refreshed_at": feed.refreshed_at,
        },
        "server_info": {
            "subscribers": state.event_bus.subscriber_count(),
        }
    });

    (StatusCode::OK, Json(health_info))
}
