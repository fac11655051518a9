use crate::frame::Facing;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwiboothError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Composite error: {0}")]
    Composite(#[from] CompositeError),

    #[error("Storage error: {0}")]
    Sink(#[from] SinkError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Gallery server error: {0}")]
    Gallery(#[from] GalleryError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl TwiboothError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures while acquiring or reading a capture device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera access denied for {facing} camera")]
    PermissionDenied { facing: Facing },

    #[error("No {facing} camera available: {details}")]
    Unavailable { facing: Facing, details: String },

    #[error("Failed to acquire video track: {details}")]
    TrackAcquisition { details: String },

    #[error("Camera did not report frame dimensions within {timeout_ms}ms")]
    NotReady { timeout_ms: u64 },

    #[error("Camera stream {stream_id} has been released")]
    Released { stream_id: u64 },

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },

    #[error("Capture session has been torn down")]
    SessionClosed,
}

/// Failures that abort a single compositing attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositeError {
    #[error("Source frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("Failed to decode source frame: {details}")]
    FrameDecode { details: String },

    #[error("Failed to load overlay {overlay_id}: {details}")]
    OverlayLoad { overlay_id: u64, details: String },

    #[error("Rendering failed: {details}")]
    Render { details: String },

    #[error("JPEG encoding failed: {details}")]
    Encoding { details: String },

    #[error("JPEG encoder produced no output")]
    EmptyOutput,
}

/// Failures reported by the photo and overlay stores
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Refusing to store an empty image")]
    EmptyAsset,

    #[error("Invalid asset: {details}")]
    InvalidAsset { details: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("Storage IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Index error: {details}")]
    Index { details: String },
}

impl SinkError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

/// Failures of the gallery HTTP server
#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("Failed to bind gallery server to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Gallery server failed: {details}")]
    StartupFailed { details: String },
}

pub type Result<T> = std::result::Result<T, TwiboothError>;
