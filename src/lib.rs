pub mod app;
pub mod camera;
pub mod compositor;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod overlay;
pub mod session;
pub mod storage;

#[cfg(feature = "gallery")]
pub mod gallery;

pub use app::{ComponentState, ShutdownReason, TwiboothOrchestrator};
pub use camera::{build_frame_source, DeviceStream, FrameSource, SourceAccess, TestPatternSource};
pub use compositor::{compute_crop, CompositeResult, Compositor, CropRect};
pub use config::{CameraBackend, DefaultOverlay, TwiboothConfig};
pub use error::{
    CameraError, CompositeError, EventBusError, GalleryError, Result, SinkError, TwiboothError,
};
pub use events::{BoothEvent, ChangeKind, EventBus, EventFilter, EventReceiver, NoticeLevel};
pub use frame::{CaptureFrame, Facing, FrameFormat};
pub use keyboard_input::KeyboardInputHandler;
pub use overlay::{LocalOverlayStore, Overlay, OverlayLoader, OverlayRegistry, OverlaySelection};
pub use session::{CaptureOutcome, CaptureSession, CaptureSessionBuilder, DeviceState};
pub use storage::{
    prepare_download, AssetSink, Download, GalleryFeed, LocalAssetStore, StoredAsset, StoredPhoto,
};

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use camera::GstFrameSource;

#[cfg(feature = "gallery")]
pub use gallery::{GalleryServer, GalleryServerBuilder};
