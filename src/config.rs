use crate::frame::Facing;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwiboothConfig {
    pub camera: CameraConfig,
    pub compositor: CompositorConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub gallery: GalleryConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    /// Synthetic frames, no hardware required
    TestPattern,
    /// V4L2 devices through GStreamer (requires the `camera` feature)
    V4l2,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Capture backend
    #[serde(default = "default_camera_backend")]
    pub backend: CameraBackend,

    /// Device index used for the front (user-facing) camera, e.g. 0 for /dev/video0
    #[serde(default = "default_front_device")]
    pub front_device: u32,

    /// Device index used for the back (environment-facing) camera
    #[serde(default = "default_back_device")]
    pub back_device: u32,

    /// Preferred capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Video format requested from the device (MJPG or RGBA)
    #[serde(default = "default_camera_format")]
    pub format: String,

    /// How long to wait for a new stream to report its dimensions
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompositorConfig {
    /// Output aspect ratio numerator (portrait 9:16 by default)
    #[serde(default = "default_aspect_width")]
    pub aspect_width: u32,

    /// Output aspect ratio denominator
    #[serde(default = "default_aspect_height")]
    pub aspect_height: u32,

    /// Output canvas height in pixels; width follows from the aspect ratio
    #[serde(default = "default_output_height")]
    pub output_height: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Upper bound on loading an overlay image
    #[serde(default = "default_overlay_load_timeout_ms")]
    pub overlay_load_timeout_ms: u64,
}

/// Overlay selected when a session starts
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefaultOverlay {
    None,
    First,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Camera used when the session starts
    #[serde(default = "default_facing")]
    pub default_facing: Facing,

    /// Overlay selected when the session starts
    #[serde(default = "default_overlay")]
    pub default_overlay: DefaultOverlay,

    /// Duration of the capture flash after a capture completes
    #[serde(default = "default_flash_duration_ms")]
    pub flash_duration_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Base directory for photos, overlays and their indexes
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Base URL under which stored files are publicly reachable
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Photos per gallery page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GalleryConfig {
    /// Serve the gallery HTTP API
    #[serde(default = "default_gallery_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_gallery_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_gallery_port")]
    pub port: u16,

    /// Interval between gallery feed refreshes, on top of change notifications
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Enable keyboard control (space to capture)
    #[serde(default = "default_keyboard")]
    pub keyboard: bool,
}

impl CameraConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn device_for(&self, facing: Facing) -> u32 {
        match facing {
            Facing::Front => self.front_device,
            Facing::Back => self.back_device,
        }
    }
}

impl CompositorConfig {
    pub fn aspect(&self) -> f64 {
        self.aspect_width as f64 / self.aspect_height as f64
    }

    pub fn overlay_load_timeout(&self) -> Duration {
        Duration::from_millis(self.overlay_load_timeout_ms)
    }
}

impl SessionConfig {
    pub fn flash_duration(&self) -> Duration {
        Duration::from_millis(self.flash_duration_ms)
    }
}

impl TwiboothConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("twibooth.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.backend", "test_pattern")?
            .set_default("camera.front_device", default_front_device())?
            .set_default("camera.back_device", default_back_device())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.format", default_camera_format())?
            .set_default("camera.ready_timeout_ms", default_ready_timeout_ms() as i64)?
            .set_default("compositor.aspect_width", default_aspect_width())?
            .set_default("compositor.aspect_height", default_aspect_height())?
            .set_default("compositor.output_height", default_output_height())?
            .set_default("compositor.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default(
                "compositor.overlay_load_timeout_ms",
                default_overlay_load_timeout_ms() as i64,
            )?
            .set_default("session.default_facing", "front")?
            .set_default("session.default_overlay", "none")?
            .set_default("session.flash_duration_ms", default_flash_duration_ms() as i64)?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.public_base_url", default_public_base_url())?
            .set_default("storage.page_size", default_page_size() as i64)?
            .set_default("gallery.enabled", default_gallery_enabled())?
            .set_default("gallery.ip", default_gallery_ip())?
            .set_default("gallery.port", default_gallery_port())?
            .set_default("gallery.poll_interval_secs", default_poll_interval_secs() as i64)?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.keyboard", default_keyboard())?
            .add_source(File::with_name(&path_str).required(false))
            // TWIBOOTH_CAMERA__READY_TIMEOUT_MS style overrides
            .add_source(Environment::with_prefix("TWIBOOTH").separator("__"))
            .build()?;

        let config: TwiboothConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.camera.format.as_str(), "MJPG" | "RGBA") {
            return Err(ConfigError::Message(format!(
                "Unsupported camera format '{}' (expected MJPG or RGBA)",
                self.camera.format
            )));
        }

        if self.compositor.aspect_width == 0 || self.compositor.aspect_height == 0 {
            return Err(ConfigError::Message(
                "Compositor aspect ratio must be greater than 0".to_string(),
            ));
        }

        if self.compositor.output_height == 0 {
            return Err(ConfigError::Message(
                "Compositor output_height must be greater than 0".to_string(),
            ));
        }

        if self.compositor.jpeg_quality == 0 || self.compositor.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        if self.storage.page_size == 0 {
            return Err(ConfigError::Message(
                "Storage page_size must be greater than 0".to_string(),
            ));
        }

        if self.storage.public_base_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Storage public_base_url must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for TwiboothConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                backend: default_camera_backend(),
                front_device: default_front_device(),
                back_device: default_back_device(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                format: default_camera_format(),
                ready_timeout_ms: default_ready_timeout_ms(),
            },
            compositor: CompositorConfig {
                aspect_width: default_aspect_width(),
                aspect_height: default_aspect_height(),
                output_height: default_output_height(),
                jpeg_quality: default_jpeg_quality(),
                overlay_load_timeout_ms: default_overlay_load_timeout_ms(),
            },
            session: SessionConfig {
                default_facing: default_facing(),
                default_overlay: default_overlay(),
                flash_duration_ms: default_flash_duration_ms(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
                public_base_url: default_public_base_url(),
                page_size: default_page_size(),
            },
            gallery: GalleryConfig {
                enabled: default_gallery_enabled(),
                ip: default_gallery_ip(),
                port: default_gallery_port(),
                poll_interval_secs: default_poll_interval_secs(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                keyboard: default_keyboard(),
            },
        }
    }
}

// Default value functions
fn default_camera_backend() -> CameraBackend {
    CameraBackend::TestPattern
}
fn default_front_device() -> u32 {
    0
}
fn default_back_device() -> u32 {
    1
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_camera_format() -> String {
    "MJPG".to_string()
}
fn default_ready_timeout_ms() -> u64 {
    5000
}

fn default_aspect_width() -> u32 {
    9
}
fn default_aspect_height() -> u32 {
    16
}
fn default_output_height() -> u32 {
    1920
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_overlay_load_timeout_ms() -> u64 {
    5000
}

fn default_facing() -> Facing {
    Facing::Front
}
fn default_overlay() -> DefaultOverlay {
    DefaultOverlay::None
}
fn default_flash_duration_ms() -> u64 {
    200
}

fn default_storage_path() -> String {
    "./booth-data".to_string()
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_page_size() -> usize {
    12
}

fn default_gallery_enabled() -> bool {
    true
}
fn default_gallery_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_gallery_port() -> u16 {
    8080
}
fn default_poll_interval_secs() -> u64 {
    30
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_keyboard() -> bool {
    false
}
