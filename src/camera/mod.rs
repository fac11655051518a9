#[cfg(all(feature = "camera", target_os = "linux"))]
mod gst;
mod source;
mod stream;
mod test_pattern;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gst::GstFrameSource;
pub use source::{build_frame_source, FrameSource};
pub use stream::{DeviceStream, StreamFeed, Track};
pub use test_pattern::{SourceAccess, TestPatternSource, PATTERN_LEFT, PATTERN_RIGHT};
