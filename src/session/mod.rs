mod builder;
mod controller;
mod state;

pub use builder::CaptureSessionBuilder;
pub use controller::CaptureSession;
pub use state::{CaptureOutcome, CaptureState, DeviceState, SessionStats, SkipReason};
