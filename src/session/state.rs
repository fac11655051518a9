use crate::storage::StoredAsset;
use serde::Serialize;

/// Device lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceState {
    NoDevice,
    Acquiring,
    Ready,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::NoDevice => "no_device",
            DeviceState::Acquiring => "acquiring",
            DeviceState::Ready => "ready",
        }
    }
}

/// Whether a capture is being composited and stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// Why a capture request did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No ready device stream
    NotReady,
    /// Another capture holds the latch
    CaptureInFlight,
}

/// Result of a capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved(StoredAsset),
    Skipped(SkipReason),
    /// The error was already reported as a notice
    Failed(String),
}

impl CaptureOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, CaptureOutcome::Saved(_))
    }
}

/// Session counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub acquisitions: u64,
    pub acquisition_failures: u64,
    pub captures_saved: u64,
    pub captures_failed: u64,
    pub captures_skipped: u64,
}
