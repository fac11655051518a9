use crate::config::DefaultOverlay;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decorative frame drawn over a capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub id: u64,
    pub name: String,
    pub image_url: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

/// Overlay used for the next capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlaySelection {
    #[default]
    None,
    Overlay(u64),
}

impl OverlaySelection {
    pub fn overlay_id(self) -> Option<u64> {
        match self {
            OverlaySelection::None => None,
            OverlaySelection::Overlay(id) => Some(id),
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, OverlaySelection::None)
    }
}

impl From<Option<u64>> for OverlaySelection {
    fn from(id: Option<u64>) -> Self {
        match id {
            Some(id) => OverlaySelection::Overlay(id),
            None => OverlaySelection::None,
        }
    }
}

impl DefaultOverlay {
    /// Pick the start-of-session selection from the catalogue (newest first)
    pub fn resolve(self, overlays: &[Overlay]) -> OverlaySelection {
        match self {
            DefaultOverlay::None => OverlaySelection::None,
            DefaultOverlay::First => overlays
                .first()
                .map(|overlay| OverlaySelection::Overlay(overlay.id))
                .unwrap_or_default(),
        }
    }
}
