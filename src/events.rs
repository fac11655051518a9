use crate::error::EventBusError;
use crate::frame::Facing;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Kind of mutation behind a change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// Events that can occur in the photo booth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BoothEvent {
    /// The user asked for a photo
    CaptureRequested { timestamp: SystemTime },
    /// The user asked to flip between front and back camera
    SwitchFacingRequested { timestamp: SystemTime },
    /// The user picked an overlay by catalogue position (`None` = no overlay)
    OverlaySelectionRequested { position: Option<usize> },
    /// Device lifecycle moved to a new state
    DeviceStateChanged { state: String, facing: Facing },
    /// Capture flash began
    FlashStarted { timestamp: SystemTime },
    /// Capture flash finished
    FlashEnded { timestamp: SystemTime },
    /// A composited photo was stored
    PhotoCaptured {
        photo_id: u64,
        url: String,
        overlay_id: Option<u64>,
    },
    /// Message meant for the person in front of the booth
    Notice {
        level: NoticeLevel,
        title: String,
        message: String,
    },
    /// The photo collection changed
    PhotosChanged { change: ChangeKind, photo_id: u64 },
    /// The overlay catalogue changed
    OverlaysChanged { change: ChangeKind, overlay_id: u64 },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl BoothEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            BoothEvent::CaptureRequested { .. } => "Capture requested".to_string(),
            BoothEvent::SwitchFacingRequested { .. } => "Camera switch requested".to_string(),
            BoothEvent::OverlaySelectionRequested { position } => match position {
                Some(position) => format!("Overlay #{} requested", position + 1),
                None => "No overlay requested".to_string(),
            },
            BoothEvent::DeviceStateChanged { state, facing } => {
                format!("Device {} ({} camera)", state, facing)
            }
            BoothEvent::FlashStarted { .. } => "Flash started".to_string(),
            BoothEvent::FlashEnded { .. } => "Flash ended".to_string(),
            BoothEvent::PhotoCaptured { photo_id, url, .. } => {
                format!("Photo {} stored at {}", photo_id, url)
            }
            BoothEvent::Notice {
                title, message, ..
            } => format!("{}: {}", title, message),
            BoothEvent::PhotosChanged { change, photo_id } => {
                format!("Photo {} {:?}", photo_id, change)
            }
            BoothEvent::OverlaysChanged { change, overlay_id } => {
                format!("Overlay {} {:?}", overlay_id, change)
            }
            BoothEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            BoothEvent::CaptureRequested { .. } => "capture_requested",
            BoothEvent::SwitchFacingRequested { .. } => "switch_facing_requested",
            BoothEvent::OverlaySelectionRequested { .. } => "overlay_selection_requested",
            BoothEvent::DeviceStateChanged { .. } => "device_state_changed",
            BoothEvent::FlashStarted { .. } => "flash_started",
            BoothEvent::FlashEnded { .. } => "flash_ended",
            BoothEvent::PhotoCaptured { .. } => "photo_captured",
            BoothEvent::Notice { .. } => "notice",
            BoothEvent::PhotosChanged { .. } => "photos_changed",
            BoothEvent::OverlaysChanged { .. } => "overlays_changed",
            BoothEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<BoothEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<BoothEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: BoothEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        match &event {
            BoothEvent::Notice {
                level: NoticeLevel::Error,
                title,
                message,
            } => {
                error!("{}: {}", title, message);
            }
            BoothEvent::Notice {
                level: NoticeLevel::Warning,
                title,
                message,
            } => {
                warn!("{}: {}", title, message);
            }
            BoothEvent::PhotoCaptured { photo_id, url, .. } => {
                info!("Photo {} captured: {}", photo_id, url);
            }
            BoothEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish without caring whether anyone is listening
    pub async fn notify(&self, event: BoothEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.publish(event).await {
            debug!("No subscribers for {} event: {}", event_type, e);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&BoothEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &BoothEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<BoothEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<BoothEvent>,
        filter: EventFilter,
        name: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            filter,
            name: name.into(),
        }
    }

    /// Receive the next filtered event. Lagging is logged and skipped.
    pub async fn recv(&mut self) -> Result<BoothEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<BoothEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain everything currently queued that passes the filter
    pub fn drain(&mut self) -> Vec<BoothEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
