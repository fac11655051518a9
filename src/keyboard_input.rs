use crate::error::Result;
use crate::events::{BoothEvent, EventBus};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Map a key press to the booth request it stands for
pub fn event_for_key(code: KeyCode) -> Option<BoothEvent> {
    match code {
        KeyCode::Char(' ') | KeyCode::Enter => Some(BoothEvent::CaptureRequested {
            timestamp: SystemTime::now(),
        }),
        KeyCode::Char('f') | KeyCode::Char('F') => Some(BoothEvent::SwitchFacingRequested {
            timestamp: SystemTime::now(),
        }),
        KeyCode::Char('0') => Some(BoothEvent::OverlaySelectionRequested { position: None }),
        KeyCode::Char(c @ '1'..='9') => Some(BoothEvent::OverlaySelectionRequested {
            position: c.to_digit(10).map(|digit| digit as usize - 1),
        }),
        KeyCode::Char('q') | KeyCode::Esc => Some(BoothEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: "User requested via keyboard".to_string(),
        }),
        _ => None,
    }
}

/// Terminal keyboard control: SPACE captures, `f` flips the camera,
/// `0`-`9` pick the overlay, `q`/Esc quits
pub struct KeyboardInputHandler {
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - SPACE capture, f switch camera, 0-9 overlay, q quit");

        let event_bus = Arc::clone(&self.event_bus);
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        // crossterm polling blocks, so it gets its own thread
        task::spawn_blocking(move || {
            // Raw mode delivers single key presses without Enter
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            debug!("Raw mode enabled - keyboard handler active");

            loop {
                // Check if we should stop
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                // Poll with a timeout so cancellation is noticed
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        // Only presses, not releases or repeats
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        let Some(booth_event) = event_for_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };

                        let quit = matches!(booth_event, BoothEvent::ShutdownRequested { .. });
                        info!("Key {:?}: {}", key_event.code, booth_event.description());

                        // Publish on the runtime; this thread is not async
                        let event_bus = Arc::clone(&event_bus);
                        runtime_handle.spawn(async move {
                            if let Err(e) = event_bus.publish(booth_event).await {
                                warn!("Failed to publish keyboard event: {}", e);
                            }
                        });

                        if quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            // Leave raw mode when exiting
            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }

            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to leave raw mode itself
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Make sure the terminal is restored even if the task is stuck in poll
        let _ = disable_raw_mode();

        Ok(())
    }
}
