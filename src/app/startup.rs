use super::{ComponentState, TwiboothOrchestrator};
use crate::error::Result;
use crate::events::{EventFilter, EventReceiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

impl TwiboothOrchestrator {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing booth components");

        let mut states = self.component_states.lock().await;
        states.insert("session".to_string(), ComponentState::Stopped);
        states.insert("requests".to_string(), ComponentState::Stopped);

        if self.config.gallery.enabled {
            states.insert("gallery_feed".to_string(), ComponentState::Stopped);
            #[cfg(feature = "gallery")]
            {
                states.insert("gallery".to_string(), ComponentState::Stopped);
            }
        }

        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }

        drop(states);

        info!("All components initialized");
        Ok(())
    }

    /// Start the booth. A camera that cannot be opened is reported as a
    /// notice and leaves the booth running without a device.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting booth");

        // Subscribe before anything can publish a request
        self.start_request_loop().await;

        self.set_component_state("session", ComponentState::Starting)
            .await;
        match self.session.start().await {
            Ok((width, height)) => {
                self.set_component_state("session", ComponentState::Running)
                    .await;
                info!("Capture session ready at {}x{}", width, height);
            }
            Err(e) => {
                self.set_component_state("session", ComponentState::Failed)
                    .await;
                warn!("Capture session started without a camera: {}", e);
            }
        }

        // An unreadable overlay index only costs the default selection
        if let Err(e) = self.session.apply_default_overlay().await {
            warn!("Could not apply default overlay: {}", e);
        }

        if self.config.gallery.enabled {
            self.start_gallery().await;
        }

        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;

                keyboard_handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard handler: {}", e);
                    e
                })?;

                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
        }

        info!("Booth started");
        Ok(())
    }

    async fn start_request_loop(&self) {
        self.set_component_state("requests", ComponentState::Starting)
            .await;

        let receiver = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::EventTypes(vec![
                "capture_requested",
                "switch_facing_requested",
                "overlay_selection_requested",
            ]),
            "booth_requests",
        );
        let handle = tokio::spawn(Self::request_loop(
            Arc::clone(&self.session),
            receiver,
            self.cancellation_token.clone(),
        ));
        self.tasks.lock().await.push(("requests", handle));

        self.set_component_state("requests", ComponentState::Running)
            .await;
    }

    async fn start_gallery(&self) {
        self.set_component_state("gallery_feed", ComponentState::Starting)
            .await;
        // Feed refreshes on photo changes and on a timer
        let poll_interval = Duration::from_secs(self.config.gallery.poll_interval_secs);
        let handle = tokio::spawn(Arc::clone(&self.feed).run(
            Arc::clone(&self.event_bus),
            poll_interval,
            self.cancellation_token.clone(),
        ));
        self.tasks.lock().await.push(("gallery_feed", handle));
        self.set_component_state("gallery_feed", ComponentState::Running)
            .await;

        #[cfg(feature = "gallery")]
        {
            if let Some(server) = &self.gallery_server {
                // the server task downgrades this to Failed if it cannot serve
                self.set_component_state("gallery", ComponentState::Running)
                    .await;

                let server = Arc::clone(server);
                let cancel = self.cancellation_token.clone();
                let states = Arc::clone(&self.component_states);
                let handle = tokio::spawn(async move {
                    if let Err(e) = server.start(cancel).await {
                        error!("Gallery server error: {}", e);
                        states
                            .lock()
                            .await
                            .insert("gallery".to_string(), ComponentState::Failed);
                    }
                });
                self.tasks.lock().await.push(("gallery", handle));
                info!(
                    "Gallery server started on {}:{}",
                    self.config.gallery.ip, self.config.gallery.port
                );
            }
        }
    }
}
