use super::{ComponentState, TwiboothOrchestrator};
use crate::error::{Result, TwiboothError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const DEVICE_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

impl TwiboothOrchestrator {
    /// Stop background tasks and release the camera
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // No new requests from the terminal
        if self.keyboard_enabled {
            if let Err(e) = self.stop_keyboard().await {
                error!("Error stopping keyboard: {}", e);
                exit_code = 1;
            }
        }

        // Join tasks in reverse start order; the request loop finishes its
        // in-flight captures and switches before its handle resolves
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (component, handle) in tasks.into_iter().rev() {
            self.set_component_state(component, ComponentState::Stopping)
                .await;
            match timeout(TASK_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {
                    if self.get_component_state(component).await != Some(ComponentState::Failed) {
                        self.set_component_state(component, ComponentState::Stopped)
                            .await;
                    }
                    info!("{} component stopped", component);
                }
                Ok(Err(e)) => {
                    self.set_component_state(component, ComponentState::Failed)
                        .await;
                    error!("{} task ended abnormally: {}", component, e);
                    exit_code = 1;
                }
                Err(_) => {
                    self.set_component_state(component, ComponentState::Failed)
                        .await;
                    error!("{} component stop timeout", component);
                    exit_code = 1;
                }
            }
        }

        // Release the camera last
        if let Err(e) = self.stop_session().await {
            error!("Error releasing camera: {}", e);
            exit_code = 1;
        }

        let failed = self.failed_components().await;
        if !failed.is_empty() {
            warn!("Components in failed state at shutdown: {}", failed.join(", "));
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_keyboard(&self) -> Result<()> {
        let Some(keyboard_handler) = &self.keyboard_handler else {
            return Ok(());
        };

        self.set_component_state("keyboard", ComponentState::Stopping)
            .await;
        match timeout(Duration::from_secs(2), keyboard_handler.stop()).await {
            Ok(Ok(())) => {
                self.set_component_state("keyboard", ComponentState::Stopped)
                    .await;
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state("keyboard", ComponentState::Failed)
                    .await;
                Err(e)
            }
            Err(_) => {
                self.set_component_state("keyboard", ComponentState::Failed)
                    .await;
                Err(TwiboothError::component("keyboard", "stop timeout"))
            }
        }
    }

    /// Release the device stream; the session's own state ends at NoDevice
    async fn stop_session(&self) -> Result<()> {
        self.set_component_state("session", ComponentState::Stopping)
            .await;
        match timeout(DEVICE_RELEASE_TIMEOUT, self.session.teardown()).await {
            Ok(()) => {
                self.set_component_state("session", ComponentState::Stopped)
                    .await;
                info!("session component stopped");
                Ok(())
            }
            Err(_) => {
                self.set_component_state("session", ComponentState::Failed)
                    .await;
                Err(TwiboothError::component("session", "camera release timeout"))
            }
        }
    }
}
