use super::{ShutdownReason, TwiboothOrchestrator};
use crate::error::{CameraError, EventBusError, Result, TwiboothError};
use crate::events::{BoothEvent, EventFilter, EventReceiver, NoticeLevel};
use crate::session::{CaptureOutcome, CaptureSession};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SharedShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl TwiboothOrchestrator {
    /// Run until a signal or a quit request arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Twibooth is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| TwiboothError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| TwiboothError::system("Shutdown receiver already taken"))?;

        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(Arc::clone(&shutdown_sender));
        self.listen_for_quit_requests(shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| TwiboothError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Twibooth shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, shutdown_sender: SharedShutdownSender) {
        // SIGTERM (systemd stop), Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            warn!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    send_shutdown(
                        &shutdown_sender_sigterm,
                        ShutdownReason::Signal("SIGTERM".to_string()),
                    )
                    .await;
                }
            });
        }

        // SIGINT (Ctrl+C)
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                send_shutdown(
                    &shutdown_sender,
                    ShutdownReason::Signal("SIGINT".to_string()),
                )
                .await;
            }
        });
    }

    /// Turn `ShutdownRequested` events (keyboard quit) into a shutdown
    fn listen_for_quit_requests(&self, shutdown_sender: SharedShutdownSender) {
        let mut receiver = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "quit_requests",
        );
        let cancel = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(BoothEvent::ShutdownRequested { reason, .. }) => {
                            send_shutdown(&shutdown_sender, ShutdownReason::UserRequest(reason))
                                .await;
                            break;
                        }
                        Ok(_) => {}
                        Err(EventBusError::ChannelClosed) => break,
                        Err(e) => warn!("Quit listener event error: {}", e),
                    },
                }
            }
        });
    }

    /// Consume capture, switch and overlay requests until cancelled. The
    /// captures and switches it spawned are awaited before it returns, so
    /// shutdown tears the session down only after they are done.
    pub(super) async fn request_loop(
        session: Arc<CaptureSession>,
        mut receiver: EventReceiver,
        cancel: CancellationToken,
    ) {
        debug!("Request loop started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => match event {
                    Ok(event) => dispatch_request(&session, event, &mut in_flight).await,
                    Err(EventBusError::ChannelClosed) => break,
                    Err(e) => warn!("Request loop event error: {}", e),
                },
                // reap finished requests
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        if !in_flight.is_empty() {
            debug!("Waiting for {} in-flight request(s)", in_flight.len());
        }
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                warn!("Request task ended abnormally: {}", e);
            }
        }

        debug!("Request loop stopped");
    }
}

/// Act on one booth request. Captures and switches run in their own tasks
/// in `in_flight`; the session rejects overlapping captures and serializes
/// switches.
pub(super) async fn dispatch_request(
    session: &Arc<CaptureSession>,
    event: BoothEvent,
    in_flight: &mut JoinSet<()>,
) {
    match event {
        BoothEvent::CaptureRequested { .. } => {
            let session = Arc::clone(session);
            in_flight.spawn(async move {
                match session.capture().await {
                    CaptureOutcome::Saved(asset) => {
                        info!("Captured photo {} ({})", asset.id, asset.url)
                    }
                    CaptureOutcome::Skipped(reason) => debug!("Capture skipped: {:?}", reason),
                    CaptureOutcome::Failed(message) => warn!("Capture failed: {}", message),
                }
            });
        }
        BoothEvent::SwitchFacingRequested { .. } => {
            let session = Arc::clone(session);
            in_flight.spawn(async move {
                match session.switch_facing().await {
                    Ok(_) => {}
                    Err(CameraError::SessionClosed) => debug!("Camera switch after shutdown ignored"),
                    Err(e) => warn!("Camera switch failed: {}", e),
                }
            });
        }
        BoothEvent::OverlaySelectionRequested { position } => {
            // overlay selection is quick; keep it in order with other requests
            if let Err(e) = session.select_overlay_at(position).await {
                warn!("Overlay selection failed: {}", e);
                session
                    .event_bus()
                    .notify(BoothEvent::Notice {
                        level: NoticeLevel::Warning,
                        title: "Overlay Unavailable".to_string(),
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        other => debug!("Ignoring {} in request loop", other.event_type()),
    }
}

async fn send_shutdown(shutdown_sender: &SharedShutdownSender, reason: ShutdownReason) {
    if let Some(sender) = shutdown_sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}
