//! Reading Session Controller
//!
//! Drives one scale reading from scan to capture:
//!
//! ```text
//! Scanning -> Connecting -> Connected -> ResolvingService
//!   -> ResolvingCharacteristic -> AwaitingSubscription -> Listening
//!   <-> Stabilizing -> Captured
//! ```
//!
//! Any step may end the session in `Failed`, `TimedOut` or `Cancelled`.
//! Each session runs as one tokio task that owns the connection; the frame
//! wait races the overall deadline and the cancel command, and the
//! subscription and connection are released before the outcome is published.

use crate::domain::decoder;
use crate::domain::models::{
    CapturedReading, ChannelKind, FailureKind, RawFrame, SessionOutcome, SessionState,
    StatusUpdate,
};
use crate::domain::settings::Settings;
use crate::domain::stabilization::{self, DeviceGeneration, Stabilization};
use crate::infrastructure::bluetooth::channel::FrameChannel;
use crate::infrastructure::bluetooth::platform::{BleError, BlePlatform, DeviceHandle, Discovery};
use crate::infrastructure::bluetooth::protocol::{
    BATTERY_LEVEL, BATTERY_SERVICE, CANDIDATE_CHARACTERISTICS, CANDIDATE_SERVICES,
    SESSION_TIMEOUT,
};
use crate::infrastructure::bluetooth::resolver::{CharacteristicResolver, ServiceResolver};
use chrono::Utc;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

/// Tunable parts of a session. Protocol constants live in `protocol`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name_prefixes: Vec<String>,
    pub scan_timeout: Duration,
    pub read_battery_level: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            name_prefixes: settings.device_name_prefixes.clone(),
            scan_timeout: settings.scan_timeout(),
            read_battery_level: settings.read_battery_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCommand {
    Cancel,
}

/// Pending result of [`SessionController::start_reading`].
pub struct ReadingHandle {
    outcome: oneshot::Receiver<SessionOutcome>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl ReadingHandle {
    /// Cancel this session. No effect once it has finished.
    pub fn cancel(&self) {
        let _ = self.commands.send(SessionCommand::Cancel);
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(self) -> SessionOutcome {
        // The task only goes away without answering when the runtime shuts down
        self.outcome.await.unwrap_or(SessionOutcome::Cancelled)
    }
}

/// Owns at most one reading session at a time.
pub struct SessionController<P: BlePlatform> {
    shared: Arc<SessionShared<P>>,
}

struct SessionShared<P: BlePlatform> {
    platform: Arc<P>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    event_sender: mpsc::UnboundedSender<StatusUpdate>,
    active_commands: Mutex<Option<mpsc::UnboundedSender<SessionCommand>>>,
}

/// Resources acquired during a session, released on every exit path.
struct SessionResources<P: BlePlatform> {
    device: Option<DeviceHandle>,
    channel: Option<FrameChannel<P>>,
}

impl<P: BlePlatform> SessionController<P> {
    pub fn new(
        platform: Arc<P>,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<StatusUpdate>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(SessionShared {
                platform,
                config,
                state,
                event_sender,
                active_commands: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Observe every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Begin a reading session on the current tokio runtime.
    ///
    /// Fails immediately with `SessionAlreadyActive` while another session
    /// has not reached a terminal state; that session is left untouched.
    pub fn start_reading(&self) -> Result<ReadingHandle, FailureKind> {
        if !self.shared.try_begin() {
            warn!("Reading requested while a session is active");
            return Err(FailureKind::SessionAlreadyActive);
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        *self.shared.lock_commands() = Some(command_tx.clone());

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let outcome = shared.run(command_rx).await;
            let _ = outcome_tx.send(outcome);
        });

        Ok(ReadingHandle {
            outcome: outcome_rx,
            commands: command_tx,
        })
    }

    /// Cancel the active session, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(commands) = self.shared.lock_commands().as_ref() {
            info!("Cancelling reading session");
            let _ = commands.send(SessionCommand::Cancel);
        }
    }

    /// Run one reading, cancelling it when `interrupt` resolves.
    ///
    /// An interrupt source that fails is logged and the session runs to its
    /// own terminal outcome.
    pub async fn read_until_interrupted<F>(&self, interrupt: F) -> SessionOutcome
    where
        F: Future<Output = io::Result<()>>,
    {
        let handle = match self.start_reading() {
            Ok(handle) => handle,
            Err(reason) => return SessionOutcome::failed(reason),
        };

        let outcome = handle.outcome();
        tokio::pin!(outcome);
        tokio::select! {
            outcome = &mut outcome => outcome,
            result = interrupt => {
                match result {
                    Ok(()) => self.cancel(),
                    Err(e) => warn!(error = %e, "Interrupt source failed, reading continues"),
                }
                outcome.await
            }
        }
    }
}

impl<P: BlePlatform> SessionShared<P> {
    fn lock_commands(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<SessionCommand>>> {
        self.active_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim the controller for a new session.
    fn try_begin(&self) -> bool {
        let claimed = self.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            *state = SessionState::Scanning;
            true
        });
        if claimed {
            debug!("Session state -> Scanning");
            self.emit(StatusUpdate::Scanning);
        }
        claimed
    }

    /// The single place the session state changes after it has begun.
    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        debug_assert!(
            previous.can_advance_to(&next),
            "illegal transition {:?} -> {:?}",
            previous,
            next
        );
        debug!(from = ?previous, to = ?next, "Session state changed");

        // Returning to Listening after a rejected frame is not news for the UI
        if previous == SessionState::Stabilizing && next == SessionState::Listening {
            return;
        }
        if let Some(update) = next.status_update() {
            self.emit(update);
        }
    }

    fn emit(&self, update: StatusUpdate) {
        let _ = self.event_sender.send(update);
    }

    async fn run(&self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) -> SessionOutcome {
        let mut resources = SessionResources {
            device: None,
            channel: None,
        };

        let outcome = tokio::select! {
            outcome = self.drive(&mut resources) => outcome,
            _ = wait_for_cancel(&mut commands) => {
                info!("Reading session cancelled");
                SessionOutcome::Cancelled
            }
        };

        resources.release(self.platform.as_ref()).await;
        self.lock_commands().take();

        let terminal = match &outcome {
            SessionOutcome::Captured(capture) => {
                info!(weight_kg = capture.reading.weight_kg, "Reading captured");
                SessionState::Captured
            }
            SessionOutcome::Failed { reason } => {
                error!(%reason, "Reading session failed");
                SessionState::Failed(*reason)
            }
            SessionOutcome::TimedOut => {
                warn!("Reading session timed out");
                SessionState::TimedOut
            }
            SessionOutcome::Cancelled => SessionState::Cancelled,
        };
        self.transition(terminal);
        outcome
    }

    async fn drive(&self, resources: &mut SessionResources<P>) -> SessionOutcome {
        let platform = self.platform.as_ref();

        if let Err(e) = platform.ensure_available().await {
            warn!(error = %e, "Bluetooth LE unavailable");
            return SessionOutcome::failed(FailureKind::BleUnsupported);
        }

        // The scan timeout bounds everything up to Connected
        match time::timeout(self.config.scan_timeout, self.find_and_connect(resources)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return SessionOutcome::failed(reason),
            Err(_) => {
                info!(
                    timeout = ?self.config.scan_timeout,
                    state = ?*self.state.borrow(),
                    "Not connected before scan timeout"
                );
                return SessionOutcome::failed(FailureKind::DeviceNotFound);
            }
        }
        self.transition(SessionState::Connected);

        let deadline = Instant::now() + SESSION_TIMEOUT;
        match time::timeout_at(deadline, self.capture(resources)).await {
            Ok(Ok(capture)) => SessionOutcome::Captured(capture),
            Ok(Err(reason)) => SessionOutcome::failed(reason),
            Err(_) => SessionOutcome::TimedOut,
        }
    }

    /// Scan for a matching scale and connect to it. The device is stored in
    /// `resources` before connecting so a half-open link is still released.
    async fn find_and_connect(
        &self,
        resources: &mut SessionResources<P>,
    ) -> Result<(), FailureKind> {
        let platform = self.platform.as_ref();

        info!(prefixes = ?self.config.name_prefixes, "Scanning for scale");
        let device = match platform.scan(&self.config.name_prefixes).await {
            Ok(device) => device,
            Err(BleError::Unavailable) => return Err(FailureKind::BleUnsupported),
            Err(e) => {
                warn!(error = %e, "Scan failed");
                return Err(FailureKind::DeviceNotFound);
            }
        };

        info!(
            address = %format!("{:#X}", device.address),
            name = ?device.display_name,
            "Scale found"
        );
        self.transition(SessionState::Connecting);
        let device = resources.device.insert(device);
        if let Err(e) = platform.connect(device).await {
            warn!(error = %e, "Connection failed");
            return Err(FailureKind::ConnectionFailed);
        }
        Ok(())
    }

    /// Everything after the connection is up: resolution, subscription and
    /// the listening loop.
    async fn capture(
        &self,
        resources: &mut SessionResources<P>,
    ) -> Result<CapturedReading, FailureKind> {
        let platform = self.platform.as_ref();
        let Some(device) = resources.device.as_ref() else {
            return Err(FailureKind::ConnectionFailed);
        };
        let device_name = device.display_name.clone();

        self.transition(SessionState::ResolvingService);
        let (_, service) = ServiceResolver::new(CANDIDATE_SERVICES)
            .resolve(platform, device)
            .await?;

        self.transition(SessionState::ResolvingCharacteristic);
        let (_, characteristic) = CharacteristicResolver::new(CANDIDATE_CHARACTERISTICS)
            .resolve(platform, &service)
            .await?;

        let battery_percent = if self.config.read_battery_level {
            read_battery_level(platform, device).await
        } else {
            None
        };

        self.transition(SessionState::AwaitingSubscription);
        let channel = resources
            .channel
            .insert(FrameChannel::open(platform, characteristic).await);
        let channel_kind = channel.kind();

        self.transition(SessionState::Listening);
        loop {
            let frame = match channel.next_frame(platform).await? {
                Some(frame) => frame,
                // Polling window exhausted; the session deadline decides
                None if channel_kind == ChannelKind::Polling => {
                    std::future::pending::<RawFrame>().await
                }
                None => {
                    warn!("Notification stream closed");
                    return Err(FailureKind::ConnectionLost);
                }
            };
            trace!(len = frame.len(), bytes = ?frame.as_bytes(), "Frame received");

            let generation = DeviceGeneration::of(&frame);
            match stabilization::classify(&frame, generation) {
                Stabilization::Stabilized => {
                    self.transition(SessionState::Stabilizing);
                    match decoder::decode(&frame, Utc::now()) {
                        Ok(reading) => {
                            return Ok(CapturedReading {
                                reading,
                                device_name,
                                battery_percent,
                                channel: channel_kind,
                            });
                        }
                        Err(reason) => {
                            debug!(%reason, bytes = ?frame.as_bytes(), "Discarding stabilized frame");
                            self.transition(SessionState::Listening);
                        }
                    }
                }
                Stabilization::Transient | Stabilization::Indeterminate => {
                    trace!(status = ?frame.status_byte(), ?generation, "Transient frame");
                }
            }
        }
    }
}

impl<P: BlePlatform> SessionResources<P> {
    async fn release(&mut self, platform: &P) {
        if let Some(channel) = self.channel.take() {
            channel.close(platform).await;
        }
        if let Some(mut device) = self.device.take() {
            match platform.disconnect(&mut device).await {
                Ok(()) => debug!("Disconnected from scale"),
                Err(e) => warn!(error = %e, "Disconnect failed"),
            }
        }
    }
}

async fn wait_for_cancel(commands: &mut mpsc::UnboundedReceiver<SessionCommand>) {
    match commands.recv().await {
        Some(SessionCommand::Cancel) => {}
        // All senders gone: nobody can cancel any more
        None => std::future::pending::<()>().await,
    }
}

/// One best-effort read of the standard Battery Level characteristic.
async fn read_battery_level<P: BlePlatform>(platform: &P, device: &DeviceHandle) -> Option<u8> {
    let service = match platform.discover_service(device, BATTERY_SERVICE).await {
        Ok(Discovery::Found(service)) => service,
        Ok(Discovery::NotFound) => {
            debug!("No battery service");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "Battery service lookup failed");
            return None;
        }
    };
    let characteristic = match platform.discover_characteristic(&service, BATTERY_LEVEL).await {
        Ok(Discovery::Found(characteristic)) => characteristic,
        Ok(Discovery::NotFound) => return None,
        Err(e) => {
            debug!(error = %e, "Battery level lookup failed");
            return None;
        }
    };
    match platform.read_value(&characteristic).await {
        Ok(value) => {
            let level = value.first().map(|level| (*level).min(100));
            debug!(?level, "Battery level");
            level
        }
        Err(e) => {
            debug!(error = %e, "Battery level read failed");
            None
        }
    }
}
