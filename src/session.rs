//! Session orchestration
//!
//! [`SessionController`] owns the state machine for one two-party session
//! and wires the messenger, health monitor, reconnection controller, and
//! adaptive transmission controller together.
//!
//! # State Machine
//!
//! ```text
//! Initializing → (Waiting | Connecting) → Connected ⇄ Reconnecting
//!                                              │           │
//!                                              ▼           ▼
//!                                        Disconnected    Failed
//! ```
//!
//! `Failed` and `Disconnected` are terminal: once entered, no timer fires
//! and every further event is ignored.
//!
//! # Driving the controller
//!
//! The controller performs no I/O. The embedding driver:
//! 1. feeds inbound [`SessionEvent`]s via [`SessionController::handle_event`],
//! 2. calls [`SessionController::on_timeout`] whenever
//!    [`SessionController::next_timeout`] elapses,
//! 3. executes drained [`Command`]s against the rendezvous service and the
//!    transport, and
//! 4. surfaces drained [`Notification`]s to the application.
//!
//! All mutation happens inside these calls, so a single owner of the
//! controller gets single-writer discipline for free.

use std::collections::VecDeque;
use std::time::Instant;

use crate::adaptive::{AdaptiveTransmissionController, EncodingParameters};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::health::{HealthEvent, HealthMonitor, QualityTier, RawStats};
use crate::message::{decode_message, encode_message, Message};
use crate::messenger::{ReliableMessenger, SendOutcome};
use crate::reconnect::{ReconnectionController, RecoveryAction};
use crate::rendezvous::LookupResult;

// ============================================================================
// Session Types
// ============================================================================

/// Which side of the session this peer plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Registers the room and waits for an incoming connection
    Host,
    /// Resolves the room and initiates the connection
    Guest,
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    /// Host registered, awaiting an incoming peer
    Waiting,
    /// Guest resolving the room or transport connecting
    Connecting,
    Connected,
    /// Recovering from a degraded or lost link
    Reconnecting,
    /// Retries exhausted or a fatal startup error; terminal
    Failed,
    /// Torn down on request; terminal
    Disconnected,
}

impl SessionStatus {
    /// Terminal statuses admit no further transitions or timers
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Failed | SessionStatus::Disconnected)
    }
}

/// One live two-party session
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    pub self_id: String,
    /// Filled once the remote peer is resolved or announces itself
    pub remote_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: Instant,
}

/// Capabilities the transport must offer before a session can start
#[derive(Debug, Clone, Copy)]
pub struct TransportCapabilities {
    pub data_channel: bool,
    pub media: bool,
}

/// Connection state reported by the transport primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

// ============================================================================
// Events, Commands, Notifications
// ============================================================================

/// Inbound events fed to the controller by the driver
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport primitive finished opening
    TransportOpened,
    /// An incoming connection request reached the Host
    IncomingPeer { peer_id: String },
    /// The transport's connection state changed
    TransportState(TransportState),
    /// A raw JSON payload arrived on the data channel
    DataReceived(String),
    /// The rendezvous service answered a lookup
    LookupCompleted(LookupResult),
    /// A stats snapshot answered a `Command::SampleStats`
    StatsSample(RawStats),
    /// A previously issued `Command::SendData` failed to transmit
    SendFailed { payload: String },
}

/// Outbound commands the driver executes against its collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open (or recreate) the transport primitive
    OpenTransport,
    /// Register the room with the rendezvous service (Host)
    Register {
        room_id: String,
        peer_id: String,
        display_name: String,
    },
    /// Resolve the room via the rendezvous service (Guest)
    Lookup { room_id: String },
    /// Remove the room registration (Host teardown)
    Deregister { room_id: String },
    /// Connect the transport to the resolved peer (Guest)
    ConnectPeer { peer_id: String },
    /// Accept the incoming connection request (Host)
    AcceptPeer { peer_id: String },
    /// Transmit a JSON payload on the data channel
    SendData(String),
    /// Renegotiate the transport's network path in place
    RestartPath,
    /// Apply outbound encoding parameters
    SetEncoding(EncodingParameters),
    /// Take a stats snapshot and answer with `SessionEvent::StatsSample`
    SampleStats,
    /// Close the transport primitive
    CloseTransport,
}

/// Typed notifications surfaced to the application
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The session status changed, with a human-readable reason
    StatusChanged {
        status: SessionStatus,
        reason: String,
    },
    /// The link moved to a different quality tier
    TierChanged(QualityTier),
    /// The remote peer announced itself
    PeerPresent {
        peer_id: String,
        display_name: String,
    },
    /// An application message arrived from the remote peer
    MessageReceived(Message),
}

// ============================================================================
// Session Controller
// ============================================================================

/// Orchestrates one peer session end to end
#[derive(Debug)]
pub struct SessionController {
    session: Session,
    room_id: String,
    display_name: String,
    config: SessionConfig,

    messenger: ReliableMessenger,
    health: HealthMonitor,
    reconnect: ReconnectionController,
    adaptive: AdaptiveTransmissionController,

    /// Lookups issued in the current discovery cycle
    discovery_attempts: u32,
    next_discovery_at: Option<Instant>,
    /// Budget for the transport to reach Connected
    open_deadline: Option<Instant>,

    commands: VecDeque<Command>,
    notifications: VecDeque<Notification>,
}

impl SessionController {
    /// Create a controller for a not-yet-started session
    pub fn new(
        role: Role,
        self_id: impl Into<String>,
        display_name: impl Into<String>,
        room_id: impl Into<String>,
        config: SessionConfig,
        now: Instant,
    ) -> Self {
        let messenger = ReliableMessenger::new(config.sync_fallback_window);
        let health = HealthMonitor::new(&config);
        let reconnect = ReconnectionController::new(&config);

        Self {
            session: Session {
                role,
                self_id: self_id.into(),
                remote_id: None,
                status: SessionStatus::Initializing,
                created_at: now,
            },
            room_id: room_id.into(),
            display_name: display_name.into(),
            config,
            messenger,
            health,
            reconnect,
            adaptive: AdaptiveTransmissionController::new(),
            discovery_attempts: 0,
            next_discovery_at: None,
            open_deadline: None,
            commands: VecDeque::new(),
            notifications: VecDeque::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    /// Whether the data channel is open and synced
    pub fn is_synced(&self) -> bool {
        self.messenger.is_synced()
    }

    /// Number of messages waiting for a synced channel
    pub fn queued_messages(&self) -> usize {
        self.messenger.queued_len()
    }

    /// Next command for the driver to execute
    pub fn poll_command(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    /// Next notification for the application
    pub fn poll_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    /// Earliest pending deadline; `None` once the session is terminal
    pub fn next_timeout(&self) -> Option<Instant> {
        if self.session.status.is_terminal() {
            return None;
        }
        [
            self.next_discovery_at,
            self.open_deadline,
            self.messenger.next_timeout(),
            self.health.next_timeout(),
            self.reconnect.next_timeout(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start establishing the session
    ///
    /// Fails immediately (terminal, no retry) if a required transport
    /// capability is absent.
    pub fn start(
        &mut self,
        capabilities: &TransportCapabilities,
        now: Instant,
    ) -> Result<(), SessionError> {
        if self.session.status != SessionStatus::Initializing {
            log::debug!("start() called on a session that already started");
            return Ok(());
        }

        if !capabilities.data_channel {
            let err = SessionError::CapabilityMissing("data channel");
            self.fail(err.clone());
            return Err(err);
        }
        if !capabilities.media {
            let err = SessionError::CapabilityMissing("media");
            self.fail(err.clone());
            return Err(err);
        }

        self.commands.push_back(Command::OpenTransport);
        self.open_deadline = Some(now + self.config.open_timeout);

        match self.session.role {
            Role::Host => {
                self.commands.push_back(Command::Register {
                    room_id: self.room_id.clone(),
                    peer_id: self.session.self_id.clone(),
                    display_name: self.display_name.clone(),
                });
                self.set_status(SessionStatus::Waiting, "room registered, awaiting peer");
            }
            Role::Guest => {
                self.discovery_attempts = 1;
                self.commands.push_back(Command::Lookup {
                    room_id: self.room_id.clone(),
                });
                self.set_status(SessionStatus::Connecting, "resolving room");
            }
        }

        Ok(())
    }

    /// Tear the session down
    ///
    /// Idempotent and safe from any state: cancels every pending timer,
    /// closes the transport, deregisters the room for a Host, and enters
    /// `Disconnected`. Calls after a terminal status are no-ops.
    pub fn disconnect(&mut self) {
        if self.session.status.is_terminal() {
            log::debug!("disconnect() on terminal session is a no-op");
            return;
        }

        self.cancel_timers();
        self.messenger.on_channel_closed();
        self.messenger.clear();

        if self.session.role == Role::Host {
            self.commands.push_back(Command::Deregister {
                room_id: self.room_id.clone(),
            });
        }
        self.commands.push_back(Command::CloseTransport);
        self.set_status(SessionStatus::Disconnected, "disconnect requested");
    }

    /// Send an application message to the remote peer
    ///
    /// Transmits immediately on a synced channel, queues otherwise.
    /// Ordering follows call order, including across a disconnection.
    pub fn send(&mut self, message: Message, now: Instant) {
        if self.session.status.is_terminal() {
            log::debug!("Discarding send on terminal session");
            return;
        }
        match self.messenger.send(message, now) {
            SendOutcome::Transmit(msg) => self.transmit(&msg),
            SendOutcome::Queued | SendOutcome::Dropped => {}
        }
    }

    // ------------------------------------------------------------------
    // Event Handling
    // ------------------------------------------------------------------

    /// Feed an inbound event from the driver
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) {
        if self.session.status.is_terminal() {
            log::debug!("Ignoring event on terminal session: {:?}", event);
            return;
        }

        match event {
            SessionEvent::TransportOpened => {
                log::debug!("Transport primitive ready");
            }
            SessionEvent::IncomingPeer { peer_id } => self.on_incoming_peer(peer_id),
            SessionEvent::TransportState(state) => self.on_transport_state(state, now),
            SessionEvent::DataReceived(raw) => self.on_data(&raw, now),
            SessionEvent::LookupCompleted(result) => self.on_lookup_completed(result, now),
            SessionEvent::StatsSample(raw) => {
                let events = self.health.record_stats(raw);
                for ev in events {
                    self.handle_health_event(ev, now);
                }
            }
            SessionEvent::SendFailed { payload } => self.on_send_failed(&payload, now),
        }
    }

    /// Fire any expired deadlines
    pub fn on_timeout(&mut self, now: Instant) {
        if self.session.status.is_terminal() {
            return;
        }

        if let Some(at) = self.next_discovery_at {
            if now >= at {
                self.next_discovery_at = None;
                self.discovery_attempts += 1;
                log::debug!(
                    "Retrying room lookup ({}/{})",
                    self.discovery_attempts,
                    self.config.discovery_max_attempts
                );
                self.commands.push_back(Command::Lookup {
                    room_id: self.room_id.clone(),
                });
            }
        }

        if let Some(at) = self.open_deadline {
            if now >= at {
                self.open_deadline = None;
                if self.session.status != SessionStatus::Connected {
                    log::warn!("Transport did not open within budget");
                    self.escalate_reconnect(&SessionError::TransportOpenTimeout, now);
                }
            }
        }

        if let Some(flushed) = self.messenger.check_sync_fallback(now) {
            for msg in flushed {
                self.transmit(&msg);
            }
            self.declare_connected(now);
        }

        let events = self.health.on_timeout(now);
        for ev in events {
            self.handle_health_event(ev, now);
        }

        if self.reconnect.take_due_reconnect(now) {
            self.execute_reconnect(now);
        }
    }

    // ------------------------------------------------------------------
    // Inbound event details
    // ------------------------------------------------------------------

    fn on_incoming_peer(&mut self, peer_id: String) {
        if self.session.role != Role::Host {
            log::warn!("Guest received an incoming connection request, ignoring");
            return;
        }
        log::info!("Incoming peer '{}'", peer_id);
        self.session.remote_id = Some(peer_id.clone());
        self.commands.push_back(Command::AcceptPeer { peer_id });
    }

    fn on_lookup_completed(&mut self, result: LookupResult, now: Instant) {
        if self.session.role != Role::Guest {
            return;
        }
        if !matches!(
            self.session.status,
            SessionStatus::Connecting | SessionStatus::Reconnecting
        ) {
            return;
        }

        if result.found {
            let peer_id = match result.peer_id {
                Some(id) => id,
                None => {
                    log::warn!("Lookup reported found without a peer id, treating as miss");
                    self.schedule_lookup_retry(now);
                    return;
                }
            };
            log::info!("Room resolved to peer '{}'", peer_id);
            self.next_discovery_at = None;
            self.session.remote_id = Some(peer_id.clone());
            self.commands.push_back(Command::ConnectPeer { peer_id });
        } else {
            self.schedule_lookup_retry(now);
        }
    }

    fn schedule_lookup_retry(&mut self, now: Instant) {
        if self.discovery_attempts >= self.config.discovery_max_attempts {
            self.fail(SessionError::DiscoveryTimeout {
                attempts: self.discovery_attempts,
            });
            return;
        }
        self.next_discovery_at = Some(now + self.config.discovery_retry_interval);
    }

    fn on_transport_state(&mut self, state: TransportState, now: Instant) {
        log::debug!("Transport state: {:?}", state);
        match state {
            TransportState::New | TransportState::Connecting => {}
            TransportState::Connected => {
                self.open_deadline = None;
                let timestamp = self.wire_timestamp(now);
                let request = self.messenger.on_channel_open(timestamp, now);
                self.transmit(&request);
            }
            TransportState::Disconnected => {
                self.messenger.on_channel_closed();
                self.request_recovery(
                    SessionError::TransportFailed("transport disconnected".to_string()),
                    now,
                );
            }
            TransportState::Failed => {
                self.messenger.on_channel_closed();
                self.request_recovery(
                    SessionError::TransportFailed("transport path failed".to_string()),
                    now,
                );
            }
            TransportState::Closed => {
                // Expected during teardown and full reconnection
                self.messenger.on_channel_closed();
            }
        }
    }

    fn on_data(&mut self, raw: &str, now: Instant) {
        let message = match decode_message(raw) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Dropping undecodable data-channel payload: {}", e);
                return;
            }
        };

        match message {
            Message::Ping { timestamp } => {
                self.send_protocol(Message::Pong { timestamp }, now);
            }
            Message::Pong { .. } => {
                self.health.record_pong(now);
            }
            Message::SyncRequest { .. } => {
                self.send_protocol(
                    Message::SyncAck {
                        timestamp: self.wire_timestamp(now),
                    },
                    now,
                );
            }
            Message::SyncAck { .. } => {
                let flushed = self.messenger.on_sync_ack(now);
                for msg in flushed {
                    self.transmit(&msg);
                }
                // A stray ack on a closed channel establishes nothing
                if self.messenger.is_synced() {
                    self.declare_connected(now);
                }
            }
            Message::Presence {
                peer_id,
                display_name,
            } => {
                self.session.remote_id = Some(peer_id.clone());
                self.notifications.push_back(Notification::PeerPresent {
                    peer_id,
                    display_name,
                });
            }
            msg @ (Message::Live { .. }
            | Message::Chat { .. }
            | Message::Emoji { .. }
            | Message::Clear {}) => {
                self.notifications
                    .push_back(Notification::MessageReceived(msg));
            }
        }
    }

    fn on_send_failed(&mut self, payload: &str, now: Instant) {
        match decode_message(payload) {
            Ok(msg) if !msg.is_protocol() => {
                // Absorbed: the message goes back to the head of the queue
                // and rides the next flush. Never surfaced to the caller.
                log::debug!("Send of {} failed, re-queueing", msg.kind());
                self.messenger.requeue_front(msg, now);
            }
            Ok(msg) => {
                log::debug!("Send of {} failed, dropping (protocol)", msg.kind());
            }
            Err(e) => {
                log::warn!("Send failure for undecodable payload: {}", e);
            }
        }
    }

    fn handle_health_event(&mut self, event: HealthEvent, now: Instant) {
        match event {
            HealthEvent::RequestStats => {
                self.commands.push_back(Command::SampleStats);
            }
            HealthEvent::SendPing => {
                self.send_protocol(
                    Message::Ping {
                        timestamp: self.wire_timestamp(now),
                    },
                    now,
                );
            }
            HealthEvent::StallDetected => {
                self.request_recovery(
                    SessionError::TransportFailed("media delivery stalled".to_string()),
                    now,
                );
            }
            HealthEvent::LinkSuspect => {
                self.request_recovery(SessionError::LinkStale, now);
            }
            HealthEvent::TierChanged(tier) => {
                self.notifications
                    .push_back(Notification::TierChanged(tier));
                if let Some(params) = self.adaptive.on_tier_change(tier) {
                    self.commands.push_back(Command::SetEncoding(params));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Route a degradation signal: lightweight restart first, escalating
    /// to a full reconnection when the restart budget is spent.
    fn request_recovery(&mut self, err: SessionError, now: Instant) {
        if self.session.status.is_terminal() {
            return;
        }
        // A full reconnection is already scheduled; let it run
        if self.reconnect.next_timeout().is_some() {
            return;
        }

        match self.reconnect.request_restart(now) {
            RecoveryAction::RestartPath => {
                self.commands.push_back(Command::RestartPath);
                self.set_status(SessionStatus::Reconnecting, &err.to_string());
            }
            RecoveryAction::Backoff { .. } => {
                self.begin_reconnect_wait(&err.to_string());
            }
            RecoveryAction::Throttled => {
                log::debug!("Path restart throttled ({})", err);
            }
            RecoveryAction::GiveUp => {
                self.fail(SessionError::RetriesExhausted {
                    attempts: self.config.reconnect_max_attempts,
                });
            }
        }
    }

    /// Skip the restart tier and go straight to a full reconnection
    /// (used when there is no live transport to restart).
    fn escalate_reconnect(&mut self, err: &SessionError, now: Instant) {
        if self.reconnect.next_timeout().is_some() {
            return;
        }
        match self.reconnect.schedule_reconnect(now) {
            RecoveryAction::Backoff { .. } => {
                self.begin_reconnect_wait(&err.to_string());
            }
            RecoveryAction::GiveUp => {
                self.fail(SessionError::RetriesExhausted {
                    attempts: self.config.reconnect_max_attempts,
                });
            }
            // schedule_reconnect only returns Backoff or GiveUp
            _ => {}
        }
    }

    fn begin_reconnect_wait(&mut self, reason: &str) {
        self.commands.push_back(Command::CloseTransport);
        self.messenger.on_channel_closed();
        self.set_status(SessionStatus::Reconnecting, reason);
    }

    /// A scheduled full reconnection is due: recreate the transport and
    /// re-run the role's connect path.
    fn execute_reconnect(&mut self, now: Instant) {
        log::info!(
            "Executing full reconnect attempt {}",
            self.reconnect.reconnect_attempts()
        );
        self.commands.push_back(Command::OpenTransport);
        self.open_deadline = Some(now + self.config.open_timeout);

        match self.session.role {
            Role::Host => {
                self.commands.push_back(Command::Register {
                    room_id: self.room_id.clone(),
                    peer_id: self.session.self_id.clone(),
                    display_name: self.display_name.clone(),
                });
                self.set_status(SessionStatus::Waiting, "awaiting peer after reconnect");
            }
            Role::Guest => {
                self.discovery_attempts = 1;
                self.commands.push_back(Command::Lookup {
                    room_id: self.room_id.clone(),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Sync completed (ack or fallback): the session is live
    fn declare_connected(&mut self, now: Instant) {
        if self.session.status == SessionStatus::Connected {
            return;
        }
        self.set_status(SessionStatus::Connected, "sync handshake complete");
        self.open_deadline = None;
        self.next_discovery_at = None;
        self.reconnect.on_connected();
        self.health.activate(now);
        self.adaptive.reset();

        self.send_protocol(
            Message::Presence {
                peer_id: self.session.self_id.clone(),
                display_name: self.display_name.clone(),
            },
            now,
        );
    }

    /// Send a protocol message through the messenger's direct path
    fn send_protocol(&mut self, message: Message, now: Instant) {
        match self.messenger.send(message, now) {
            SendOutcome::Transmit(msg) => self.transmit(&msg),
            SendOutcome::Queued | SendOutcome::Dropped => {}
        }
    }

    /// Encode and emit a wire payload
    fn transmit(&mut self, message: &Message) {
        match encode_message(message) {
            Ok(payload) => self.commands.push_back(Command::SendData(payload)),
            Err(e) => log::error!("Failed to encode {}: {}", message.kind(), e),
        }
    }

    /// Enter terminal `Failed`
    fn fail(&mut self, err: SessionError) {
        log::error!("Session failed: {}", err);
        self.cancel_timers();
        self.messenger.on_channel_closed();
        self.messenger.clear();
        self.commands.push_back(Command::CloseTransport);
        self.set_status(SessionStatus::Failed, &err.to_string());
    }

    fn cancel_timers(&mut self) {
        self.next_discovery_at = None;
        self.open_deadline = None;
        self.health.deactivate();
        self.reconnect.cancel_pending();
    }

    /// Wire timestamp for outbound protocol messages: milliseconds since
    /// the session was created. Peers echo timestamps back opaquely, so a
    /// session-relative clock works and keeps the controller off the wall
    /// clock entirely.
    fn wire_timestamp(&self, now: Instant) -> u64 {
        now.duration_since(self.session.created_at).as_millis() as u64
    }

    fn set_status(&mut self, status: SessionStatus, reason: &str) {
        if self.session.status == status {
            return;
        }
        log::info!(
            "Session status {:?} -> {:?} ({})",
            self.session.status,
            status,
            reason
        );
        self.session.status = status;
        self.notifications.push_back(Notification::StatusChanged {
            status,
            reason: reason.to_string(),
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const CAPS: TransportCapabilities = TransportCapabilities {
        data_channel: true,
        media: true,
    };

    fn host(now: Instant) -> SessionController {
        SessionController::new(
            Role::Host,
            "host-1",
            "Ana",
            "ABC123",
            SessionConfig::default(),
            now,
        )
    }

    fn guest(now: Instant) -> SessionController {
        SessionController::new(
            Role::Guest,
            "guest-1",
            "Ben",
            "ABC123",
            SessionConfig::default(),
            now,
        )
    }

    fn drain_commands(ctl: &mut SessionController) -> Vec<Command> {
        std::iter::from_fn(|| ctl.poll_command()).collect()
    }

    fn drain_notifications(ctl: &mut SessionController) -> Vec<Notification> {
        std::iter::from_fn(|| ctl.poll_notification()).collect()
    }

    /// Drive a controller through transport-connected and the sync
    /// handshake so it reaches Connected.
    fn bring_up(ctl: &mut SessionController, now: Instant) {
        ctl.handle_event(SessionEvent::TransportState(TransportState::Connected), now);
        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::SyncAck { timestamp: 1 }).unwrap(),
            ),
            now,
        );
        assert_eq!(ctl.status(), SessionStatus::Connected);
        drain_commands(ctl);
        drain_notifications(ctl);
    }

    #[test]
    fn test_host_start_registers_and_waits() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();

        assert_eq!(ctl.status(), SessionStatus::Waiting);
        let commands = drain_commands(&mut ctl);
        assert_eq!(commands[0], Command::OpenTransport);
        assert!(matches!(&commands[1], Command::Register { room_id, .. } if room_id == "ABC123"));
    }

    #[test]
    fn test_guest_start_looks_up() {
        let t0 = Instant::now();
        let mut ctl = guest(t0);
        ctl.start(&CAPS, t0).unwrap();

        assert_eq!(ctl.status(), SessionStatus::Connecting);
        let commands = drain_commands(&mut ctl);
        assert_eq!(commands[0], Command::OpenTransport);
        assert!(matches!(&commands[1], Command::Lookup { room_id } if room_id == "ABC123"));
    }

    #[test]
    fn test_missing_capability_is_fatal() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        let err = ctl
            .start(
                &TransportCapabilities {
                    data_channel: false,
                    media: true,
                },
                t0,
            )
            .unwrap_err();

        assert_eq!(err, SessionError::CapabilityMissing("data channel"));
        assert_eq!(ctl.status(), SessionStatus::Failed);
        assert!(ctl.next_timeout().is_none());
    }

    #[test]
    fn test_guest_discovery_timeout_is_terminal() {
        let t0 = Instant::now();
        let mut ctl = guest(t0);
        ctl.start(&CAPS, t0).unwrap();

        let mut now = t0;
        // Five lookups all miss
        for _ in 0..5 {
            ctl.handle_event(SessionEvent::LookupCompleted(LookupResult::not_found()), now);
            if let Some(at) = ctl.next_timeout() {
                now = at;
                ctl.on_timeout(now);
            }
        }

        assert_eq!(ctl.status(), SessionStatus::Failed);
        assert!(ctl.next_timeout().is_none());
    }

    #[test]
    fn test_guest_found_connects() {
        let t0 = Instant::now();
        let mut ctl = guest(t0);
        ctl.start(&CAPS, t0).unwrap();
        drain_commands(&mut ctl);

        ctl.handle_event(
            SessionEvent::LookupCompleted(LookupResult::found("host-1", "Ana")),
            t0,
        );

        let commands = drain_commands(&mut ctl);
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::ConnectPeer { peer_id } if peer_id == "host-1")));
        assert_eq!(ctl.session().remote_id.as_deref(), Some("host-1"));
    }

    #[test]
    fn test_host_accepts_incoming_peer() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        drain_commands(&mut ctl);

        ctl.handle_event(
            SessionEvent::IncomingPeer {
                peer_id: "guest-1".to_string(),
            },
            t0,
        );

        let commands = drain_commands(&mut ctl);
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::AcceptPeer { peer_id } if peer_id == "guest-1")));
    }

    #[test]
    fn test_sync_ack_declares_connected_and_sends_presence() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        drain_commands(&mut ctl);

        ctl.handle_event(SessionEvent::TransportState(TransportState::Connected), t0);
        let commands = drain_commands(&mut ctl);
        // Channel open triggers the sync-request
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::SendData(p) if p.contains("sync-request"))));

        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::SyncAck { timestamp: 1 }).unwrap(),
            ),
            t0 + Duration::from_millis(50),
        );
        assert_eq!(ctl.status(), SessionStatus::Connected);

        let commands = drain_commands(&mut ctl);
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::SendData(p) if p.contains("presence"))));
    }

    #[test]
    fn test_stray_sync_ack_without_open_channel_is_ignored() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        drain_commands(&mut ctl);

        // Reordered delivery: an ack arrives before the transport ever
        // reported Connected. It must not fake a live session.
        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::SyncAck { timestamp: 1 }).unwrap(),
            ),
            t0,
        );
        assert_eq!(ctl.status(), SessionStatus::Waiting);
        assert!(!ctl.is_synced());

        // A real bring-up afterwards still works
        ctl.handle_event(SessionEvent::TransportState(TransportState::Connected), t0);
        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::SyncAck { timestamp: 2 }).unwrap(),
            ),
            t0,
        );
        assert_eq!(ctl.status(), SessionStatus::Connected);
        assert!(ctl.is_synced());
    }

    #[test]
    fn test_two_missed_pongs_enter_reconnecting() {
        let t0 = Instant::now();
        let config = SessionConfig::default();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);

        let hb = config.heartbeat_interval;
        // Ping at the first tick, one miss at the second: no reaction yet
        ctl.on_timeout(t0 + hb);
        ctl.on_timeout(t0 + hb * 2);
        assert_eq!(ctl.status(), SessionStatus::Connected);

        // Second consecutive miss: the link is presumed dead and recovery
        // starts with a lightweight path restart
        ctl.on_timeout(t0 + hb * 3);
        assert_eq!(ctl.status(), SessionStatus::Reconnecting);
        let commands = drain_commands(&mut ctl);
        assert!(commands.contains(&Command::RestartPath));
    }

    #[test]
    fn test_wire_timestamps_are_session_relative() {
        let t0 = Instant::now();
        let config = SessionConfig::default();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);

        ctl.on_timeout(t0 + config.heartbeat_interval);
        let ping = drain_commands(&mut ctl).into_iter().find_map(|c| match c {
            Command::SendData(p) => match decode_message(&p) {
                Ok(Message::Ping { timestamp }) => Some(timestamp),
                _ => None,
            },
            _ => None,
        });
        assert_eq!(ping, Some(config.heartbeat_interval.as_millis() as u64));
    }

    #[test]
    fn test_inbound_ping_answered_with_pong() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);

        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::Ping { timestamp: 777 }).unwrap(),
            ),
            t0,
        );

        let commands = drain_commands(&mut ctl);
        let pong = commands.iter().find_map(|c| match c {
            Command::SendData(p) => decode_message(p).ok(),
            _ => None,
        });
        assert_eq!(pong, Some(Message::Pong { timestamp: 777 }));
    }

    #[test]
    fn test_inbound_sync_request_answered_with_ack() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        ctl.handle_event(SessionEvent::TransportState(TransportState::Connected), t0);
        drain_commands(&mut ctl);

        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::SyncRequest { timestamp: 5 }).unwrap(),
            ),
            t0,
        );

        let commands = drain_commands(&mut ctl);
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::SendData(p) if p.contains("sync-ack"))));
    }

    #[test]
    fn test_messages_queued_while_down_flush_in_order() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        drain_commands(&mut ctl);

        ctl.send(
            Message::Chat {
                text: "A".to_string(),
            },
            t0,
        );
        ctl.send(
            Message::Chat {
                text: "B".to_string(),
            },
            t0,
        );
        assert_eq!(ctl.queued_messages(), 2);
        assert!(drain_commands(&mut ctl).is_empty());

        ctl.handle_event(SessionEvent::TransportState(TransportState::Connected), t0);
        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::SyncAck { timestamp: 1 }).unwrap(),
            ),
            t0,
        );

        let sent: Vec<Message> = drain_commands(&mut ctl)
            .into_iter()
            .filter_map(|c| match c {
                Command::SendData(p) => decode_message(&p).ok(),
                _ => None,
            })
            .collect();

        let texts: Vec<&str> = sent
            .iter()
            .filter_map(|m| match m {
                Message::Chat { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[test]
    fn test_transport_failure_requests_path_restart() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);

        ctl.handle_event(SessionEvent::TransportState(TransportState::Failed), t0);

        assert_eq!(ctl.status(), SessionStatus::Reconnecting);
        let commands = drain_commands(&mut ctl);
        assert!(commands.contains(&Command::RestartPath));
    }

    #[test]
    fn test_open_timeout_schedules_full_reconnect() {
        let t0 = Instant::now();
        let mut ctl = guest(t0);
        ctl.start(&CAPS, t0).unwrap();
        drain_commands(&mut ctl);

        let config = SessionConfig::default();
        ctl.on_timeout(t0 + config.open_timeout);

        assert_eq!(ctl.status(), SessionStatus::Reconnecting);
        let commands = drain_commands(&mut ctl);
        assert!(commands.contains(&Command::CloseTransport));
        // Backoff deadline armed for the reconnect attempt
        assert!(ctl.next_timeout().is_some());
    }

    #[test]
    fn test_double_disconnect_is_idempotent() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);

        ctl.disconnect();
        assert_eq!(ctl.status(), SessionStatus::Disconnected);
        let first_commands = drain_commands(&mut ctl);
        assert!(first_commands.contains(&Command::CloseTransport));
        assert!(first_commands
            .iter()
            .any(|c| matches!(c, Command::Deregister { .. })));
        let first_notifications = drain_notifications(&mut ctl);
        assert_eq!(
            first_notifications
                .iter()
                .filter(|n| matches!(n, Notification::StatusChanged { .. }))
                .count(),
            1
        );

        ctl.disconnect();
        assert!(drain_commands(&mut ctl).is_empty());
        assert!(drain_notifications(&mut ctl).is_empty());
        assert!(ctl.next_timeout().is_none());
    }

    #[test]
    fn test_terminal_session_ignores_events_and_timers() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        ctl.disconnect();
        drain_commands(&mut ctl);
        drain_notifications(&mut ctl);

        ctl.handle_event(SessionEvent::TransportState(TransportState::Failed), t0);
        ctl.on_timeout(t0 + Duration::from_secs(120));
        ctl.send(
            Message::Chat {
                text: "late".to_string(),
            },
            t0,
        );

        assert!(drain_commands(&mut ctl).is_empty());
        assert!(drain_notifications(&mut ctl).is_empty());
        assert_eq!(ctl.status(), SessionStatus::Disconnected);
    }

    #[test]
    fn test_presence_fills_remote_identity() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);

        ctl.handle_event(
            SessionEvent::DataReceived(
                encode_message(&Message::Presence {
                    peer_id: "guest-1".to_string(),
                    display_name: "Ben".to_string(),
                })
                .unwrap(),
            ),
            t0,
        );

        assert_eq!(ctl.session().remote_id.as_deref(), Some("guest-1"));
        let notifications = drain_notifications(&mut ctl);
        assert!(notifications.iter().any(|n| matches!(
            n,
            Notification::PeerPresent { peer_id, .. } if peer_id == "guest-1"
        )));
    }

    #[test]
    fn test_tier_change_applies_encoding() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);
        let config = SessionConfig::default();

        // Baseline sample
        ctl.handle_event(
            SessionEvent::StatsSample(RawStats {
                bytes_received: 0,
                packets_received: 0,
                packets_lost: 0,
                frames_decoded: 0,
                jitter_sec: 0.01,
                rtt_sec: 0.05,
                sampled_at: t0 + Duration::from_millis(100),
            }),
            t0 + Duration::from_millis(100),
        );

        // Quality tick arms classification
        ctl.on_timeout(t0 + config.quality_interval);
        drain_commands(&mut ctl);

        // Starved link over the window: ~40 kbps with 20% loss
        let at = t0 + config.quality_interval + Duration::from_millis(100);
        ctl.handle_event(
            SessionEvent::StatsSample(RawStats {
                bytes_received: 10_000,
                packets_received: 80,
                packets_lost: 20,
                frames_decoded: 30,
                jitter_sec: 0.01,
                rtt_sec: 0.05,
                sampled_at: at,
            }),
            at,
        );

        let commands = drain_commands(&mut ctl);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::SetEncoding(params) if params.resolution_scale_down == 2.0
        )));
        let notifications = drain_notifications(&mut ctl);
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::TierChanged(QualityTier::Poor))));
    }

    #[test]
    fn test_sync_fallback_connects_without_ack() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        ctl.handle_event(SessionEvent::TransportState(TransportState::Connected), t0);
        drain_commands(&mut ctl);
        assert_ne!(ctl.status(), SessionStatus::Connected);

        let config = SessionConfig::default();
        ctl.on_timeout(t0 + config.sync_fallback_window);

        assert_eq!(ctl.status(), SessionStatus::Connected);
        assert!(ctl.is_synced());
    }

    #[test]
    fn test_send_failure_requeues_message() {
        let t0 = Instant::now();
        let mut ctl = host(t0);
        ctl.start(&CAPS, t0).unwrap();
        bring_up(&mut ctl, t0);

        let payload = encode_message(&Message::Chat {
            text: "lost".to_string(),
        })
        .unwrap();
        ctl.handle_event(SessionEvent::SendFailed { payload }, t0);

        assert_eq!(ctl.queued_messages(), 1);
        // No error notification: the failure is absorbed
        assert!(drain_notifications(&mut ctl).is_empty());
    }
}
