//! peerlink - peer session manager
//!
//! Establishes, monitors, heals, and adapts one two-party real-time
//! session. The crate is transport-agnostic and does no I/O of its own:
//! [`SessionController`] is a pure state machine that consumes
//! [`SessionEvent`]s, emits [`Command`]s for an embedding driver to
//! execute, and surfaces [`Notification`]s to the application.
//!
//! # Modules
//!
//! - [`session`]: the session lifecycle state machine and orchestration
//! - [`messenger`]: ordered delivery with a sync handshake over the data channel
//! - [`health`]: freeze detection, quality classification, heartbeat liveness
//! - [`reconnect`]: two-tier recovery with exponential backoff
//! - [`adaptive`]: encoding parameters per quality tier
//! - [`message`]: the JSON wire protocol
//! - [`rendezvous`]: TTL-bound room registry for peer discovery
//! - [`config`]: tunable intervals and budgets
//! - [`error`]: session error taxonomy

pub mod adaptive;
pub mod config;
pub mod error;
pub mod health;
pub mod message;
pub mod messenger;
pub mod reconnect;
pub mod rendezvous;
pub mod session;

pub use adaptive::{AdaptiveTransmissionController, EncodingParameters};
pub use config::SessionConfig;
pub use error::SessionError;
pub use health::{HealthEvent, HealthMonitor, LinkStats, QualityTier, RawStats};
pub use message::{decode_message, encode_message, Message, MAX_MESSAGE_SIZE};
pub use messenger::{ReliableMessenger, SendOutcome};
pub use reconnect::{backoff_delay, ReconnectionController, RecoveryAction};
pub use rendezvous::{LookupResult, RoomStore};
pub use session::{
    Command, Notification, Role, Session, SessionController, SessionEvent, SessionStatus,
    TransportCapabilities, TransportState,
};
