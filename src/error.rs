//! Session error types
//!
//! Recoverable conditions (transport hiccups, missed heartbeats, failed
//! sends) are absorbed internally and show up only as status transitions.
//! Only two kinds ever reach the caller as terminal failures: exhausted
//! retries and a missing capability at startup.

use std::fmt;

/// Errors raised by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Guest exhausted its bounded rendezvous lookup retries
    DiscoveryTimeout {
        /// Number of lookups attempted before giving up
        attempts: u32,
    },
    /// Transport did not reach Connected within the open-timeout budget
    TransportOpenTimeout,
    /// Transport reported an unrecoverable path failure
    TransportFailed(String),
    /// Heartbeat miss threshold reached, link presumed dead
    LinkStale,
    /// A required transport or media capability is absent at startup
    CapabilityMissing(&'static str),
    /// Direct send of a queued message failed
    SendFailure(String),
    /// Reconnection attempt ceiling reached
    RetriesExhausted {
        /// Number of full reconnection attempts made
        attempts: u32,
    },
}

impl SessionError {
    /// Whether this error is terminal (no recovery path exists)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::DiscoveryTimeout { .. }
                | SessionError::CapabilityMissing(_)
                | SessionError::RetriesExhausted { .. }
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DiscoveryTimeout { attempts } => {
                write!(f, "peer discovery timed out after {} lookups", attempts)
            }
            SessionError::TransportOpenTimeout => {
                write!(f, "transport did not open within the allotted time")
            }
            SessionError::TransportFailed(reason) => {
                write!(f, "transport failed: {}", reason)
            }
            SessionError::LinkStale => write!(f, "link stale: heartbeat misses exceeded budget"),
            SessionError::CapabilityMissing(cap) => {
                write!(f, "required capability missing: {}", cap)
            }
            SessionError::SendFailure(reason) => write!(f, "send failed: {}", reason),
            SessionError::RetriesExhausted { attempts } => {
                write!(f, "gave up after {} reconnection attempts", attempts)
            }
        }
    }
}

impl std::error::Error for SessionError {}
