//! Wire messages for the peer data channel
//!
//! Every message travels as a JSON object with the shape:
//!
//! ```text
//! { "type": "<kind>", "data": { ... } }
//! ```
//!
//! The set of kinds is closed: decoding anything outside it is an error,
//! and handling is an exhaustive match rather than a dynamic field probe.
//!
//! Kinds split into two groups:
//! - protocol messages (`ping`, `pong`, `sync-request`, `sync-ack`,
//!   `presence`) that keep the channel alive and establish sync, and
//! - application messages (`live`, `message`, `emoji`, `clear`) that only
//!   flow once the sync handshake has completed.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Maximum encoded message size (the data channel carries short payloads)
pub const MAX_MESSAGE_SIZE: usize = 16384;

// ============================================================================
// Message Type
// ============================================================================

/// A data-channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Message {
    /// Heartbeat probe; `timestamp` is echoed back in the pong
    Ping { timestamp: u64 },
    /// Heartbeat reply carrying the timestamp from the ping
    Pong { timestamp: u64 },
    /// First half of the sync handshake, sent when the channel opens
    SyncRequest { timestamp: u64 },
    /// Second half of the sync handshake; proves both directions work
    SyncAck { timestamp: u64 },
    /// Identity announcement sent after sync completes
    Presence {
        peer_id: String,
        display_name: String,
    },
    /// In-progress caption text, replaced as the speaker continues
    Live { text: String },
    /// Finalized text message
    #[serde(rename = "message")]
    Chat { text: String },
    /// Emoji reaction
    Emoji { emoji: String },
    /// Clear any displayed captions on the remote side
    Clear {},
}

impl Message {
    /// Protocol messages bypass the synced gate; they are the mechanism
    /// that establishes sync in the first place.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Message::Ping { .. }
                | Message::Pong { .. }
                | Message::SyncRequest { .. }
                | Message::SyncAck { .. }
                | Message::Presence { .. }
        )
    }

    /// Wire name of this message's kind (for logging)
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::SyncRequest { .. } => "sync-request",
            Message::SyncAck { .. } => "sync-ack",
            Message::Presence { .. } => "presence",
            Message::Live { .. } => "live",
            Message::Chat { .. } => "message",
            Message::Emoji { .. } => "emoji",
            Message::Clear {} => "clear",
        }
    }
}

// ============================================================================
// Encoding/Decoding
// ============================================================================

/// Encode a message as a JSON string
pub fn encode_message(msg: &Message) -> Result<String, EncodeError> {
    let encoded =
        serde_json::to_string(msg).map_err(|e| EncodeError::Serialization(e.to_string()))?;

    if encoded.len() > MAX_MESSAGE_SIZE {
        return Err(EncodeError::MessageTooLarge(encoded.len()));
    }

    Ok(encoded)
}

/// Decode a message from a JSON string
pub fn decode_message(raw: &str) -> Result<Message, DecodeError> {
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(DecodeError::MessageTooLarge(raw.len()));
    }

    serde_json::from_str(raw).map_err(|e| DecodeError::Deserialization(e.to_string()))
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during message encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Serialization failed
    Serialization(String),
    /// Message exceeds maximum size
    MessageTooLarge(usize),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Serialization(e) => write!(f, "serialization error: {}", e),
            EncodeError::MessageTooLarge(size) => {
                write!(
                    f,
                    "message too large: {} bytes (max {})",
                    size, MAX_MESSAGE_SIZE
                )
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// Errors that can occur during message decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Deserialization failed
    Deserialization(String),
    /// Message exceeds maximum size
    MessageTooLarge(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Deserialization(e) => write!(f, "deserialization error: {}", e),
            DecodeError::MessageTooLarge(size) => {
                write!(
                    f,
                    "message too large: {} bytes (max {})",
                    size, MAX_MESSAGE_SIZE
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ============================================================================
// Tests
// ============================================================================
