//! Queued, ordered delivery over the peer data channel
//!
//! The underlying channel reporting "open" only proves the local half.
//! Before trusting it for queued delivery, the messenger runs a sync
//! handshake:
//!
//! ```text
//! A                                   B
//! │─── sync-request {timestamp} ─────►│
//! │◄─── sync-ack {timestamp} ─────────│
//! │   (A marks the channel synced     │
//! │    and flushes its queue)         │
//! ```
//!
//! Application messages sent before sync completes are held in a FIFO queue
//! and flushed in enqueue order once it does, so nothing is silently lost
//! over a one-way-open channel. Protocol messages bypass the synced gate;
//! they are the mechanism that establishes sync.
//!
//! If no sync-ack arrives within the fallback window while the channel
//! stays open, the messenger assumes sync anyway (logged, not fatal) rather
//! than wedging the queue forever behind a peer that never acks.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::message::Message;

// ============================================================================
// Queue Types
// ============================================================================

/// A message awaiting a synced channel
#[derive(Debug, Clone)]
struct QueuedMessage {
    message: Message,
    /// When `send` was called; queue wait time is logged on flush
    enqueued_at: Instant,
}

/// Outcome of a send call
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Transmit this message on the data channel now
    Transmit(Message),
    /// The message was queued for delivery after sync
    Queued,
    /// The message was dropped (protocol message on a closed channel)
    Dropped,
}

// ============================================================================
// Reliable Messenger
// ============================================================================

/// Ordered delivery with a sync handshake gating the pending queue
#[derive(Debug)]
pub struct ReliableMessenger {
    channel_open: bool,
    synced: bool,
    /// When the sync-request went out; drives the fallback window
    sync_requested_at: Option<Instant>,
    sync_fallback_window: Duration,
    pending: VecDeque<QueuedMessage>,
}

impl ReliableMessenger {
    /// Create a messenger over a closed, unsynced channel
    pub fn new(sync_fallback_window: Duration) -> Self {
        Self {
            channel_open: false,
            synced: false,
            sync_requested_at: None,
            sync_fallback_window,
            pending: VecDeque::new(),
        }
    }

    /// Whether the sync handshake has completed
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Whether the underlying channel is open
    pub fn is_open(&self) -> bool {
        self.channel_open
    }

    /// Number of messages awaiting sync
    pub fn queued_len(&self) -> usize {
        self.pending.len()
    }

    /// Deadline of the sync fallback (if the handshake is outstanding)
    pub fn next_timeout(&self) -> Option<Instant> {
        match (self.channel_open, self.synced, self.sync_requested_at) {
            (true, false, Some(at)) => Some(at + self.sync_fallback_window),
            _ => None,
        }
    }

    /// The channel came up: begin the sync handshake
    ///
    /// Returns the sync-request to transmit.
    pub fn on_channel_open(&mut self, timestamp: u64, now: Instant) -> Message {
        self.channel_open = true;
        self.synced = false;
        self.sync_requested_at = Some(now);
        log::debug!("Data channel open, starting sync handshake");
        Message::SyncRequest { timestamp }
    }

    /// The channel went down: drop sync state, keep the queue
    pub fn on_channel_closed(&mut self) {
        self.channel_open = false;
        self.synced = false;
        self.sync_requested_at = None;
    }

    /// Peer acknowledged our sync-request
    ///
    /// Returns queued messages to transmit, in enqueue order. An ack
    /// arriving while the channel is closed (stray or reordered delivery)
    /// is ignored; sync can only be established over an open channel.
    pub fn on_sync_ack(&mut self, now: Instant) -> Vec<Message> {
        if !self.channel_open {
            log::debug!("Ignoring sync-ack on closed channel");
            return Vec::new();
        }
        if self.synced {
            return Vec::new();
        }
        self.synced = true;
        self.sync_requested_at = None;
        log::debug!("Sync handshake complete, flushing {} queued", self.pending.len());
        self.flush(now)
    }

    /// Check the sync fallback window
    ///
    /// Returns queued messages to transmit if the fallback fired.
    pub fn check_sync_fallback(&mut self, now: Instant) -> Option<Vec<Message>> {
        if self.synced || !self.channel_open {
            return None;
        }
        let requested_at = self.sync_requested_at?;
        if now.duration_since(requested_at) < self.sync_fallback_window {
            return None;
        }

        log::warn!("No sync-ack within fallback window, assuming channel is synced");
        self.synced = true;
        self.sync_requested_at = None;
        Some(self.flush(now))
    }

    /// Send a message: transmit now if possible, queue otherwise
    ///
    /// Protocol messages bypass the synced gate but are never queued; a
    /// ping on a closed channel is dropped and regenerated by its timer.
    pub fn send(&mut self, message: Message, now: Instant) -> SendOutcome {
        if message.is_protocol() {
            if self.channel_open {
                return SendOutcome::Transmit(message);
            }
            log::debug!("Dropping {} on closed channel", message.kind());
            return SendOutcome::Dropped;
        }

        if self.channel_open && self.synced {
            return SendOutcome::Transmit(message);
        }

        self.pending.push_back(QueuedMessage {
            message,
            enqueued_at: now,
        });
        SendOutcome::Queued
    }

    /// Put a message back at the head of the queue after a failed transmit,
    /// preserving delivery order
    pub fn requeue_front(&mut self, message: Message, now: Instant) {
        log::debug!("Re-queueing {} after failed send", message.kind());
        self.pending.push_front(QueuedMessage {
            message,
            enqueued_at: now,
        });
    }

    /// Drain the pending queue in FIFO order
    fn flush(&mut self, now: Instant) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.pending.len());
        while let Some(queued) = self.pending.pop_front() {
            log::debug!(
                "Flushing {} queued for {:?}",
                queued.message.kind(),
                now.duration_since(queued.enqueued_at)
            );
            out.push(queued.message);
        }
        out
    }

    /// Drop all queued messages; called on session teardown
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
