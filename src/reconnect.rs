//! Recovery decisions for a degraded or dead session
//!
//! Two recovery tiers, tried in order:
//!
//! 1. **Lightweight path restart** — renegotiate the transport's network
//!    path without tearing the session down. Throttled to one attempt per
//!    minimum interval, with a small cap before escalating.
//! 2. **Full reconnection** — close and recreate the transport, then re-run
//!    the whole connect path, under exponential backoff with a hard attempt
//!    ceiling. Crossing the ceiling is terminal.
//!
//! Counters reset only on confirmed re-entry into Connected, so a flapping
//! link cannot reset its own budget.

use std::time::{Duration, Instant};

use crate::config::SessionConfig;

// ============================================================================
// Recovery Actions
// ============================================================================

/// What the session controller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Issue a lightweight path restart on the existing transport
    RestartPath,
    /// Tear the transport down and retry the connect path after `delay`
    Backoff {
        /// Delay before the reconnect attempt fires
        delay: Duration,
        /// Which full-reconnect attempt this is (1-based)
        attempt: u32,
    },
    /// A restart was requested too soon after the previous one
    Throttled,
    /// The attempt ceiling is exhausted; the session is lost
    GiveUp,
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff delay for a full-reconnect attempt (1-based)
///
/// `delay = min(base * 2^(attempt-1), cap)`
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let delay = base.saturating_mul(1u32 << exponent);
    delay.min(cap)
}

// ============================================================================
// Reconnection Controller
// ============================================================================

/// Decides between path restarts and full reconnections, with budgets
#[derive(Debug)]
pub struct ReconnectionController {
    restart_min_interval: Duration,
    restart_max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    reconnect_max_attempts: u32,

    restart_attempts: u32,
    last_restart_at: Option<Instant>,

    reconnect_attempts: u32,
    next_reconnect_at: Option<Instant>,
}

impl ReconnectionController {
    /// Create a controller with fresh budgets
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            restart_min_interval: config.restart_min_interval,
            restart_max_attempts: config.restart_max_attempts,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            reconnect_max_attempts: config.reconnect_max_attempts,
            restart_attempts: 0,
            last_restart_at: None,
            reconnect_attempts: 0,
            next_reconnect_at: None,
        }
    }

    /// Number of full-reconnect attempts made since the last Connected
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// When the next scheduled reconnect attempt fires
    pub fn next_timeout(&self) -> Option<Instant> {
        self.next_reconnect_at
    }

    /// Request a lightweight path restart
    ///
    /// Escalates to a full reconnection once the restart budget is spent.
    pub fn request_restart(&mut self, now: Instant) -> RecoveryAction {
        if self.restart_attempts >= self.restart_max_attempts {
            log::info!(
                "Path restart budget spent ({} attempts), escalating to full reconnect",
                self.restart_attempts
            );
            return self.schedule_reconnect(now);
        }

        if let Some(last) = self.last_restart_at {
            if now.duration_since(last) < self.restart_min_interval {
                return RecoveryAction::Throttled;
            }
        }

        self.restart_attempts += 1;
        self.last_restart_at = Some(now);
        log::info!(
            "Requesting path restart (attempt {}/{})",
            self.restart_attempts,
            self.restart_max_attempts
        );
        RecoveryAction::RestartPath
    }

    /// Schedule a full reconnection attempt under backoff
    pub fn schedule_reconnect(&mut self, now: Instant) -> RecoveryAction {
        if self.reconnect_attempts >= self.reconnect_max_attempts {
            log::error!(
                "Reconnect ceiling reached ({} attempts), giving up",
                self.reconnect_attempts
            );
            return RecoveryAction::GiveUp;
        }

        self.reconnect_attempts += 1;
        let delay = backoff_delay(self.reconnect_attempts, self.backoff_base, self.backoff_cap);
        self.next_reconnect_at = Some(now + delay);
        log::info!(
            "Scheduling reconnect attempt {}/{} in {:?}",
            self.reconnect_attempts,
            self.reconnect_max_attempts,
            delay
        );
        RecoveryAction::Backoff {
            delay,
            attempt: self.reconnect_attempts,
        }
    }

    /// Whether a scheduled reconnect attempt is due; consumes the deadline
    pub fn take_due_reconnect(&mut self, now: Instant) -> bool {
        match self.next_reconnect_at {
            Some(at) if now >= at => {
                self.next_reconnect_at = None;
                true
            }
            _ => false,
        }
    }

    /// Drop any scheduled attempt without resetting budgets
    pub fn cancel_pending(&mut self) {
        self.next_reconnect_at = None;
    }

    /// Confirmed re-entry into Connected: all budgets reset
    pub fn on_connected(&mut self) {
        if self.restart_attempts > 0 || self.reconnect_attempts > 0 {
            log::info!(
                "Session recovered after {} restarts / {} reconnects",
                self.restart_attempts,
                self.reconnect_attempts
            );
        }
        self.restart_attempts = 0;
        self.last_restart_at = None;
        self.reconnect_attempts = 0;
        self.next_reconnect_at = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
