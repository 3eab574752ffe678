//! Session tunables
//!
//! Every interval, timeout, and attempt cap used by the controllers lives
//! here as a named field with a canonical default, injected at construction
//! instead of being scattered across modules as ad hoc constants.

use std::time::Duration;

/// Tunable parameters for one peer session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between Guest rendezvous lookup attempts
    pub discovery_retry_interval: Duration,
    /// Maximum number of Guest lookup attempts before giving up
    pub discovery_max_attempts: u32,
    /// Budget for the transport to reach Connected after a connect attempt
    pub open_timeout: Duration,
    /// How long to wait for a sync-ack before assuming the channel is synced
    pub sync_fallback_window: Duration,
    /// Freeze-detector sampling interval
    pub freeze_interval: Duration,
    /// Consecutive near-zero frame deltas that flag a stall
    pub freeze_stall_threshold: u32,
    /// Quality-classifier interval
    pub quality_interval: Duration,
    /// Heartbeat ping interval
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered heartbeats before the link is presumed dead
    pub heartbeat_miss_limit: u32,
    /// Minimum spacing between lightweight path restarts
    pub restart_min_interval: Duration,
    /// Path restarts attempted before escalating to a full reconnect
    pub restart_max_attempts: u32,
    /// Base delay for full-reconnect exponential backoff
    pub backoff_base: Duration,
    /// Ceiling on the full-reconnect backoff delay
    pub backoff_cap: Duration,
    /// Hard ceiling on full reconnection attempts
    pub reconnect_max_attempts: u32,
    /// Lifetime of a room registration in the rendezvous store
    pub room_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_retry_interval: Duration::from_secs(1),
            discovery_max_attempts: 5,
            open_timeout: Duration::from_secs(15),
            sync_fallback_window: Duration::from_secs(3),
            freeze_interval: Duration::from_secs(1),
            freeze_stall_threshold: 3,
            quality_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_miss_limit: 2,
            restart_min_interval: Duration::from_secs(2),
            restart_max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
            reconnect_max_attempts: 10,
            room_ttl: Duration::from_secs(300),
        }
    }
}
