//! Link health monitoring
//!
//! Three independent timers run while a session is connected or recovering:
//!
//! 1. **Freeze detector** — compares `frames_decoded` deltas between
//!    successive stats samples; consecutive near-zero deltas flag a stalled
//!    media path.
//! 2. **Quality classifier** — derives bitrate and packet-loss percentage
//!    from counter deltas, reads jitter/RTT from the freshest sample, and
//!    buckets the link into a [`QualityTier`].
//! 3. **Heartbeat** — requests a `ping` on each tick; consecutive
//!    unanswered pings past the miss limit mark the link suspect.
//!
//! The monitor is pure state: the session controller feeds it timeout polls
//! and stats samples, and executes whatever [`HealthEvent`]s come back.

use std::time::{Duration, Instant};

use crate::config::SessionConfig;

// ============================================================================
// Constants
// ============================================================================

/// Bitrate below which the link is Poor
pub const POOR_BITRATE_BPS: f64 = 100_000.0;
/// Packet loss above which the link is Poor
pub const POOR_LOSS_PCT: f64 = 10.0;
/// Round-trip time above which the link is Poor
pub const POOR_RTT_SEC: f64 = 0.5;
/// Jitter above which the link is Poor
pub const POOR_JITTER_SEC: f64 = 0.1;

/// Bitrate below which the link is Fair
pub const FAIR_BITRATE_BPS: f64 = 150_000.0;
/// Packet loss above which the link is Fair
pub const FAIR_LOSS_PCT: f64 = 5.0;
/// Round-trip time above which the link is Fair
pub const FAIR_RTT_SEC: f64 = 0.3;
/// Jitter above which the link is Fair
pub const FAIR_JITTER_SEC: f64 = 0.05;

/// Bitrate below which the link is merely Good
pub const GOOD_BITRATE_BPS: f64 = 800_000.0;
/// Packet loss above which the link is merely Good
pub const GOOD_LOSS_PCT: f64 = 2.0;
/// Round-trip time above which the link is merely Good
pub const GOOD_RTT_SEC: f64 = 0.15;

/// Frame delta at or below which a freeze tick counts as stalled
pub const STALL_FRAME_DELTA: u64 = 1;

// ============================================================================
// Stats Types
// ============================================================================

/// Cumulative counters reported by the transport's stats probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawStats {
    /// Total bytes received on the media stream
    pub bytes_received: u64,
    /// Total packets received
    pub packets_received: u64,
    /// Total packets lost
    pub packets_lost: u64,
    /// Total video frames decoded
    pub frames_decoded: u64,
    /// Current jitter estimate in seconds
    pub jitter_sec: f64,
    /// Current round-trip time in seconds
    pub rtt_sec: f64,
    /// When the transport took this snapshot
    pub sampled_at: Instant,
}

/// Point-in-time link statistics derived from two successive [`RawStats`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkStats {
    /// Receive bitrate in bits per second
    pub bitrate_bps: f64,
    /// Packet loss percentage over the sampling window
    pub packet_loss_pct: f64,
    /// Jitter in seconds
    pub jitter_sec: f64,
    /// Round-trip time in seconds
    pub rtt_sec: f64,
    /// Cumulative frames decoded
    pub frames_decoded: u64,
    /// When the underlying snapshot was taken
    pub sampled_at: Instant,
}

// ============================================================================
// Quality Classification
// ============================================================================

/// Coarse link-quality bucket driving adaptive encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    /// Human-readable tier name (for logging)
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Fair => "fair",
            QualityTier::Poor => "poor",
        }
    }
}

/// Classify a stats snapshot into a quality tier
///
/// Checks run worst-tier-first so that any metric crossing a worse
/// threshold wins regardless of how healthy the others look.
pub fn classify_quality(stats: &LinkStats) -> QualityTier {
    if stats.bitrate_bps < POOR_BITRATE_BPS
        || stats.packet_loss_pct > POOR_LOSS_PCT
        || stats.rtt_sec > POOR_RTT_SEC
        || stats.jitter_sec > POOR_JITTER_SEC
    {
        return QualityTier::Poor;
    }

    if stats.bitrate_bps < FAIR_BITRATE_BPS
        || stats.packet_loss_pct > FAIR_LOSS_PCT
        || stats.rtt_sec > FAIR_RTT_SEC
        || stats.jitter_sec > FAIR_JITTER_SEC
    {
        return QualityTier::Fair;
    }

    if stats.bitrate_bps < GOOD_BITRATE_BPS
        || stats.packet_loss_pct > GOOD_LOSS_PCT
        || stats.rtt_sec > GOOD_RTT_SEC
    {
        return QualityTier::Good;
    }

    QualityTier::Excellent
}

// ============================================================================
// Health Events
// ============================================================================

/// Outcomes of a health-monitor poll, executed by the session controller
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// A stats snapshot should be requested from the transport
    RequestStats,
    /// A heartbeat ping should be sent on the data channel
    SendPing,
    /// Media delivery has stalled; a path restart is warranted
    StallDetected,
    /// Heartbeat misses exceeded the budget; the link is presumed dead
    LinkSuspect,
    /// The link moved into a different quality tier
    TierChanged(QualityTier),
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Samples transport statistics and tracks heartbeat liveness
#[derive(Debug)]
pub struct HealthMonitor {
    freeze_interval: std::time::Duration,
    quality_interval: std::time::Duration,
    heartbeat_interval: std::time::Duration,
    stall_threshold: u32,
    miss_limit: u32,

    next_freeze: Option<Instant>,
    next_quality: Option<Instant>,
    next_heartbeat: Option<Instant>,

    /// Previous raw sample, baseline for delta computation
    last_raw: Option<RawStats>,
    /// Most recent derived stats
    last_stats: Option<LinkStats>,
    current_tier: Option<QualityTier>,
    /// Set by the quality tick; the next sample gets classified
    quality_pending: bool,

    stall_ticks: u32,

    awaiting_pong: bool,
    missed_pongs: u32,
    last_pong_at: Option<Instant>,
}

impl HealthMonitor {
    /// Create an inactive monitor with the given tunables
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            freeze_interval: config.freeze_interval,
            quality_interval: config.quality_interval,
            heartbeat_interval: config.heartbeat_interval,
            stall_threshold: config.freeze_stall_threshold,
            miss_limit: config.heartbeat_miss_limit,
            next_freeze: None,
            next_quality: None,
            next_heartbeat: None,
            last_raw: None,
            last_stats: None,
            current_tier: None,
            quality_pending: false,
            stall_ticks: 0,
            awaiting_pong: false,
            missed_pongs: 0,
            last_pong_at: None,
        }
    }

    /// Arm all three timers; called on entry into Connected
    pub fn activate(&mut self, now: Instant) {
        self.next_freeze = Some(now + self.freeze_interval);
        self.next_quality = Some(now + self.quality_interval);
        self.next_heartbeat = Some(now + self.heartbeat_interval);
        self.last_raw = None;
        self.quality_pending = false;
        self.stall_ticks = 0;
        self.awaiting_pong = false;
        self.missed_pongs = 0;
        self.last_pong_at = Some(now);
    }

    /// Disarm all timers; called on teardown
    pub fn deactivate(&mut self) {
        self.next_freeze = None;
        self.next_quality = None;
        self.next_heartbeat = None;
        self.quality_pending = false;
        self.awaiting_pong = false;
    }

    /// Whether any timer is armed
    pub fn is_active(&self) -> bool {
        self.next_heartbeat.is_some()
    }

    /// Earliest armed deadline
    pub fn next_timeout(&self) -> Option<Instant> {
        [self.next_freeze, self.next_quality, self.next_heartbeat]
            .into_iter()
            .flatten()
            .min()
    }

    /// Current quality tier (if a sample has been classified)
    pub fn current_tier(&self) -> Option<QualityTier> {
        self.current_tier
    }

    /// Most recent derived stats
    pub fn last_stats(&self) -> Option<&LinkStats> {
        self.last_stats.as_ref()
    }

    /// Fire any timers whose deadline has passed
    pub fn on_timeout(&mut self, now: Instant) -> Vec<HealthEvent> {
        let mut events = Vec::new();
        let mut want_stats = false;

        if let Some(deadline) = self.next_freeze {
            if now >= deadline {
                self.next_freeze = Some(rearm(deadline, now, self.freeze_interval));
                want_stats = true;
            }
        }

        if let Some(deadline) = self.next_quality {
            if now >= deadline {
                self.next_quality = Some(rearm(deadline, now, self.quality_interval));
                self.quality_pending = true;
                want_stats = true;
            }
        }

        if want_stats {
            events.push(HealthEvent::RequestStats);
        }

        if let Some(deadline) = self.next_heartbeat {
            if now >= deadline {
                self.next_heartbeat = Some(rearm(deadline, now, self.heartbeat_interval));

                if self.awaiting_pong {
                    self.missed_pongs += 1;
                    log::warn!(
                        "Heartbeat miss {}/{}",
                        self.missed_pongs,
                        self.miss_limit
                    );

                    if self.missed_pongs >= self.miss_limit {
                        self.missed_pongs = 0;
                        self.awaiting_pong = false;
                        events.push(HealthEvent::LinkSuspect);
                    }
                }

                events.push(HealthEvent::SendPing);
                self.awaiting_pong = true;
            }
        }

        events
    }

    /// Record an observed pong, resetting the miss counter
    pub fn record_pong(&mut self, now: Instant) {
        self.awaiting_pong = false;
        self.missed_pongs = 0;
        self.last_pong_at = Some(now);
    }

    /// When the last pong (or activation) was observed
    pub fn last_pong_at(&self) -> Option<Instant> {
        self.last_pong_at
    }

    /// Feed a stats snapshot from the transport
    ///
    /// Stale snapshots (non-monotonic `sampled_at`) are dropped; only the
    /// freshest sample ever drives classification.
    pub fn record_stats(&mut self, raw: RawStats) -> Vec<HealthEvent> {
        let mut events = Vec::new();

        let prev = match self.last_raw {
            Some(prev) => {
                if raw.sampled_at <= prev.sampled_at {
                    log::debug!("Dropping stale stats sample");
                    return events;
                }
                Some(prev)
            }
            None => None,
        };

        if let Some(prev) = prev {
            let elapsed = raw.sampled_at.duration_since(prev.sampled_at).as_secs_f64();
            if elapsed > 0.0 {
                // Freeze detection on every sample
                let frame_delta = raw.frames_decoded.saturating_sub(prev.frames_decoded);
                if frame_delta <= STALL_FRAME_DELTA {
                    self.stall_ticks += 1;
                    if self.stall_ticks >= self.stall_threshold {
                        log::warn!(
                            "Media stalled: {} consecutive near-zero frame deltas",
                            self.stall_ticks
                        );
                        self.stall_ticks = 0;
                        events.push(HealthEvent::StallDetected);
                    }
                } else {
                    self.stall_ticks = 0;
                }

                let byte_delta = raw.bytes_received.saturating_sub(prev.bytes_received);
                let recv_delta = raw.packets_received.saturating_sub(prev.packets_received);
                let lost_delta = raw.packets_lost.saturating_sub(prev.packets_lost);
                let total = recv_delta + lost_delta;

                let stats = LinkStats {
                    bitrate_bps: (byte_delta as f64 * 8.0) / elapsed,
                    packet_loss_pct: if total > 0 {
                        (lost_delta as f64 / total as f64) * 100.0
                    } else {
                        0.0
                    },
                    jitter_sec: raw.jitter_sec,
                    rtt_sec: raw.rtt_sec,
                    frames_decoded: raw.frames_decoded,
                    sampled_at: raw.sampled_at,
                };
                self.last_stats = Some(stats);

                if self.quality_pending {
                    self.quality_pending = false;
                    let tier = classify_quality(&stats);
                    if self.current_tier != Some(tier) {
                        log::info!(
                            "Link quality changed to {} ({:.0} bps, {:.1}% loss, rtt {:.3}s)",
                            tier.as_str(),
                            stats.bitrate_bps,
                            stats.packet_loss_pct,
                            stats.rtt_sec
                        );
                        self.current_tier = Some(tier);
                        events.push(HealthEvent::TierChanged(tier));
                    }
                }
            }
        }

        self.last_raw = Some(raw);
        events
    }
}

/// Rearm a periodic timer from its deadline, not from the poll time, so a
/// driver that fires late does not drift the schedule. A deadline missed
/// by more than a full interval skips ahead instead of producing a burst
/// of catch-up ticks.
fn rearm(deadline: Instant, now: Instant, interval: Duration) -> Instant {
    let next = deadline + interval;
    if next > now {
        next
    } else {
        now + interval
    }
}

// ============================================================================
// Tests
// ============================================================================
