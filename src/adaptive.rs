//! Adaptive outbound transmission
//!
//! Maps the current quality tier to outbound encoding parameters. The
//! mapping is applied fire-and-forget: a failure to apply parameters is
//! logged by the driver and never escalates, since sending at the wrong
//! bitrate is strictly better than tearing down a working session.

use crate::health::QualityTier;

// ============================================================================
// Encoding Parameters
// ============================================================================

/// Outbound encoding parameters applied to the transport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingParameters {
    /// Ceiling on the outbound video bitrate
    pub max_bitrate_bps: u32,
    /// Ceiling on the outbound framerate
    pub max_framerate: u32,
    /// Divisor applied to the capture resolution (1.0 = no scaling)
    pub resolution_scale_down: f64,
}

/// Parameter tuple for a quality tier
pub fn parameters_for(tier: QualityTier) -> EncodingParameters {
    match tier {
        QualityTier::Poor => EncodingParameters {
            max_bitrate_bps: 250_000,
            max_framerate: 15,
            resolution_scale_down: 2.0,
        },
        QualityTier::Fair => EncodingParameters {
            max_bitrate_bps: 500_000,
            max_framerate: 24,
            resolution_scale_down: 1.5,
        },
        QualityTier::Good | QualityTier::Excellent => EncodingParameters {
            max_bitrate_bps: 1_500_000,
            max_framerate: 30,
            resolution_scale_down: 1.0,
        },
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Tracks the applied tier and emits parameter changes on transitions
#[derive(Debug, Default)]
pub struct AdaptiveTransmissionController {
    applied_tier: Option<QualityTier>,
}

impl AdaptiveTransmissionController {
    pub fn new() -> Self {
        Self { applied_tier: None }
    }

    /// The tier whose parameters are currently applied
    pub fn applied_tier(&self) -> Option<QualityTier> {
        self.applied_tier
    }

    /// React to a tier change
    ///
    /// Returns parameters to apply, or `None` when the tier maps to the
    /// parameters already in effect.
    pub fn on_tier_change(&mut self, tier: QualityTier) -> Option<EncodingParameters> {
        let params = parameters_for(tier);
        if let Some(applied) = self.applied_tier {
            if parameters_for(applied) == params {
                self.applied_tier = Some(tier);
                return None;
            }
        }

        log::info!(
            "Applying encoding parameters for {} link: {} bps, {} fps, scale 1/{}",
            tier.as_str(),
            params.max_bitrate_bps,
            params.max_framerate,
            params.resolution_scale_down
        );
        self.applied_tier = Some(tier);
        Some(params)
    }

    /// Forget the applied tier (a fresh transport starts from defaults)
    pub fn reset(&mut self) {
        self.applied_tier = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
