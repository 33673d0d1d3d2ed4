//! Risk scorer.
//!
//! Additive heuristic over the request and the user's profile. Advisory
//! gating only: a score at or above the review threshold sends the
//! request to `on_hold` for manual adjudication, it never hard-blocks.
//! All weights and thresholds come from `RiskConfig`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{RiskConfig, TiersConfig};
use crate::types::{PayoutMethod, RiskAssessment, RiskFlag, SpeedTier, UserCashoutProfile};

pub struct RiskScorer {
    config: RiskConfig,
    tiers: TiersConfig,
}

impl RiskScorer {
    pub fn new(config: RiskConfig, tiers: TiersConfig) -> Self {
        Self { config, tiers }
    }

    /// Score a cashout about to be initiated. The initiation being scored
    /// counts toward the velocity window alongside the profile's recent
    /// initiation timestamps.
    pub fn assess(
        &self,
        amount: Decimal,
        method: PayoutMethod,
        speed_tier: SpeedTier,
        profile: &UserCashoutProfile,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let mut score = 0u32;
        let mut flags = Vec::new();

        if amount >= self.config.large_amount_threshold {
            score += self.config.large_amount_points;
            flags.push(RiskFlag::LargeAmount);
        }

        if profile.lifetime_count == 0 {
            score += self.config.first_withdrawal_points;
            flags.push(RiskFlag::FirstWithdrawal);
        }

        let daily_limit = self.tiers.benefits(profile.tier).daily_limit;
        if daily_limit > Decimal::ZERO
            && profile.daily_used + amount > daily_limit * self.config.near_cap_fraction
        {
            score += self.config.near_cap_points;
            flags.push(RiskFlag::NearDailyCap);
        }

        if speed_tier == SpeedTier::Instant
            && method == PayoutMethod::Crypto
            && profile.lifetime_count <= self.config.novice_lifetime_max
        {
            score += self.config.instant_crypto_points;
            flags.push(RiskFlag::InstantCryptoNovice);
        }

        let window_start = now - Duration::seconds(self.config.velocity_window_secs);
        let recent = profile
            .recent_initiations
            .iter()
            .filter(|t| **t > window_start)
            .count();
        if recent + 1 >= self.config.velocity_min_count {
            score += self.config.velocity_points;
            flags.push(RiskFlag::HighVelocity);
        }

        let requires_manual_review = score >= self.config.review_threshold;
        if requires_manual_review {
            debug!(
                user = %profile.user_id,
                score,
                flags = ?flags,
                "Cashout flagged for manual review"
            );
        }

        RiskAssessment {
            score,
            flags,
            requires_manual_review,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
