//! Fee engine.
//!
//! Deterministic, side-effect-free fee quoting: schedule lookup, percentage
//! on the gross amount, min/max clamping, VIP discount, free-instant
//! allowance, and rounding to the smallest currency unit. Fees round up —
//! truncation would systematically underbill.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::{FeesConfig, TiersConfig};
use crate::types::{FeeBreakdown, FeeQuote, PayoutMethod, SpeedTier, UserCashoutProfile};

pub struct FeeEngine {
    schedule: FeesConfig,
    tiers: TiersConfig,
    quote_ttl: Duration,
}

impl FeeEngine {
    pub fn new(schedule: FeesConfig, tiers: TiersConfig, quote_ttl_secs: i64) -> Self {
        Self {
            schedule,
            tiers,
            quote_ttl: Duration::seconds(quote_ttl_secs),
        }
    }

    /// Quote the fee for one cashout. Pure function of the inputs plus the
    /// static schedule. Returns None when the (method, tier) combination is
    /// not offered.
    ///
    /// When a quote marks `free_instant_used`, the caller owns committing
    /// the allowance consumption — the engine never mutates the profile.
    pub fn quote(
        &self,
        amount: Decimal,
        currency: &str,
        method: PayoutMethod,
        speed_tier: SpeedTier,
        profile: &UserCashoutProfile,
        now: DateTime<Utc>,
    ) -> Option<FeeQuote> {
        let rule = self.schedule.rule(method, speed_tier)?;
        let benefits = self.tiers.benefits(profile.tier);

        let free_instant_used =
            speed_tier == SpeedTier::Instant && profile.free_instant_remaining > 0;

        let fee = if free_instant_used {
            FeeBreakdown::zero()
        } else {
            // Percentage on the gross amount, clamp after adding the flat
            // component, discount off the clamped figure.
            let percentage = amount * rule.percent;
            let clamped = (rule.flat + percentage).clamp(rule.min, rule.max);
            let discount = clamped * benefits.fee_discount;
            let total = (clamped - discount)
                .round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity);
            FeeBreakdown {
                flat: rule.flat,
                percentage: percentage
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
                discount: discount
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
                total,
            }
        };

        Some(FeeQuote {
            amount,
            currency: currency.to_string(),
            method,
            speed_tier,
            net_amount: amount - fee.total,
            fee,
            free_instant_used,
            valid_until: now + self.quote_ttl,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
