//! Quota tracker.
//!
//! Enforces per-user spend caps across rolling daily/weekly/monthly
//! windows and rolls windows over lazily on access. Pure profile
//! arithmetic plus clock reads — per-user serialization is the
//! orchestrator's responsibility.

use chrono::{DateTime, Datelike, Days, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::TiersConfig;
use crate::error::{CashoutError, LimitKind};
use crate::types::{UserCashoutProfile, VipTier};

pub struct QuotaTracker {
    tiers: TiersConfig,
}

impl QuotaTracker {
    pub fn new(tiers: TiersConfig) -> Self {
        Self { tiers }
    }

    /// Fresh profile at the lowest tier with all windows anchored ahead
    /// of `now`.
    pub fn new_profile(&self, user_id: &str, now: DateTime<Utc>) -> UserCashoutProfile {
        let tier = VipTier::Standard;
        UserCashoutProfile {
            user_id: user_id.to_string(),
            tier,
            daily_used: Decimal::ZERO,
            weekly_used: Decimal::ZERO,
            monthly_used: Decimal::ZERO,
            daily_reset_at: next_midnight(now),
            weekly_reset_at: next_week_start(now),
            monthly_reset_at: next_month_start(now),
            lifetime_count: 0,
            lifetime_volume: Decimal::ZERO,
            avg_processing_secs: 0.0,
            free_instant_remaining: self.tiers.benefits(tier).free_instant_per_week,
            recent_initiations: Vec::new(),
            created_at: now,
        }
    }

    /// Zero any window whose boundary has passed and advance its reset
    /// time. A weekly rollover also restores the tier's free-instant
    /// allowance. Must run on every profile access.
    pub fn rollover(&self, profile: &mut UserCashoutProfile, now: DateTime<Utc>) {
        if now >= profile.daily_reset_at {
            profile.daily_used = Decimal::ZERO;
            profile.daily_reset_at = next_midnight(now);
            debug!(user = %profile.user_id, "Daily window rolled over");
        }
        if now >= profile.weekly_reset_at {
            profile.weekly_used = Decimal::ZERO;
            profile.weekly_reset_at = next_week_start(now);
            profile.free_instant_remaining =
                self.tiers.benefits(profile.tier).free_instant_per_week;
            debug!(user = %profile.user_id, "Weekly window rolled over");
        }
        if now >= profile.monthly_reset_at {
            profile.monthly_used = Decimal::ZERO;
            profile.monthly_reset_at = next_month_start(now);
            debug!(user = %profile.user_id, "Monthly window rolled over");
        }
    }

    /// Reserve usage against all three windows, or fail naming the first
    /// cap that would be breached. All counters move together.
    pub fn reserve(
        &self,
        profile: &mut UserCashoutProfile,
        amount: Decimal,
    ) -> Result<(), CashoutError> {
        let benefits = self.tiers.benefits(profile.tier);

        if amount > benefits.per_transaction_limit {
            return Err(CashoutError::QuotaExceeded {
                limit: LimitKind::PerTransaction,
                cap: benefits.per_transaction_limit,
                used: Decimal::ZERO,
                requested: amount,
            });
        }
        if profile.daily_used + amount > benefits.daily_limit {
            return Err(CashoutError::QuotaExceeded {
                limit: LimitKind::Daily,
                cap: benefits.daily_limit,
                used: profile.daily_used,
                requested: amount,
            });
        }
        if profile.weekly_used + amount > benefits.weekly_limit {
            return Err(CashoutError::QuotaExceeded {
                limit: LimitKind::Weekly,
                cap: benefits.weekly_limit,
                used: profile.weekly_used,
                requested: amount,
            });
        }
        if profile.monthly_used + amount > benefits.monthly_limit {
            return Err(CashoutError::QuotaExceeded {
                limit: LimitKind::Monthly,
                cap: benefits.monthly_limit,
                used: profile.monthly_used,
                requested: amount,
            });
        }

        profile.daily_used += amount;
        profile.weekly_used += amount;
        profile.monthly_used += amount;
        Ok(())
    }

    /// Refund reserved usage after a cancellation or failure. Counters
    /// floor at zero — a race with a concurrent rollover must never
    /// drive one negative.
    pub fn release(&self, profile: &mut UserCashoutProfile, amount: Decimal) {
        profile.daily_used = (profile.daily_used - amount).max(Decimal::ZERO);
        profile.weekly_used = (profile.weekly_used - amount).max(Decimal::ZERO);
        profile.monthly_used = (profile.monthly_used - amount).max(Decimal::ZERO);
    }

    /// Swap the profile onto a new tier's static benefits immediately.
    /// Already-consumed usage is untouched.
    pub fn upgrade_tier(&self, profile: &mut UserCashoutProfile, new_tier: VipTier) {
        profile.tier = new_tier;
        profile.free_instant_remaining = self.tiers.benefits(new_tier).free_instant_per_week;
    }
}

fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let next = now.date_naive() + Days::new(1);
    Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

fn next_week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_ahead = 7 - u64::from(now.weekday().num_days_from_monday());
    let next = now.date_naive() + Days::new(days_ahead);
    Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is valid")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
