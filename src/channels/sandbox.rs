//! Sandbox payout rails.
//!
//! Deterministic in-memory `ChannelAdapter` implementations for the four
//! rail families. Used by the binary in sandbox mode and by tests.
//! Payouts, idempotency keys, and settlement times are all tracked
//! in-memory; settlement is derived from the injected clock so tests can
//! advance time instead of sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::channels::{
    AccountVerification, ChannelAdapter, ChannelError, PayoutOrder, PayoutReceipt, RailStatus,
    StatusReport,
};
use crate::clock::{Clock, SystemClock};
use crate::types::{PayoutMethod, SpeedTier};

#[derive(Debug, Clone)]
struct SandboxPayout {
    reference: String,
    estimated_arrival: DateTime<Utc>,
    cancelled: bool,
}

/// One simulated rail. Cancellation semantics differ per family:
/// crypto and wallet transfers cannot be recalled once issued.
pub struct SandboxRail {
    id: String,
    method: PayoutMethod,
    priority: u8,
    per_transaction_limit: Decimal,
    daily_volume_limit: Decimal,
    base_latency_ms: u64,
    cancellable: bool,
    clock: Arc<dyn Clock>,
    /// Keyed by idempotency key — a repeated initiate returns the
    /// original receipt.
    payouts: Mutex<HashMap<String, SandboxPayout>>,
    force_error: Mutex<Option<ChannelError>>,
}

impl SandboxRail {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: &str,
        method: PayoutMethod,
        priority: u8,
        per_transaction_limit: Decimal,
        daily_volume_limit: Decimal,
        base_latency_ms: u64,
        cancellable: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            method,
            priority,
            per_transaction_limit,
            daily_volume_limit,
            base_latency_ms,
            cancellable,
            clock: Arc::new(SystemClock),
            payouts: Mutex::new(HashMap::new()),
            force_error: Mutex::new(None),
        }
    }

    pub fn bank() -> Self {
        Self::new(
            "bank-primary",
            PayoutMethod::BankTransfer,
            1,
            dec!(50000),
            dec!(2000000),
            40,
            true,
        )
    }

    pub fn bank_backup() -> Self {
        Self::new(
            "bank-backup",
            PayoutMethod::BankTransfer,
            3,
            dec!(25000),
            dec!(500000),
            90,
            true,
        )
    }

    pub fn card() -> Self {
        Self::new(
            "card-push",
            PayoutMethod::CardPush,
            2,
            dec!(10000),
            dec!(300000),
            25,
            true,
        )
    }

    pub fn wallet() -> Self {
        Self::new(
            "wallet-gateway",
            PayoutMethod::DigitalWallet,
            1,
            dec!(5000),
            dec!(150000),
            15,
            false,
        )
    }

    pub fn crypto() -> Self {
        Self::new(
            "crypto-rail",
            PayoutMethod::Crypto,
            2,
            dec!(20000),
            dec!(400000),
            60,
            false,
        )
    }

    /// Replace the wall clock (tests drive settlement by advancing time).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// Force all subsequent operations to fail with this error.
    pub fn set_error(&self, error: ChannelError) {
        *self.force_error.lock().expect("sandbox lock poisoned") = Some(error);
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().expect("sandbox lock poisoned") = None;
    }

    fn forced_error(&self) -> Option<ChannelError> {
        self.force_error
            .lock()
            .expect("sandbox lock poisoned")
            .clone()
    }

    fn tier_delay(&self, tier: SpeedTier) -> Duration {
        match tier {
            SpeedTier::Instant => Duration::minutes(2),
            SpeedTier::Fast => Duration::hours(1),
            SpeedTier::Standard => Duration::hours(24),
            SpeedTier::Economy => Duration::hours(72),
        }
    }

    fn find_by_reference(&self, reference: &str) -> Option<SandboxPayout> {
        self.payouts
            .lock()
            .expect("sandbox lock poisoned")
            .values()
            .find(|p| p.reference == reference)
            .cloned()
    }
}

#[async_trait]
impl ChannelAdapter for SandboxRail {
    fn id(&self) -> &str {
        &self.id
    }

    fn method(&self) -> PayoutMethod {
        self.method
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn per_transaction_limit(&self) -> Decimal {
        self.per_transaction_limit
    }

    fn daily_volume_limit(&self) -> Decimal {
        self.daily_volume_limit
    }

    fn estimated_arrival(&self, tier: SpeedTier, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.tier_delay(tier)
    }

    async fn initiate_payout(&self, order: &PayoutOrder) -> Result<PayoutReceipt, ChannelError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.base_latency_ms)).await;
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        if order.amount > self.per_transaction_limit {
            return Err(ChannelError::permanent(format!(
                "amount {} exceeds channel limit {}",
                order.amount, self.per_transaction_limit
            )));
        }

        let now = self.clock.now();
        let estimated_arrival = self.estimated_arrival(order.speed_tier, now);
        let mut payouts = self.payouts.lock().expect("sandbox lock poisoned");
        let payout = payouts
            .entry(order.idempotency_key.clone())
            .or_insert_with(|| SandboxPayout {
                reference: format!("{}-{}", self.id, Uuid::new_v4()),
                estimated_arrival,
                cancelled: false,
            });

        Ok(PayoutReceipt {
            channel_reference: payout.reference.clone(),
            status: RailStatus::Accepted,
            estimated_arrival: payout.estimated_arrival,
            channel_fee: None,
        })
    }

    async fn check_status(&self, channel_reference: &str) -> Result<StatusReport, ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        let payout = self
            .find_by_reference(channel_reference)
            .ok_or_else(|| ChannelError::permanent("unknown channel reference"))?;

        let now = self.clock.now();
        let report = if payout.cancelled {
            StatusReport {
                status: RailStatus::Rejected,
                completed_at: None,
                error: Some("cancelled by sender".into()),
            }
        } else if now >= payout.estimated_arrival {
            StatusReport {
                status: RailStatus::Settled,
                completed_at: Some(payout.estimated_arrival),
                error: None,
            }
        } else {
            StatusReport {
                status: RailStatus::InFlight,
                completed_at: None,
                error: None,
            }
        };
        Ok(report)
    }

    async fn cancel_payout(&self, channel_reference: &str) -> Result<(), ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        if !self.cancellable {
            return Err(ChannelError::permanent(format!(
                "{} transfers cannot be recalled once issued",
                self.method
            )));
        }

        let now = self.clock.now();
        let mut payouts = self.payouts.lock().expect("sandbox lock poisoned");
        let payout = payouts
            .values_mut()
            .find(|p| p.reference == channel_reference)
            .ok_or_else(|| ChannelError::permanent("unknown channel reference"))?;
        if now >= payout.estimated_arrival {
            return Err(ChannelError::permanent("payout already settled"));
        }
        payout.cancelled = true;
        Ok(())
    }

    async fn verify_account(
        &self,
        destination: &str,
    ) -> Result<AccountVerification, ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        // Sandbox rule: empty or "invalid-" prefixed destinations fail.
        let is_valid = !destination.is_empty() && !destination.starts_with("invalid");
        Ok(AccountVerification {
            is_valid,
            holder_name: is_valid.then(|| "Sandbox Holder".to_string()),
        })
    }

    async fn health_check(&self) -> Result<u64, ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        Ok(self.base_latency_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn order(key: &str, amount: Decimal, tier: SpeedTier) -> PayoutOrder {
        PayoutOrder {
            idempotency_key: key.into(),
            amount,
            currency: "USD".into(),
            destination: "acct-123".into(),
            speed_tier: tier,
            metadata: HashMap::new(),
        }
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_initiate_is_idempotent() {
        let rail = SandboxRail::bank();
        let o = order("req-1", dec!(100), SpeedTier::Instant);
        let first = rail.initiate_payout(&o).await.unwrap();
        let second = rail.initiate_payout(&o).await.unwrap();
        assert_eq!(first.channel_reference, second.channel_reference);
    }

    #[tokio::test]
    async fn test_over_limit_rejected_permanently() {
        let rail = SandboxRail::wallet();
        let o = order("req-1", dec!(9999), SpeedTier::Instant);
        let err = rail.initiate_payout(&o).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("exceeds channel limit"));
    }

    #[tokio::test]
    async fn test_settles_after_estimated_arrival() {
        let clock = manual_clock();
        let rail = SandboxRail::bank().with_clock(clock.clone());
        let receipt = rail
            .initiate_payout(&order("req-1", dec!(50), SpeedTier::Instant))
            .await
            .unwrap();

        let report = rail.check_status(&receipt.channel_reference).await.unwrap();
        assert_eq!(report.status, RailStatus::InFlight);

        clock.advance(Duration::minutes(5));
        let report = rail.check_status(&receipt.channel_reference).await.unwrap();
        assert_eq!(report.status, RailStatus::Settled);
        assert!(report.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_before_settlement() {
        let clock = manual_clock();
        let rail = SandboxRail::bank().with_clock(clock.clone());
        let receipt = rail
            .initiate_payout(&order("req-1", dec!(50), SpeedTier::Standard))
            .await
            .unwrap();
        rail.cancel_payout(&receipt.channel_reference).await.unwrap();

        let report = rail.check_status(&receipt.channel_reference).await.unwrap();
        assert_eq!(report.status, RailStatus::Rejected);
    }

    #[tokio::test]
    async fn test_cancel_after_settlement_fails() {
        let clock = manual_clock();
        let rail = SandboxRail::bank().with_clock(clock.clone());
        let receipt = rail
            .initiate_payout(&order("req-1", dec!(50), SpeedTier::Instant))
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        let err = rail.cancel_payout(&receipt.channel_reference).await.unwrap_err();
        assert!(err.message.contains("already settled"));
    }

    #[tokio::test]
    async fn test_crypto_never_cancellable() {
        let rail = SandboxRail::crypto();
        let receipt = rail
            .initiate_payout(&order("req-1", dec!(50), SpeedTier::Fast))
            .await
            .unwrap();
        let err = rail.cancel_payout(&receipt.channel_reference).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("cannot be recalled"));
    }

    #[tokio::test]
    async fn test_verify_account_sandbox_rule() {
        let rail = SandboxRail::card();
        let ok = rail.verify_account("tok-99").await.unwrap();
        assert!(ok.is_valid);
        assert_eq!(ok.holder_name.as_deref(), Some("Sandbox Holder"));

        let bad = rail.verify_account("invalid-tok").await.unwrap();
        assert!(!bad.is_valid);
        assert!(bad.holder_name.is_none());
    }

    #[tokio::test]
    async fn test_forced_error_propagates() {
        let rail = SandboxRail::bank();
        rail.set_error(ChannelError::retryable("upstream 503"));
        let err = rail
            .initiate_payout(&order("req-1", dec!(50), SpeedTier::Fast))
            .await
            .unwrap_err();
        assert!(err.retryable);

        rail.clear_error();
        assert!(rail
            .initiate_payout(&order("req-1", dec!(50), SpeedTier::Fast))
            .await
            .is_ok());
    }
}
