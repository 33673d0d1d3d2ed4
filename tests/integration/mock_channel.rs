//! Mock payout channel for integration testing.
//!
//! Provides a deterministic `ChannelAdapter` implementation with
//! scripted settlement outcomes, recorded orders, and a forced-error
//! switch — all in-memory with no external dependencies.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use payrail::channels::{
    AccountVerification, ChannelAdapter, ChannelError, PayoutOrder, PayoutReceipt, RailStatus,
    StatusReport,
};
use payrail::clock::Clock;
use payrail::types::{PayoutMethod, SpeedTier};

/// A mock payout rail for deterministic testing.
///
/// All state is in-memory. Every accepted order is recorded, and the
/// settlement status per reference is fully controllable from test code.
pub struct MockChannel {
    id: String,
    method: PayoutMethod,
    priority: u8,
    per_transaction_limit: Decimal,
    clock: Arc<dyn Clock>,
    orders: Mutex<Vec<PayoutOrder>>,
    /// Receipt reference per idempotency key.
    issued: Mutex<HashMap<String, String>>,
    /// Scripted status per reference. References not present here
    /// report as in flight.
    statuses: Mutex<HashMap<String, RailStatus>>,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<ChannelError>>,
}

impl MockChannel {
    pub fn new(id: &str, method: PayoutMethod, priority: u8, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: id.to_string(),
            method,
            priority,
            per_transaction_limit: dec!(50000),
            clock,
            orders: Mutex::new(Vec::new()),
            issued: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            force_error: Mutex::new(None),
        }
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, error: ChannelError) {
        *self.force_error.lock().unwrap() = Some(error);
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Mark every issued payout as settled.
    pub fn settle_all(&self) {
        let issued = self.issued.lock().unwrap();
        let mut statuses = self.statuses.lock().unwrap();
        for reference in issued.values() {
            statuses.insert(reference.clone(), RailStatus::Settled);
        }
    }

    /// Mark every issued payout as rejected.
    pub fn reject_all(&self) {
        let issued = self.issued.lock().unwrap();
        let mut statuses = self.statuses.lock().unwrap();
        for reference in issued.values() {
            statuses.insert(reference.clone(), RailStatus::Rejected);
        }
    }

    /// All orders accepted so far.
    pub fn orders(&self) -> Vec<PayoutOrder> {
        self.orders.lock().unwrap().clone()
    }

    fn forced_error(&self) -> Option<ChannelError> {
        self.force_error.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
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
        dec!(1000000)
    }

    fn estimated_arrival(&self, tier: SpeedTier, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = match tier {
            SpeedTier::Instant => Duration::minutes(2),
            SpeedTier::Fast => Duration::hours(1),
            SpeedTier::Standard => Duration::hours(24),
            SpeedTier::Economy => Duration::hours(72),
        };
        now + delay
    }

    async fn initiate_payout(&self, order: &PayoutOrder) -> Result<PayoutReceipt, ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        let now = self.clock.now();
        let estimated_arrival = self.estimated_arrival(order.speed_tier, now);

        let mut issued = self.issued.lock().unwrap();
        let reference = issued
            .entry(order.idempotency_key.clone())
            .or_insert_with(|| format!("{}-{}", self.id, order.idempotency_key))
            .clone();
        self.orders.lock().unwrap().push(order.clone());

        Ok(PayoutReceipt {
            channel_reference: reference,
            status: RailStatus::Accepted,
            estimated_arrival,
            channel_fee: None,
        })
    }

    async fn check_status(&self, channel_reference: &str) -> Result<StatusReport, ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        let statuses = self.statuses.lock().unwrap();
        let status = statuses
            .get(channel_reference)
            .copied()
            .unwrap_or(RailStatus::InFlight);
        Ok(StatusReport {
            status,
            completed_at: (status == RailStatus::Settled).then(|| self.clock.now()),
            error: (status == RailStatus::Rejected).then(|| "rejected by rail".to_string()),
        })
    }

    async fn cancel_payout(&self, channel_reference: &str) -> Result<(), ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.get(channel_reference) == Some(&RailStatus::Settled) {
            return Err(ChannelError::permanent("payout already settled"));
        }
        statuses.insert(channel_reference.to_string(), RailStatus::Rejected);
        Ok(())
    }

    async fn verify_account(&self, destination: &str) -> Result<AccountVerification, ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        let is_valid = !destination.is_empty() && !destination.starts_with("invalid");
        Ok(AccountVerification {
            is_valid,
            holder_name: is_valid.then(|| "Mock Holder".to_string()),
        })
    }

    async fn health_check(&self) -> Result<u64, ChannelError> {
        if let Some(err) = self.forced_error() {
            return Err(err);
        }
        Ok(10)
    }
}
