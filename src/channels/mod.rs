//! Payout channel integrations.
//!
//! Defines the `ChannelAdapter` trait, the health-scored `ChannelRegistry`
//! that routes a payout method to the best available adapter, and the
//! deterministic sandbox rails used by the binary and tests.

pub mod registry;
pub mod sandbox;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{PayoutMethod, SpeedTier};

pub use registry::ChannelRegistry;

// ---------------------------------------------------------------------------
// Channel error
// ---------------------------------------------------------------------------

/// Failure reported by a channel. `retryable` separates timeouts and
/// upstream outages from permanent rejections.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ChannelError {
    pub retryable: bool,
    pub message: String,
}

impl ChannelError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire structs
// ---------------------------------------------------------------------------

/// Payout instruction handed to a channel. The idempotency key is the
/// request id — a retried call after a timeout must not double-pay.
#[derive(Debug, Clone)]
pub struct PayoutOrder {
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub destination: String,
    pub speed_tier: SpeedTier,
    pub metadata: HashMap<String, String>,
}

/// Status of a payout as the rail reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailStatus {
    Accepted,
    InFlight,
    Settled,
    Rejected,
}

/// Acknowledgement returned by a successful `initiate_payout`.
#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    pub channel_reference: String,
    pub status: RailStatus,
    pub estimated_arrival: DateTime<Utc>,
    /// Fee the rail itself charges, when it discloses one.
    pub channel_fee: Option<Decimal>,
}

/// Answer to a `check_status` poll.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: RailStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Result of destination verification.
#[derive(Debug, Clone)]
pub struct AccountVerification {
    pub is_valid: bool,
    pub holder_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// Abstraction over external payout rails.
///
/// Implementors provide payout initiation, status polling, cancellation,
/// destination verification and a health probe. Rails that cannot recall
/// a payout (broadcast crypto, sent wallet transfers) return a permanent
/// error from `cancel_payout`.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable channel identifier for routing and health records.
    fn id(&self) -> &str;

    /// The one payout method this channel serves.
    fn method(&self) -> PayoutMethod;

    /// Routing priority; lower is preferred.
    fn priority(&self) -> u8;

    fn per_transaction_limit(&self) -> Decimal;

    fn daily_volume_limit(&self) -> Decimal;

    /// When a payout issued now at this speed tier should arrive.
    fn estimated_arrival(&self, tier: SpeedTier, now: DateTime<Utc>) -> DateTime<Utc>;

    /// Issue a payout. Repeating a call with the same idempotency key
    /// must return the original receipt, not pay twice.
    async fn initiate_payout(&self, order: &PayoutOrder) -> Result<PayoutReceipt, ChannelError>;

    async fn check_status(&self, channel_reference: &str) -> Result<StatusReport, ChannelError>;

    async fn cancel_payout(&self, channel_reference: &str) -> Result<(), ChannelError>;

    async fn verify_account(&self, destination: &str)
        -> Result<AccountVerification, ChannelError>;

    /// Liveness probe. Returns observed latency in milliseconds.
    async fn health_check(&self) -> Result<u64, ChannelError>;
}
