//! Shared types for the cashout core.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that channel, fee, quota, risk
//! and orchestrator modules can depend on them without circular
//! references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CashoutError;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// External payout rail family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer,
    CardPush,
    DigitalWallet,
    Crypto,
}

impl PayoutMethod {
    /// All known methods (useful for iteration).
    pub const ALL: &'static [PayoutMethod] = &[
        PayoutMethod::BankTransfer,
        PayoutMethod::CardPush,
        PayoutMethod::DigitalWallet,
        PayoutMethod::Crypto,
    ];
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutMethod::BankTransfer => write!(f, "bank_transfer"),
            PayoutMethod::CardPush => write!(f, "card_push"),
            PayoutMethod::DigitalWallet => write!(f, "digital_wallet"),
            PayoutMethod::Crypto => write!(f, "crypto"),
        }
    }
}

impl std::str::FromStr for PayoutMethod {
    type Err = CashoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bank_transfer" | "bank" => Ok(PayoutMethod::BankTransfer),
            "card_push" | "card" => Ok(PayoutMethod::CardPush),
            "digital_wallet" | "wallet" => Ok(PayoutMethod::DigitalWallet),
            "crypto" => Ok(PayoutMethod::Crypto),
            _ => Err(CashoutError::Validation(format!(
                "unknown payout method: {s}"
            ))),
        }
    }
}

/// Named service level trading fee for delivery latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    Instant,
    Fast,
    Standard,
    Economy,
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedTier::Instant => write!(f, "instant"),
            SpeedTier::Fast => write!(f, "fast"),
            SpeedTier::Standard => write!(f, "standard"),
            SpeedTier::Economy => write!(f, "economy"),
        }
    }
}

impl std::str::FromStr for SpeedTier {
    type Err = CashoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instant" => Ok(SpeedTier::Instant),
            "fast" => Ok(SpeedTier::Fast),
            "standard" => Ok(SpeedTier::Standard),
            "economy" => Ok(SpeedTier::Economy),
            _ => Err(CashoutError::Validation(format!("unknown speed tier: {s}"))),
        }
    }
}

/// User classification controlling quota caps and fee discounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VipTier {
    Standard,
    Silver,
    Gold,
    Platinum,
}

impl fmt::Display for VipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VipTier::Standard => write!(f, "standard"),
            VipTier::Silver => write!(f, "silver"),
            VipTier::Gold => write!(f, "gold"),
            VipTier::Platinum => write!(f, "platinum"),
        }
    }
}

impl std::str::FromStr for VipTier {
    type Err = CashoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(VipTier::Standard),
            "silver" => Ok(VipTier::Silver),
            "gold" => Ok(VipTier::Gold),
            "platinum" => Ok(VipTier::Platinum),
            _ => Err(CashoutError::Validation(format!("unknown vip tier: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Cashout status machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a cashout request.
///
/// Transitions are strictly forward except `OnHold -> Processing` and
/// `OnHold -> Failed`. `Reversed` is only reachable from `Completed`
/// (external event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashoutStatus {
    Pending,
    Processing,
    OnHold,
    Sent,
    Completed,
    Failed,
    Cancelled,
    Reversed,
}

impl CashoutStatus {
    /// Terminal except for the external reversal edge out of `Completed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CashoutStatus::Completed
                | CashoutStatus::Failed
                | CashoutStatus::Cancelled
                | CashoutStatus::Reversed
        )
    }

    pub fn can_transition_to(&self, to: CashoutStatus) -> bool {
        use CashoutStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, OnHold)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, OnHold)
                | (OnHold, Processing)
                | (OnHold, Failed)
                | (Sent, Completed)
                | (Sent, Failed)
                | (Completed, Reversed)
        )
    }
}

impl fmt::Display for CashoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CashoutStatus::Pending => write!(f, "pending"),
            CashoutStatus::Processing => write!(f, "processing"),
            CashoutStatus::OnHold => write!(f, "on_hold"),
            CashoutStatus::Sent => write!(f, "sent"),
            CashoutStatus::Completed => write!(f, "completed"),
            CashoutStatus::Failed => write!(f, "failed"),
            CashoutStatus::Cancelled => write!(f, "cancelled"),
            CashoutStatus::Reversed => write!(f, "reversed"),
        }
    }
}

impl std::str::FromStr for CashoutStatus {
    type Err = CashoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CashoutStatus::Pending),
            "processing" => Ok(CashoutStatus::Processing),
            "on_hold" => Ok(CashoutStatus::OnHold),
            "sent" => Ok(CashoutStatus::Sent),
            "completed" => Ok(CashoutStatus::Completed),
            "failed" => Ok(CashoutStatus::Failed),
            "cancelled" => Ok(CashoutStatus::Cancelled),
            "reversed" => Ok(CashoutStatus::Reversed),
            _ => Err(CashoutError::Validation(format!("unknown status: {s}"))),
        }
    }
}

/// One append-only entry in a request's status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: CashoutStatus,
    pub at: DateTime<Utc>,
    /// Present for every non-happy-path transition.
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

/// Breakdown of the fee baked into a request at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub flat: Decimal,
    pub percentage: Decimal,
    pub discount: Decimal,
    /// flat + percentage - discount, clamped and rounded.
    pub total: Decimal,
}

impl FeeBreakdown {
    pub fn zero() -> Self {
        Self {
            flat: Decimal::ZERO,
            percentage: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

/// Ephemeral fee quote. Never persisted as authoritative — only the
/// snapshot baked into a `CashoutRequest` at creation survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeQuote {
    pub amount: Decimal,
    pub currency: String,
    pub method: PayoutMethod,
    pub speed_tier: SpeedTier,
    pub fee: FeeBreakdown,
    pub net_amount: Decimal,
    /// Quote consumed a free instant cashout from the profile allowance.
    pub free_instant_used: bool,
    pub valid_until: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    LargeAmount,
    FirstWithdrawal,
    NearDailyCap,
    InstantCryptoNovice,
    HighVelocity,
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskFlag::LargeAmount => write!(f, "large_amount"),
            RiskFlag::FirstWithdrawal => write!(f, "first_withdrawal"),
            RiskFlag::NearDailyCap => write!(f, "near_daily_cap"),
            RiskFlag::InstantCryptoNovice => write!(f, "instant_crypto_novice"),
            RiskFlag::HighVelocity => write!(f, "high_velocity"),
        }
    }
}

/// Advisory risk verdict. Flagged requests go on hold, never hard-fail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u32,
    pub flags: Vec<RiskFlag>,
    pub requires_manual_review: bool,
}

// ---------------------------------------------------------------------------
// Cashout request
// ---------------------------------------------------------------------------

/// One withdrawal attempt. Owned exclusively by the orchestrator; never
/// deleted, only transitioned.
///
/// Invariants: `fee.total + net_amount == amount` from creation onwards;
/// `status_history` is monotonically time-ordered and its last entry
/// always equals the current `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutRequest {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub method: PayoutMethod,
    pub speed_tier: SpeedTier,
    pub fee: FeeBreakdown,
    pub net_amount: Decimal,
    pub free_instant_used: bool,
    pub status: CashoutStatus,
    pub status_history: Vec<StatusEntry>,
    pub channel_id: Option<String>,
    pub channel_reference: Option<String>,
    pub risk: RiskAssessment,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub processing_secs: Option<i64>,
}

impl CashoutRequest {
    /// Construct a request in `Pending` with the fee snapshot from a quote.
    pub fn from_quote(user_id: &str, account_id: &str, quote: &FeeQuote, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
            amount: quote.amount,
            currency: quote.currency.clone(),
            method: quote.method,
            speed_tier: quote.speed_tier,
            fee: quote.fee.clone(),
            net_amount: quote.net_amount,
            free_instant_used: quote.free_instant_used,
            status: CashoutStatus::Pending,
            status_history: vec![StatusEntry {
                status: CashoutStatus::Pending,
                at: now,
                reason: None,
            }],
            channel_id: None,
            channel_reference: None,
            risk: RiskAssessment::default(),
            created_at: now,
            updated_at: now,
            estimated_arrival: None,
            actual_arrival: None,
            processing_secs: None,
        }
    }

    /// Apply a status transition, appending to the history.
    ///
    /// Rejects anything outside the allowed transition map, which is what
    /// keeps terminal states terminal.
    pub fn transition(
        &mut self,
        to: CashoutStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CashoutError> {
        if !self.status.can_transition_to(to) {
            return Err(CashoutError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        self.status_history.push(StatusEntry {
            status: to,
            at: now,
            reason,
        });
        Ok(())
    }

    /// Human-readable reason from the most recent history entry, if any.
    pub fn last_reason(&self) -> Option<&str> {
        self.status_history
            .last()
            .and_then(|e| e.reason.as_deref())
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self.status,
            CashoutStatus::Pending | CashoutStatus::Processing
        )
    }
}

// ---------------------------------------------------------------------------
// Payout destination account
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    PendingVerification,
    Active,
    Suspended,
}

/// A verified destination bound to one payout method for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChannelAccount {
    pub id: String,
    pub user_id: String,
    pub method: PayoutMethod,
    /// Opaque destination handle understood by the channel (IBAN, card
    /// token, wallet id, chain address).
    pub destination: String,
    pub label: String,
    pub holder_name: Option<String>,
    pub status: AccountStatus,
    pub total_count: u64,
    pub total_volume: Decimal,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PaymentChannelAccount {
    pub fn is_usable(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

// ---------------------------------------------------------------------------
// User cashout profile
// ---------------------------------------------------------------------------

/// Long-lived per-user aggregate: tier, rolling window usage, lifetime
/// stats, free-instant allowance.
///
/// Usage counters stay within `[0, cap]`; a cancelled or failed request
/// refunds the usage it reserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCashoutProfile {
    pub user_id: String,
    pub tier: VipTier,
    pub daily_used: Decimal,
    pub weekly_used: Decimal,
    pub monthly_used: Decimal,
    pub daily_reset_at: DateTime<Utc>,
    pub weekly_reset_at: DateTime<Utc>,
    pub monthly_reset_at: DateTime<Utc>,
    pub lifetime_count: u64,
    pub lifetime_volume: Decimal,
    /// EMA of completed-request processing time, seconds.
    pub avg_processing_secs: f64,
    pub free_instant_remaining: u32,
    /// Initiation timestamps kept for the trailing-hour velocity signal.
    pub recent_initiations: Vec<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Channel health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Down => write!(f, "down"),
        }
    }
}

/// Process-wide rolling health record, one per channel. Shared, contended
/// state — updated by every transaction outcome and by periodic probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHealth {
    pub channel_id: String,
    pub active: bool,
    pub status: HealthStatus,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub priority: u8,
    pub per_transaction_limit: Decimal,
    pub daily_volume_limit: Decimal,
    pub samples: u64,
}

impl ChannelHealth {
    pub fn is_selectable(&self) -> bool {
        self.active && self.status != HealthStatus::Down
    }
}

// ---------------------------------------------------------------------------
// History stats
// ---------------------------------------------------------------------------

/// Aggregates over a user's cashout history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_requests: usize,
    pub total_withdrawn: Decimal,
    pub avg_processing_secs: f64,
    /// completed / (completed + failed); 0 when neither occurred.
    pub success_rate: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
