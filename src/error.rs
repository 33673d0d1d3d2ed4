//! Error taxonomy for the cashout core.
//!
//! Validation, quota, and authorization failures are returned synchronously
//! to the caller with a specific reason. Channel and ledger failures are
//! recorded on the request's status history and never escape the
//! orchestrator boundary uncaught.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::types::{CashoutStatus, PayoutMethod};

/// Which quota cap was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    PerTransaction,
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::PerTransaction => write!(f, "per-transaction"),
            LimitKind::Daily => write!(f, "daily"),
            LimitKind::Weekly => write!(f, "weekly"),
            LimitKind::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CashoutError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{limit} limit exceeded: {used} + {requested} > {cap}")]
    QuotaExceeded {
        limit: LimitKind,
        cap: Decimal,
        used: Decimal,
        requested: Decimal,
    },

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("no payout provider available for {method}")]
    NoProvider { method: PayoutMethod },

    /// A channel rejected or failed an operation. `retryable` separates
    /// timeouts and 5xx-equivalents from permanent rejections.
    #[error("channel error: {message}")]
    Channel { retryable: bool, message: String },

    #[error("not authorized for this cashout")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: CashoutStatus,
        to: CashoutStatus,
    },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl CashoutError {
    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            CashoutError::Validation(_) => "validation",
            CashoutError::QuotaExceeded { .. } => "quota_exceeded",
            CashoutError::InsufficientFunds { .. } => "insufficient_funds",
            CashoutError::NoProvider { .. } => "no_provider",
            CashoutError::Channel { .. } => "channel",
            CashoutError::Unauthorized => "unauthorized",
            CashoutError::NotFound(_) => "not_found",
            CashoutError::InvalidTransition { .. } => "invalid_transition",
            CashoutError::Storage(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, CashoutError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
