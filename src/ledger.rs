//! Ledger collaborator seam.
//!
//! The balance service is external to this core: the orchestrator only
//! needs to read available funds before creating a request and to debit
//! exactly once per request id on completion.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::info;

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn available_balance(&self, user_id: &str) -> Result<Decimal>;

    /// Debit the user for a completed cashout. Exactly-once per
    /// `request_id`: a repeated call for the same request is an error.
    async fn debit(&self, user_id: &str, amount: Decimal, request_id: &str) -> Result<()>;
}

/// In-memory ledger for the sandbox binary and tests.
pub struct MemoryLedger {
    balances: Mutex<HashMap<String, Decimal>>,
    debited: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            debited: Mutex::new(HashSet::new()),
        }
    }

    pub async fn credit(&self, user_id: &str, amount: Decimal) {
        let mut balances = self.balances.lock().await;
        *balances.entry(user_id.to_string()).or_insert(Decimal::ZERO) += amount;
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn available_balance(&self, user_id: &str) -> Result<Decimal> {
        let balances = self.balances.lock().await;
        Ok(balances.get(user_id).copied().unwrap_or(Decimal::ZERO))
    }

    async fn debit(&self, user_id: &str, amount: Decimal, request_id: &str) -> Result<()> {
        let mut debited = self.debited.lock().await;
        if debited.contains(request_id) {
            bail!("request {request_id} already debited");
        }
        let mut balances = self.balances.lock().await;
        let balance = balances.entry(user_id.to_string()).or_insert(Decimal::ZERO);
        if *balance < amount {
            bail!("ledger balance {balance} below debit {amount} for {user_id}");
        }
        *balance -= amount;
        // Only a debit that moved money consumes the once-marker; a
        // bounced one may be retried.
        debited.insert(request_id.to_string());
        info!(user = user_id, %amount, request = request_id, "Ledger debited");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_credit_and_debit() {
        let ledger = MemoryLedger::new();
        ledger.credit("u1", dec!(1000)).await;
        assert_eq!(ledger.available_balance("u1").await.unwrap(), dec!(1000));

        ledger.debit("u1", dec!(400), "req-1").await.unwrap();
        assert_eq!(ledger.available_balance("u1").await.unwrap(), dec!(600));
    }

    #[tokio::test]
    async fn test_double_debit_rejected() {
        let ledger = MemoryLedger::new();
        ledger.credit("u1", dec!(1000)).await;
        ledger.debit("u1", dec!(100), "req-1").await.unwrap();

        let err = ledger.debit("u1", dec!(100), "req-1").await.unwrap_err();
        assert!(err.to_string().contains("already debited"));
        assert_eq!(ledger.available_balance("u1").await.unwrap(), dec!(900));
    }

    #[tokio::test]
    async fn test_bounced_debit_can_be_retried() {
        let ledger = MemoryLedger::new();
        ledger.credit("u1", dec!(50)).await;

        let err = ledger.debit("u1", dec!(200), "req-1").await.unwrap_err();
        assert!(err.to_string().contains("below debit"));

        ledger.credit("u1", dec!(200)).await;
        ledger.debit("u1", dec!(200), "req-1").await.unwrap();
        assert_eq!(ledger.available_balance("u1").await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn test_unknown_user_has_zero_balance() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.available_balance("ghost").await.unwrap(),
            Decimal::ZERO
        );
    }
}
