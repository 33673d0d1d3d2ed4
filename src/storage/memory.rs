//! In-memory store.
//!
//! The default backend for tests and sandbox runs. Three maps behind one
//! async `RwLock` each; list operations return creation-ordered copies.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::storage::Store;
use crate::types::{CashoutRequest, CashoutStatus, PaymentChannelAccount, UserCashoutProfile};

#[derive(Default)]
pub struct MemoryStore {
    requests: RwLock<HashMap<String, CashoutRequest>>,
    profiles: RwLock<HashMap<String, UserCashoutProfile>>,
    accounts: RwLock<HashMap<String, PaymentChannelAccount>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_request(&self, request: &CashoutRequest) -> Result<()> {
        self.requests
            .write()
            .await
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<CashoutRequest>> {
        Ok(self.requests.read().await.get(id).cloned())
    }

    async fn list_requests_by_user(&self, user_id: &str) -> Result<Vec<CashoutRequest>> {
        let mut matches: Vec<_> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        matches.sort_by_key(|r| r.created_at);
        Ok(matches)
    }

    async fn list_requests_by_status(
        &self,
        status: CashoutStatus,
    ) -> Result<Vec<CashoutRequest>> {
        let mut matches: Vec<_> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matches.sort_by_key(|r| r.created_at);
        Ok(matches)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserCashoutProfile>> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn put_profile(&self, profile: &UserCashoutProfile) -> Result<()> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn put_account(&self, account: &PaymentChannelAccount) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, id: &str) -> Result<Option<PaymentChannelAccount>> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn list_accounts_by_user(&self, user_id: &str) -> Result<Vec<PaymentChannelAccount>> {
        let mut matches: Vec<_> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        matches.sort_by_key(|a| a.created_at);
        Ok(matches)
    }

    async fn remove_account(&self, id: &str) -> Result<bool> {
        Ok(self.accounts.write().await.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeeBreakdown, FeeQuote, PayoutMethod, SpeedTier};
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sample_request(user_id: &str) -> CashoutRequest {
        let quote = FeeQuote {
            amount: dec!(100),
            currency: "USD".into(),
            method: PayoutMethod::BankTransfer,
            speed_tier: SpeedTier::Standard,
            fee: FeeBreakdown {
                flat: dec!(0.50),
                percentage: dec!(0.50),
                discount: Decimal::ZERO,
                total: dec!(1.00),
            },
            net_amount: dec!(99.00),
            free_instant_used: false,
            valid_until: Utc::now() + Duration::minutes(5),
        };
        CashoutRequest::from_quote(user_id, "acc-1", &quote, Utc::now())
    }

    #[tokio::test]
    async fn test_request_roundtrip_reflects_latest_write() {
        let store = MemoryStore::new();
        let mut req = sample_request("u1");
        store.put_request(&req).await.unwrap();

        req.transition(CashoutStatus::Processing, None, Utc::now())
            .unwrap();
        store.put_request(&req).await.unwrap();

        let loaded = store.get_request(&req.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CashoutStatus::Processing);
        assert_eq!(loaded.status_history.len(), 2);
    }

    #[tokio::test]
    async fn test_list_by_user_and_status() {
        let store = MemoryStore::new();
        let a = sample_request("u1");
        let b = sample_request("u1");
        let c = sample_request("u2");
        for r in [&a, &b, &c] {
            store.put_request(r).await.unwrap();
        }

        assert_eq!(store.list_requests_by_user("u1").await.unwrap().len(), 2);
        assert_eq!(
            store
                .list_requests_by_status(CashoutStatus::Pending)
                .await
                .unwrap()
                .len(),
            3
        );
        assert!(store
            .list_requests_by_status(CashoutStatus::Sent)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_remove_account() {
        let store = MemoryStore::new();
        let account = PaymentChannelAccount {
            id: "acc-1".into(),
            user_id: "u1".into(),
            method: PayoutMethod::BankTransfer,
            destination: "iban-x".into(),
            label: "main".into(),
            holder_name: None,
            status: crate::types::AccountStatus::Active,
            total_count: 0,
            total_volume: Decimal::ZERO,
            last_used_at: None,
            created_at: Utc::now(),
        };
        store.put_account(&account).await.unwrap();
        assert!(store.remove_account("acc-1").await.unwrap());
        assert!(!store.remove_account("acc-1").await.unwrap());
        assert!(store.get_account("acc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_keys_return_none() {
        let store = MemoryStore::new();
        assert!(store.get_request("nope").await.unwrap().is_none());
        assert!(store.get_profile("nope").await.unwrap().is_none());
    }
}
