//! Persistence layer.
//!
//! Repository abstraction over requests, profiles, and destination
//! accounts so the orchestration logic runs unchanged against the
//! in-memory test double or the SQLite backend. Reads reflect the
//! latest committed write before the next operation on the same key.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{CashoutRequest, CashoutStatus, PaymentChannelAccount, UserCashoutProfile};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn put_request(&self, request: &CashoutRequest) -> Result<()>;
    async fn get_request(&self, id: &str) -> Result<Option<CashoutRequest>>;
    async fn list_requests_by_user(&self, user_id: &str) -> Result<Vec<CashoutRequest>>;
    /// Used by the reconciliation pass to find in-flight payouts.
    async fn list_requests_by_status(&self, status: CashoutStatus)
        -> Result<Vec<CashoutRequest>>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserCashoutProfile>>;
    async fn put_profile(&self, profile: &UserCashoutProfile) -> Result<()>;

    async fn put_account(&self, account: &PaymentChannelAccount) -> Result<()>;
    async fn get_account(&self, id: &str) -> Result<Option<PaymentChannelAccount>>;
    async fn list_accounts_by_user(&self, user_id: &str) -> Result<Vec<PaymentChannelAccount>>;
    /// Returns whether an account was actually removed.
    async fn remove_account(&self, id: &str) -> Result<bool>;
}
