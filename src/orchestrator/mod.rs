//! Cashout orchestrator.
//!
//! Owns the request state machine and wires the registry, fee engine,
//! quota tracker, risk scorer, store, ledger and clock together. All
//! dependencies are passed in at construction — no globals — so tests
//! run against fake clocks, sandbox rails and the in-memory store.

pub mod lifecycle;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::channels::ChannelRegistry;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{CashoutError, Result};
use crate::fees::FeeEngine;
use crate::ledger::Ledger;
use crate::quota::QuotaTracker;
use crate::risk::RiskScorer;
use crate::storage::Store;
use crate::types::{
    AccountStatus, CashoutRequest, CashoutStatus, ChannelHealth, FeeQuote, HistoryStats,
    PaymentChannelAccount, PayoutMethod, SpeedTier, UserCashoutProfile, VipTier,
};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Client-supplied parameters for one withdrawal.
#[derive(Debug, Clone)]
pub struct NewCashout {
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub speed_tier: SpeedTier,
    pub account_id: String,
}

/// Filters for the history listing.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub status: Option<CashoutStatus>,
    pub method: Option<PayoutMethod>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

impl HistoryFilter {
    fn matches(&self, request: &CashoutRequest) -> bool {
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(method) = self.method {
            if request.method != method {
                return false;
            }
        }
        if let Some(from) = self.from {
            if request.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if request.created_at > to {
                return false;
            }
        }
        if let Some(min) = self.min_amount {
            if request.amount < min {
                return false;
            }
        }
        if let Some(max) = self.max_amount {
            if request.amount > max {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct CashoutService {
    pub(crate) registry: ChannelRegistry,
    pub(crate) fees: FeeEngine,
    pub(crate) quota: QuotaTracker,
    pub(crate) risk: RiskScorer,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) currency: String,
    pub(crate) channel_timeout_ms: u64,
    pub(crate) processing_ema_alpha: f64,
    pub(crate) velocity_window: chrono::Duration,
    /// Per-user serialization around quota reservation and profile
    /// mutation; two concurrent initiations by one user must not both
    /// pass a cap check only one can satisfy.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Per-request serialization for the cancel-vs-complete race.
    request_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CashoutService {
    pub fn new(
        config: &AppConfig,
        registry: ChannelRegistry,
        store: Arc<dyn Store>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            fees: FeeEngine::new(
                config.fees.clone(),
                config.tiers.clone(),
                config.service.quote_ttl_secs,
            ),
            quota: QuotaTracker::new(config.tiers.clone()),
            risk: RiskScorer::new(config.risk.clone(), config.tiers.clone()),
            store,
            ledger,
            clock,
            currency: config.service.currency.clone(),
            channel_timeout_ms: config.service.channel_timeout_ms,
            processing_ema_alpha: config.service.processing_ema_alpha,
            velocity_window: chrono::Duration::seconds(config.risk.velocity_window_secs),
            user_locks: Mutex::new(HashMap::new()),
            request_locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id.to_string()).or_default().clone()
    }

    pub(crate) async fn request_lock(&self, request_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.request_locks.lock().await;
        locks.entry(request_id.to_string()).or_default().clone()
    }

    /// Drop the lock entry once a request is terminal; the map would
    /// otherwise grow by one mutex per request for the process lifetime.
    /// A straggler re-minting the entry reloads the stored request and
    /// is rejected by its status.
    pub(crate) async fn drop_request_lock(&self, request_id: &str) {
        self.request_locks.lock().await.remove(request_id);
    }

    #[cfg(test)]
    pub(crate) async fn request_lock_count(&self) -> usize {
        self.request_locks.lock().await.len()
    }

    /// Load a profile, creating one at the lowest tier on first sight,
    /// and apply lazy window rollover. Callers persist when they mutate.
    pub(crate) async fn load_profile(&self, user_id: &str) -> Result<UserCashoutProfile> {
        let now = self.clock.now();
        let mut profile = match self.store.get_profile(user_id).await? {
            Some(profile) => profile,
            None => self.quota.new_profile(user_id, now),
        };
        self.quota.rollover(&mut profile, now);
        Ok(profile)
    }

    // -- Read surface ------------------------------------------------------

    pub async fn get_cashout(&self, request_id: &str, user_id: &str) -> Result<CashoutRequest> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CashoutError::NotFound(format!("cashout {request_id}")))?;
        if request.user_id != user_id {
            return Err(CashoutError::Unauthorized);
        }
        Ok(request)
    }

    /// Fee quote without side effects. The allowance consumption a quote
    /// may promise is only committed by `initiate`.
    pub async fn quote(
        &self,
        user_id: &str,
        amount: Decimal,
        method: PayoutMethod,
        speed_tier: SpeedTier,
    ) -> Result<FeeQuote> {
        if amount <= Decimal::ZERO {
            return Err(CashoutError::Validation("amount must be positive".into()));
        }
        let profile = self.load_profile(user_id).await?;
        self.fees
            .quote(amount, &self.currency, method, speed_tier, &profile, self.clock.now())
            .ok_or_else(|| {
                CashoutError::Validation(format!("{method} is not offered at {speed_tier} speed"))
            })
    }

    /// Methods the client should even be offered for this amount.
    pub async fn available_methods(&self, amount: Decimal) -> Vec<PayoutMethod> {
        self.registry.list_available_methods(amount).await
    }

    pub async fn channel_health(&self) -> Vec<ChannelHealth> {
        self.registry.health_snapshot().await
    }

    /// Run one health probe over every registered channel.
    pub async fn probe_channels(&self) {
        self.registry.probe_all().await;
    }

    pub async fn history(
        &self,
        user_id: &str,
        filter: &HistoryFilter,
    ) -> Result<(Vec<CashoutRequest>, HistoryStats)> {
        let requests: Vec<_> = self
            .store
            .list_requests_by_user(user_id)
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();

        let completed: Vec<_> = requests
            .iter()
            .filter(|r| r.status == CashoutStatus::Completed)
            .collect();
        let failed = requests
            .iter()
            .filter(|r| r.status == CashoutStatus::Failed)
            .count();

        let total_withdrawn = completed.iter().map(|r| r.amount).sum();
        let processing: Vec<i64> = completed.iter().filter_map(|r| r.processing_secs).collect();
        let avg_processing_secs = if processing.is_empty() {
            0.0
        } else {
            processing.iter().sum::<i64>() as f64 / processing.len() as f64
        };
        let terminal = completed.len() + failed;
        let success_rate = if terminal == 0 {
            0.0
        } else {
            completed.len() as f64 / terminal as f64
        };

        let stats = HistoryStats {
            total_requests: requests.len(),
            total_withdrawn,
            avg_processing_secs,
            success_rate,
        };
        Ok((requests, stats))
    }

    // -- Destination accounts ---------------------------------------------

    /// Register a payout destination after channel-side verification.
    pub async fn add_account(
        &self,
        user_id: &str,
        method: PayoutMethod,
        destination: &str,
        label: &str,
    ) -> Result<PaymentChannelAccount> {
        let adapter = self
            .registry
            .select_channel(method)
            .await
            .ok_or(CashoutError::NoProvider { method })?;

        let verification =
            adapter
                .verify_account(destination)
                .await
                .map_err(|e| CashoutError::Channel {
                    retryable: e.retryable,
                    message: e.message,
                })?;
        if !verification.is_valid {
            return Err(CashoutError::Validation(
                "destination failed verification".into(),
            ));
        }

        let account = PaymentChannelAccount {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            method,
            destination: destination.to_string(),
            label: label.to_string(),
            holder_name: verification.holder_name,
            status: AccountStatus::Active,
            total_count: 0,
            total_volume: Decimal::ZERO,
            last_used_at: None,
            created_at: self.clock.now(),
        };
        self.store.put_account(&account).await?;
        info!(user = user_id, account = %account.id, %method, "Payout account added");
        Ok(account)
    }

    pub async fn remove_account(&self, user_id: &str, account_id: &str) -> Result<()> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| CashoutError::NotFound(format!("account {account_id}")))?;
        if account.user_id != user_id {
            return Err(CashoutError::Unauthorized);
        }
        self.store.remove_account(account_id).await?;
        info!(user = user_id, account = account_id, "Payout account removed");
        Ok(())
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<PaymentChannelAccount>> {
        Ok(self.store.list_accounts_by_user(user_id).await?)
    }

    // -- Tier --------------------------------------------------------------

    pub async fn upgrade_tier(
        &self,
        user_id: &str,
        new_tier: VipTier,
    ) -> Result<UserCashoutProfile> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self.load_profile(user_id).await?;
        self.quota.upgrade_tier(&mut profile, new_tier);
        self.store.put_profile(&profile).await?;
        info!(user = user_id, tier = %new_tier, "Tier upgraded");
        Ok(profile)
    }

    pub async fn profile(&self, user_id: &str) -> Result<UserCashoutProfile> {
        self.load_profile(user_id).await
    }
}
