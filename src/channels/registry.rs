//! Channel registry — routing and rolling health.
//!
//! Maps a payment method to the best available adapter and maintains a
//! rolling health record per channel. Health is shared, contended state
//! updated by every in-flight request, so all mutation goes through one
//! async `RwLock` over the health map.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::channels::ChannelAdapter;
use crate::config::RegistryConfig;
use crate::types::{ChannelHealth, HealthStatus, PayoutMethod};
use rust_decimal::Decimal;

pub struct ChannelRegistry {
    /// Registration order is preserved — it is the selection tie-breaker.
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    health: RwLock<HashMap<String, ChannelHealth>>,
    config: RegistryConfig,
}

impl ChannelRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            adapters: Vec::new(),
            health: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register an adapter and seed its health record (healthy, 100%).
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let record = ChannelHealth {
            channel_id: adapter.id().to_string(),
            active: true,
            status: HealthStatus::Healthy,
            avg_latency_ms: 0.0,
            success_rate: 1.0,
            priority: adapter.priority(),
            per_transaction_limit: adapter.per_transaction_limit(),
            daily_volume_limit: adapter.daily_volume_limit(),
            samples: 0,
        };
        self.health
            .get_mut()
            .insert(adapter.id().to_string(), record);
        info!(
            channel = adapter.id(),
            method = %adapter.method(),
            priority = adapter.priority(),
            "Channel registered"
        );
        self.adapters.push(adapter);
    }

    pub fn adapter(&self, channel_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.id() == channel_id)
            .cloned()
    }

    /// Best healthy channel for a method: active, not down, lowest
    /// priority; ties broken by registration order. None means the caller
    /// must surface a no-provider failure — never fall back to a
    /// different method.
    pub async fn select_channel(&self, method: PayoutMethod) -> Option<Arc<dyn ChannelAdapter>> {
        let health = self.health.read().await;
        let mut best: Option<&Arc<dyn ChannelAdapter>> = None;
        for adapter in &self.adapters {
            if adapter.method() != method {
                continue;
            }
            let selectable = health
                .get(adapter.id())
                .map(|h| h.is_selectable())
                .unwrap_or(false);
            if !selectable {
                continue;
            }
            // Strict < keeps the earliest-registered adapter on ties.
            match best {
                Some(current) if adapter.priority() < current.priority() => {
                    best = Some(adapter);
                }
                None => best = Some(adapter),
                _ => {}
            }
        }
        best.cloned()
    }

    /// Record a transaction outcome into the rolling averages and
    /// recompute the health status from the thresholds.
    pub async fn record_outcome(&self, channel_id: &str, success: bool, latency_ms: u64) {
        let mut health = self.health.write().await;
        let Some(record) = health.get_mut(channel_id) else {
            warn!(channel = channel_id, "Outcome for unknown channel ignored");
            return;
        };

        let alpha = self.config.smoothing;
        let sample = if success { 1.0 } else { 0.0 };
        record.success_rate = alpha * sample + (1.0 - alpha) * record.success_rate;
        record.avg_latency_ms = if record.samples == 0 {
            latency_ms as f64
        } else {
            alpha * latency_ms as f64 + (1.0 - alpha) * record.avg_latency_ms
        };
        record.samples += 1;

        let previous = record.status;
        record.status = if record.success_rate < self.config.down_below {
            HealthStatus::Down
        } else if record.success_rate < self.config.degraded_below {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        if record.status != previous {
            warn!(
                channel = channel_id,
                from = %previous,
                to = %record.status,
                success_rate = format!("{:.3}", record.success_rate),
                "Channel health status changed"
            );
        } else {
            debug!(
                channel = channel_id,
                success,
                latency_ms,
                success_rate = format!("{:.3}", record.success_rate),
                "Outcome recorded"
            );
        }
    }

    /// Methods for which at least one healthy channel's per-transaction
    /// limit covers `amount`. Drives what the client is even offered.
    pub async fn list_available_methods(&self, amount: Decimal) -> Vec<PayoutMethod> {
        let health = self.health.read().await;
        let mut methods = BTreeSet::new();
        for adapter in &self.adapters {
            let selectable = health
                .get(adapter.id())
                .map(|h| h.is_selectable())
                .unwrap_or(false);
            if selectable && adapter.per_transaction_limit() >= amount {
                methods.insert(adapter.method());
            }
        }
        methods.into_iter().collect()
    }

    /// Run a health probe against every adapter, feeding results through
    /// the same EMA path as transaction outcomes.
    pub async fn probe_all(&self) {
        let probes = self.adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            async move {
                let outcome = adapter.health_check().await;
                (adapter.id().to_string(), outcome)
            }
        });
        for (channel_id, outcome) in join_all(probes).await {
            match outcome {
                Ok(latency_ms) => self.record_outcome(&channel_id, true, latency_ms).await,
                Err(e) => {
                    warn!(channel = %channel_id, error = %e, "Health probe failed");
                    self.record_outcome(&channel_id, false, 0).await;
                }
            }
        }
    }

    /// Administratively enable or disable a channel.
    pub async fn set_active(&self, channel_id: &str, active: bool) {
        let mut health = self.health.write().await;
        if let Some(record) = health.get_mut(channel_id) {
            record.active = active;
            info!(channel = channel_id, active, "Channel active flag set");
        }
    }

    pub async fn health_snapshot(&self) -> Vec<ChannelHealth> {
        let health = self.health.read().await;
        let mut records: Vec<_> = health.values().cloned().collect();
        records.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        records
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::sandbox::SandboxRail;
    use rust_decimal_macros::dec;

    fn registry_with(rails: Vec<SandboxRail>) -> ChannelRegistry {
        let mut registry = ChannelRegistry::new(RegistryConfig::default());
        for rail in rails {
            registry.register(Arc::new(rail));
        }
        registry
    }

    #[tokio::test]
    async fn test_select_prefers_lower_priority() {
        let registry = registry_with(vec![
            SandboxRail::bank(),
            SandboxRail::bank_backup(),
        ]);
        let selected = registry
            .select_channel(PayoutMethod::BankTransfer)
            .await
            .unwrap();
        assert_eq!(selected.id(), "bank-primary");
    }

    #[tokio::test]
    async fn test_select_tie_breaks_by_registration_order() {
        let mut second = SandboxRail::bank_backup();
        second.set_priority(SandboxRail::bank().priority());
        let registry = registry_with(vec![SandboxRail::bank(), second]);
        let selected = registry
            .select_channel(PayoutMethod::BankTransfer)
            .await
            .unwrap();
        assert_eq!(selected.id(), "bank-primary");
    }

    #[tokio::test]
    async fn test_select_none_for_unserved_method() {
        let registry = registry_with(vec![SandboxRail::bank()]);
        assert!(registry.select_channel(PayoutMethod::Crypto).await.is_none());
    }

    #[tokio::test]
    async fn test_three_failures_degrade_then_down_excludes() {
        let registry = registry_with(vec![SandboxRail::bank()]);

        // alpha 0.1 from 1.0: 0.9, 0.81, 0.729 -> degraded (< 0.8)
        for _ in 0..3 {
            registry.record_outcome("bank-primary", false, 200).await;
        }
        let snapshot = registry.health_snapshot().await;
        assert_eq!(snapshot[0].status, HealthStatus::Degraded);
        assert!((snapshot[0].success_rate - 0.729).abs() < 1e-9);

        // Degraded channels are still selectable.
        assert!(registry
            .select_channel(PayoutMethod::BankTransfer)
            .await
            .is_some());

        // Keep failing until the rate drops under 0.5 -> down, unselectable.
        for _ in 0..4 {
            registry.record_outcome("bank-primary", false, 200).await;
        }
        let snapshot = registry.health_snapshot().await;
        assert_eq!(snapshot[0].status, HealthStatus::Down);
        assert!(registry
            .select_channel(PayoutMethod::BankTransfer)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_recovery_back_to_healthy() {
        let registry = registry_with(vec![SandboxRail::bank()]);
        for _ in 0..3 {
            registry.record_outcome("bank-primary", false, 100).await;
        }
        // Enough successes to climb back above 0.8.
        for _ in 0..12 {
            registry.record_outcome("bank-primary", true, 100).await;
        }
        let snapshot = registry.health_snapshot().await;
        assert_eq!(snapshot[0].status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_latency_ema_seeds_from_first_sample() {
        let registry = registry_with(vec![SandboxRail::bank()]);
        registry.record_outcome("bank-primary", true, 300).await;
        let snapshot = registry.health_snapshot().await;
        assert_eq!(snapshot[0].avg_latency_ms, 300.0);

        registry.record_outcome("bank-primary", true, 100).await;
        let snapshot = registry.health_snapshot().await;
        // 0.1 * 100 + 0.9 * 300 = 280
        assert!((snapshot[0].avg_latency_ms - 280.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_list_available_methods_respects_limits() {
        let registry = registry_with(vec![SandboxRail::bank(), SandboxRail::wallet()]);
        let methods = registry.list_available_methods(dec!(500)).await;
        assert!(methods.contains(&PayoutMethod::BankTransfer));
        assert!(methods.contains(&PayoutMethod::DigitalWallet));

        // Wallet's per-transaction limit is lower than the bank's.
        let methods = registry.list_available_methods(dec!(9000)).await;
        assert!(methods.contains(&PayoutMethod::BankTransfer));
        assert!(!methods.contains(&PayoutMethod::DigitalWallet));
    }

    #[tokio::test]
    async fn test_inactive_channel_not_selected() {
        let registry = registry_with(vec![SandboxRail::bank()]);
        registry.set_active("bank-primary", false).await;
        assert!(registry
            .select_channel(PayoutMethod::BankTransfer)
            .await
            .is_none());
        registry.set_active("bank-primary", true).await;
        assert!(registry
            .select_channel(PayoutMethod::BankTransfer)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_concurrent_outcomes_all_counted() {
        let registry = Arc::new(registry_with(vec![SandboxRail::bank()]));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.record_outcome("bank-primary", true, 50).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let snapshot = registry.health_snapshot().await;
        assert_eq!(snapshot[0].samples, 32);
    }

    #[tokio::test]
    async fn test_probe_all_feeds_health() {
        let registry = registry_with(vec![SandboxRail::bank(), SandboxRail::crypto()]);
        registry.probe_all().await;
        let snapshot = registry.health_snapshot().await;
        assert!(snapshot.iter().all(|h| h.samples == 1));
    }
}
