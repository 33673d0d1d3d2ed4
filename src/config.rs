//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section carries a `Default` with the illustrative constants
//! (smoothing factor, review threshold, fee schedule, tier caps) so
//! tests and the binary run without a file. The constants are
//! configuration, not business rules.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::types::{PayoutMethod, SpeedTier, VipTier};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub risk: RiskConfig,
    pub fees: FeesConfig,
    pub tiers: TiersConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub currency: String,
    /// Upper bound on any single channel call.
    pub channel_timeout_ms: u64,
    pub quote_ttl_secs: i64,
    pub reconcile_interval_secs: u64,
    pub probe_interval_secs: u64,
    /// Smoothing for the profile's processing-time EMA.
    pub processing_ema_alpha: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "PAYRAIL-001".into(),
            currency: "USD".into(),
            channel_timeout_ms: 8_000,
            quote_ttl_secs: 300,
            reconcile_interval_secs: 15,
            probe_interval_secs: 60,
            processing_ema_alpha: 0.2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8090,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// "memory" or "sqlite".
    pub backend: String,
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            sqlite_path: "payrail.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// EMA smoothing factor for latency and success rate.
    pub smoothing: f64,
    /// Success rate below which a channel is degraded.
    pub degraded_below: f64,
    /// Success rate below which a channel is down.
    pub down_below: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.1,
            degraded_below: 0.8,
            down_below: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub large_amount_threshold: Decimal,
    pub large_amount_points: u32,
    pub first_withdrawal_points: u32,
    /// Fraction of the daily cap above which the proximity flag fires.
    pub near_cap_fraction: Decimal,
    pub near_cap_points: u32,
    /// Lifetime count at or below which the user counts as a novice for
    /// the instant+crypto combination flag.
    pub novice_lifetime_max: u64,
    pub instant_crypto_points: u32,
    pub velocity_window_secs: i64,
    /// Initiations within the window at which the velocity flag fires.
    pub velocity_min_count: usize,
    pub velocity_points: u32,
    pub review_threshold: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            large_amount_threshold: dec!(1000),
            large_amount_points: 25,
            first_withdrawal_points: 15,
            near_cap_fraction: dec!(0.8),
            near_cap_points: 15,
            novice_lifetime_max: 5,
            instant_crypto_points: 30,
            velocity_window_secs: 3600,
            velocity_min_count: 3,
            velocity_points: 20,
            review_threshold: 50,
        }
    }
}

/// One (method, tier) row of the fee schedule.
#[derive(Debug, Deserialize, Clone)]
pub struct FeeRule {
    pub method: PayoutMethod,
    pub tier: SpeedTier,
    pub flat: Decimal,
    /// Fraction of the gross amount, e.g. 0.015 for 1.5%.
    pub percent: Decimal,
    pub min: Decimal,
    pub max: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeesConfig {
    pub schedule: Vec<FeeRule>,
}

impl FeesConfig {
    pub fn rule(&self, method: PayoutMethod, tier: SpeedTier) -> Option<&FeeRule> {
        self.schedule
            .iter()
            .find(|r| r.method == method && r.tier == tier)
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        use PayoutMethod::*;
        use SpeedTier::*;
        let rule = |method, tier, flat, percent, min, max| FeeRule {
            method,
            tier,
            flat,
            percent,
            min,
            max,
        };
        Self {
            schedule: vec![
                rule(BankTransfer, Instant, dec!(2.50), dec!(0.015), dec!(3.00), dec!(45.00)),
                rule(BankTransfer, Fast, dec!(1.50), dec!(0.010), dec!(2.00), dec!(30.00)),
                rule(BankTransfer, Standard, dec!(0.50), dec!(0.005), dec!(1.00), dec!(15.00)),
                rule(BankTransfer, Economy, dec!(0.00), dec!(0.002), dec!(0.25), dec!(8.00)),
                rule(CardPush, Instant, dec!(1.75), dec!(0.018), dec!(2.50), dec!(40.00)),
                rule(CardPush, Fast, dec!(1.00), dec!(0.012), dec!(1.50), dec!(25.00)),
                rule(DigitalWallet, Instant, dec!(1.00), dec!(0.012), dec!(1.25), dec!(20.00)),
                rule(DigitalWallet, Standard, dec!(0.00), dec!(0.030), dec!(0.50), dec!(12.00)),
                rule(Crypto, Fast, dec!(3.00), dec!(0.008), dec!(3.50), dec!(50.00)),
                rule(Crypto, Standard, dec!(1.50), dec!(0.005), dec!(2.00), dec!(25.00)),
            ],
        }
    }
}

/// Static benefits attached to a VIP tier.
#[derive(Debug, Deserialize, Clone)]
pub struct TierBenefits {
    pub per_transaction_limit: Decimal,
    pub daily_limit: Decimal,
    pub weekly_limit: Decimal,
    pub monthly_limit: Decimal,
    /// Fraction taken off the computed fee, e.g. 0.10 for 10%.
    pub fee_discount: Decimal,
    pub free_instant_per_week: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TiersConfig {
    pub standard: TierBenefits,
    pub silver: TierBenefits,
    pub gold: TierBenefits,
    pub platinum: TierBenefits,
}

impl TiersConfig {
    pub fn benefits(&self, tier: VipTier) -> &TierBenefits {
        match tier {
            VipTier::Standard => &self.standard,
            VipTier::Silver => &self.silver,
            VipTier::Gold => &self.gold,
            VipTier::Platinum => &self.platinum,
        }
    }
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            standard: TierBenefits {
                per_transaction_limit: dec!(2000),
                daily_limit: dec!(5000),
                weekly_limit: dec!(20000),
                monthly_limit: dec!(50000),
                fee_discount: dec!(0),
                free_instant_per_week: 0,
            },
            silver: TierBenefits {
                per_transaction_limit: dec!(5000),
                daily_limit: dec!(15000),
                weekly_limit: dec!(60000),
                monthly_limit: dec!(150000),
                fee_discount: dec!(0.05),
                free_instant_per_week: 1,
            },
            gold: TierBenefits {
                per_transaction_limit: dec!(15000),
                daily_limit: dec!(40000),
                weekly_limit: dec!(150000),
                monthly_limit: dec!(400000),
                fee_discount: dec!(0.10),
                free_instant_per_week: 3,
            },
            platinum: TierBenefits {
                per_transaction_limit: dec!(50000),
                daily_limit: dec!(120000),
                weekly_limit: dec!(400000),
                monthly_limit: dec!(1000000),
                fee_discount: dec!(0.20),
                free_instant_per_week: 10,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelsConfig {
    pub bank: bool,
    pub card: bool,
    pub wallet: bool,
    pub crypto: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            bank: true,
            card: true,
            wallet: true,
            crypto: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load from file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
