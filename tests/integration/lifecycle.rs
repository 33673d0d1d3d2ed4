//! End-to-end lifecycle tests.
//!
//! Drive the orchestrator through its public surface only: register a
//! destination, quote, initiate, reconcile, and inspect history — with
//! deterministic channels and a manual clock.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use payrail::channels::sandbox::SandboxRail;
use payrail::channels::{ChannelAdapter, ChannelError, ChannelRegistry};
use payrail::clock::ManualClock;
use payrail::config::AppConfig;
use payrail::error::CashoutError;
use payrail::ledger::{Ledger, MemoryLedger};
use payrail::orchestrator::{CashoutService, HistoryFilter, NewCashout};
use payrail::storage::MemoryStore;
use payrail::types::{CashoutStatus, PayoutMethod, SpeedTier, VipTier};

use crate::mock_channel::MockChannel;

struct TestRig {
    service: Arc<CashoutService>,
    clock: Arc<ManualClock>,
    ledger: Arc<MemoryLedger>,
}

async fn rig(adapters: Vec<Arc<dyn ChannelAdapter>>) -> TestRig {
    let config = AppConfig::default();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap(),
    ));
    let mut registry = ChannelRegistry::new(config.registry.clone());
    for adapter in adapters {
        registry.register(adapter);
    }
    let ledger = Arc::new(MemoryLedger::new());
    ledger.credit("u1", dec!(10000)).await;
    let service = Arc::new(CashoutService::new(
        &config,
        registry,
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        clock.clone(),
    ));
    TestRig {
        service,
        clock,
        ledger,
    }
}

async fn sandbox_rig() -> TestRig {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap(),
    ));
    let rail = SandboxRail::bank().with_clock(clock.clone());
    let config = AppConfig::default();
    let mut registry = ChannelRegistry::new(config.registry.clone());
    registry.register(Arc::new(rail));
    let ledger = Arc::new(MemoryLedger::new());
    ledger.credit("u1", dec!(10000)).await;
    let service = Arc::new(CashoutService::new(
        &config,
        registry,
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        clock.clone(),
    ));
    TestRig {
        service,
        clock,
        ledger,
    }
}

async fn register_bank_account(rig: &TestRig) -> String {
    let account = rig
        .service
        .add_account(
            "u1",
            PayoutMethod::BankTransfer,
            "DE89370400440532013000",
            "main",
        )
        .await
        .unwrap();
    account.id
}

fn cashout(amount: Decimal, tier: SpeedTier, account_id: &str) -> NewCashout {
    NewCashout {
        amount,
        method: PayoutMethod::BankTransfer,
        speed_tier: tier,
        account_id: account_id.to_string(),
    }
}

#[tokio::test]
async fn test_full_cashout_journey() {
    let rig = sandbox_rig().await;
    let account_id = register_bank_account(&rig).await;

    // Quote first: 500 instant over the bank rail is 2.50 + 1.5%.
    let quote = rig
        .service
        .quote("u1", dec!(500), PayoutMethod::BankTransfer, SpeedTier::Instant)
        .await
        .unwrap();
    assert_eq!(quote.fee.total, dec!(10.00));
    assert_eq!(quote.net_amount, dec!(490.00));

    let request = rig
        .service
        .initiate("u1", cashout(dec!(500), SpeedTier::Instant, &account_id))
        .await
        .unwrap();
    assert_eq!(request.status, CashoutStatus::Sent);
    assert!(request.channel_reference.is_some());

    // In flight until the rail's two-minute instant window passes.
    assert_eq!(rig.service.reconcile_once().await.unwrap(), 0);
    rig.clock.advance(Duration::minutes(3));
    assert_eq!(rig.service.reconcile_once().await.unwrap(), 1);

    let settled = rig.service.get_cashout(&request.id, "u1").await.unwrap();
    assert_eq!(settled.status, CashoutStatus::Completed);
    assert!(settled.actual_arrival.is_some());
    let statuses: Vec<_> = settled.status_history.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            CashoutStatus::Pending,
            CashoutStatus::Processing,
            CashoutStatus::Sent,
            CashoutStatus::Completed,
        ]
    );

    // The gross amount left the ledger exactly once.
    assert_eq!(rig.ledger.available_balance("u1").await.unwrap(), dec!(9500));

    let (_, stats) = rig
        .service
        .history("u1", &HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.total_withdrawn, dec!(500));
    assert_eq!(stats.success_rate, 1.0);

    let profile = rig.service.profile("u1").await.unwrap();
    assert_eq!(profile.lifetime_count, 1);
    assert_eq!(profile.lifetime_volume, dec!(500));
}

#[tokio::test]
async fn test_failover_to_backup_after_primary_sinks() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap(),
    ));
    let primary = Arc::new(MockChannel::new(
        "bank-primary",
        PayoutMethod::BankTransfer,
        1,
        clock.clone(),
    ));
    let backup = Arc::new(MockChannel::new(
        "bank-backup",
        PayoutMethod::BankTransfer,
        2,
        clock.clone(),
    ));
    let rig = rig(vec![primary.clone(), backup.clone()]).await;
    let account_id = register_bank_account(&rig).await;
    primary.set_error(ChannelError::retryable("upstream outage"));

    // Failures route to the primary until its success rate decays below
    // the down threshold (0.9^n < 0.5 after seven outcomes).
    for _ in 0..7 {
        let request = rig
            .service
            .initiate("u1", cashout(dec!(100), SpeedTier::Standard, &account_id))
            .await
            .unwrap();
        assert_eq!(request.status, CashoutStatus::Failed);
        assert_eq!(request.channel_id.as_deref(), Some("bank-primary"));
    }

    let request = rig
        .service
        .initiate("u1", cashout(dec!(100), SpeedTier::Standard, &account_id))
        .await
        .unwrap();
    assert_eq!(request.status, CashoutStatus::Sent);
    assert_eq!(request.channel_id.as_deref(), Some("bank-backup"));
    assert_eq!(backup.orders().len(), 1);

    // Failed attempts refunded their reservations; only the sent one holds.
    let profile = rig.service.profile("u1").await.unwrap();
    assert_eq!(profile.daily_used, dec!(100));
}

#[tokio::test]
async fn test_daily_quota_enforced_across_requests() {
    let rig = sandbox_rig().await;
    let account_id = register_bank_account(&rig).await;

    // Settle one cashout first so later attempts are not first
    // withdrawals stacking risk flags near the cap.
    let first = rig
        .service
        .initiate("u1", cashout(dec!(900), SpeedTier::Instant, &account_id))
        .await
        .unwrap();
    rig.clock.advance(Duration::minutes(3));
    rig.service.reconcile_once().await.unwrap();
    let first = rig.service.get_cashout(&first.id, "u1").await.unwrap();
    assert_eq!(first.status, CashoutStatus::Completed);

    // Standard tier: 5000/day. Four more 900s leave 500 of headroom.
    for _ in 0..4 {
        let request = rig
            .service
            .initiate("u1", cashout(dec!(900), SpeedTier::Standard, &account_id))
            .await
            .unwrap();
        assert_eq!(request.status, CashoutStatus::Sent);
    }

    let err = rig
        .service
        .initiate("u1", cashout(dec!(900), SpeedTier::Standard, &account_id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CashoutError::QuotaExceeded {
            limit: payrail::error::LimitKind::Daily,
            ..
        }
    ));

    // Exactly filling the window is allowed.
    let request = rig
        .service
        .initiate("u1", cashout(dec!(500), SpeedTier::Standard, &account_id))
        .await
        .unwrap();
    assert_eq!(request.status, CashoutStatus::Sent);

    let profile = rig.service.profile("u1").await.unwrap();
    assert_eq!(profile.daily_used, dec!(5000));

    // The window rolls over lazily at the next UTC midnight.
    rig.clock.advance(Duration::hours(15));
    let profile = rig.service.profile("u1").await.unwrap();
    assert_eq!(profile.daily_used, Decimal::ZERO);
}

#[tokio::test]
async fn test_gold_free_instant_allowance() {
    let rig = sandbox_rig().await;
    let account_id = register_bank_account(&rig).await;
    rig.service.upgrade_tier("u1", VipTier::Gold).await.unwrap();

    // Three free instant cashouts per week, then fees apply again.
    for _ in 0..3 {
        let request = rig
            .service
            .initiate("u1", cashout(dec!(200), SpeedTier::Instant, &account_id))
            .await
            .unwrap();
        assert_eq!(request.fee.total, Decimal::ZERO);
        assert_eq!(request.net_amount, dec!(200));
        assert!(request.free_instant_used);
    }

    let request = rig
        .service
        .initiate("u1", cashout(dec!(200), SpeedTier::Instant, &account_id))
        .await
        .unwrap();
    assert!(!request.free_instant_used);
    // 2.50 + 1.5% of 200 = 5.50, minus the 10% gold discount, rounded up.
    assert_eq!(request.fee.total, dec!(4.95));
}

#[tokio::test]
async fn test_risk_hold_approve_and_settle() {
    let rig = sandbox_rig().await;
    let account_id = register_bank_account(&rig).await;

    // Two quick small cashouts put the third inside the velocity window;
    // a large instant first-ish withdrawal then stacks past the review
    // threshold.
    for _ in 0..2 {
        rig.service
            .initiate("u1", cashout(dec!(50), SpeedTier::Standard, &account_id))
            .await
            .unwrap();
    }

    let held = rig
        .service
        .initiate("u1", cashout(dec!(1500), SpeedTier::Instant, &account_id))
        .await
        .unwrap();
    assert_eq!(held.status, CashoutStatus::OnHold);
    assert!(held.risk.requires_manual_review);

    let approved = rig
        .service
        .resolve_hold(&held.id, true, None)
        .await
        .unwrap();
    assert_eq!(approved.status, CashoutStatus::Sent);

    rig.clock.advance(Duration::minutes(3));
    rig.service.reconcile_once().await.unwrap();
    let settled = rig.service.get_cashout(&held.id, "u1").await.unwrap();
    assert_eq!(settled.status, CashoutStatus::Completed);
}

#[tokio::test]
async fn test_rail_rejection_during_reconcile_fails_request() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap(),
    ));
    let channel = Arc::new(MockChannel::new(
        "bank-primary",
        PayoutMethod::BankTransfer,
        1,
        clock.clone(),
    ));
    let rig = rig(vec![channel.clone()]).await;
    let account_id = register_bank_account(&rig).await;

    let request = rig
        .service
        .initiate("u1", cashout(dec!(400), SpeedTier::Instant, &account_id))
        .await
        .unwrap();
    assert_eq!(request.status, CashoutStatus::Sent);

    channel.reject_all();
    rig.clock.advance(Duration::minutes(3));
    assert_eq!(rig.service.reconcile_once().await.unwrap(), 1);

    let failed = rig.service.get_cashout(&request.id, "u1").await.unwrap();
    assert_eq!(failed.status, CashoutStatus::Failed);

    // The reservation came back and nothing was debited.
    let profile = rig.service.profile("u1").await.unwrap();
    assert_eq!(profile.daily_used, Decimal::ZERO);
    assert_eq!(rig.ledger.available_balance("u1").await.unwrap(), dec!(10000));
}

#[tokio::test]
async fn test_reverse_after_completion() {
    let rig = sandbox_rig().await;
    let account_id = register_bank_account(&rig).await;

    let request = rig
        .service
        .initiate("u1", cashout(dec!(300), SpeedTier::Instant, &account_id))
        .await
        .unwrap();
    rig.clock.advance(Duration::minutes(3));
    rig.service.reconcile_once().await.unwrap();

    let reversed = rig
        .service
        .reverse(&request.id, "issuer chargeback")
        .await
        .unwrap();
    assert_eq!(reversed.status, CashoutStatus::Reversed);
    assert_eq!(reversed.last_reason(), Some("issuer chargeback"));
}
