//! PAYRAIL — cashout orchestration service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the channel registry, storage, and ledger into the orchestrator,
//! and runs the reconcile/probe loops with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use payrail::api;
use payrail::channels::sandbox::SandboxRail;
use payrail::channels::ChannelRegistry;
use payrail::clock::SystemClock;
use payrail::config::AppConfig;
use payrail::ledger::MemoryLedger;
use payrail::orchestrator::CashoutService;
use payrail::storage::{MemoryStore, SqliteStore, Store};

const BANNER: &str = r#"
 ____   _ __   __ ____      _     ___  _
|  _ \ / \\ \ / /|  _ \    / \   |_ _|| |
|  __// _ \\ V / |  _ <   / _ \   | | | |___
|_| /_/ \_\ |_|  |_| \_\ /_/ \_\ |___||_____|

  Cashout Orchestration Core
  v0.1.0 — sandbox rails
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load_or_default("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        currency = %cfg.service.currency,
        channel_timeout_ms = cfg.service.channel_timeout_ms,
        storage = %cfg.storage.backend,
        "PAYRAIL starting up"
    );

    // -- Channel registry --------------------------------------------------

    let clock = Arc::new(SystemClock);
    let mut registry = ChannelRegistry::new(cfg.registry.clone());
    if cfg.channels.bank {
        registry.register(Arc::new(SandboxRail::bank()));
        registry.register(Arc::new(SandboxRail::bank_backup()));
    }
    if cfg.channels.card {
        registry.register(Arc::new(SandboxRail::card()));
    }
    if cfg.channels.wallet {
        registry.register(Arc::new(SandboxRail::wallet()));
    }
    if cfg.channels.crypto {
        registry.register(Arc::new(SandboxRail::crypto()));
    }

    // -- Storage and ledger -------------------------------------------------

    let store: Arc<dyn Store> = match cfg.storage.backend.as_str() {
        "sqlite" => {
            let store = SqliteStore::connect(&cfg.storage.sqlite_path).await?;
            info!(path = %cfg.storage.sqlite_path, "SQLite storage ready");
            Arc::new(store)
        }
        _ => {
            info!("In-memory storage (state is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    // Sandbox ledger with a seeded demo balance. A deployment replaces
    // this with a client for the real balance service.
    let ledger = Arc::new(MemoryLedger::new());
    ledger.credit("demo", rust_decimal_macros::dec!(10000)).await;
    info!(user = "demo", balance = "10000", "Sandbox ledger seeded");

    let service = Arc::new(CashoutService::new(
        &cfg,
        registry,
        store,
        ledger,
        clock,
    ));

    // -- API server ---------------------------------------------------------

    if cfg.api.enabled {
        api::spawn_api(service.clone(), cfg.api.port)?;
    }

    // -- Reconcile and probe loops -----------------------------------------

    let mut reconcile = tokio::time::interval(Duration::from_secs(cfg.service.reconcile_interval_secs));
    let mut probe = tokio::time::interval(Duration::from_secs(cfg.service.probe_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        reconcile_secs = cfg.service.reconcile_interval_secs,
        probe_secs = cfg.service.probe_interval_secs,
        "Entering service loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = reconcile.tick() => {
                match service.reconcile_once().await {
                    Ok(0) => {}
                    Ok(n) => info!(settled = n, "Reconcile pass complete"),
                    Err(e) => error!(error = %e, "Reconcile pass failed"),
                }
            }
            _ = probe.tick() => {
                service.probe_channels().await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("PAYRAIL shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("payrail=info"));

    let json_logging = std::env::var("PAYRAIL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
