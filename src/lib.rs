//! PAYRAIL — Cashout Orchestration Core
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod channels;
pub mod clock;
pub mod config;
pub mod error;
pub mod fees;
pub mod ledger;
pub mod orchestrator;
pub mod quota;
pub mod risk;
pub mod storage;
pub mod types;
