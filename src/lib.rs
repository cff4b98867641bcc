//! Wallet and role engine for a peer-reviewed marketplace.
//!
//! Balances only move through [`engine::BalanceEngine`]. The deposit, role
//! and dispute workflows sit on top of it and reach storage through the
//! traits in [`store`], so the same rules run against the in-memory store and
//! the sled one.

pub mod account;
pub mod config;
pub mod context;
pub mod deposit;
pub mod dispute;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod posts;
pub mod report;
pub mod role;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use config::WalletConfig;
pub use error::{WalletError, WalletResult};
pub use service::WalletService;
pub use types::{Money, TimeStamp};
