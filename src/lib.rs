//! Wallet account synchronization and balance reconciliation on top of a CKB light client.
//!
//! [`WalletSyncEngine`] is the entry point. It brings the light client online, registers the
//! wallet's lock script from a height chosen by [`SyncMode`] (resuming earlier progress when
//! there is any), reconciles a live balance from raw cell and transaction queries, and follows
//! submitted transactions to confirmation.

pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod light_client;
pub mod node;
pub mod persistence;
pub mod sync;
pub mod transaction;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::{EngineConfig, EngineTimings, Network, SyncMode};
pub use engine::{NodeStatus, WalletSyncEngine};
pub use error::WalletSyncError;
