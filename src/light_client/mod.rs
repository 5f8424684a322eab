//! Light client integration module for CKB.
//!
//! This module provides the port the sync engine consumes, a JSON-RPC implementation of it, and
//! the wire types shared by both. The light client indexes cells and transactions for the scripts
//! registered with it and relays transactions to its peers.

/// JSON-RPC client for a running light client
mod client;
/// Port trait consumed by the engine
mod port;
/// Type definitions for light client data structures
mod types;

pub use client::LightClientRpc;
pub use port::LightClientPort;
pub use types::*;
