//!
//! Utility module for the wallet sync engine.
//!
//! Re-exports formatting helpers for use throughout the codebase.
/// Amount formatting for display
pub mod format;

pub use format::{format_ckb, format_shannons_delta};
