//! Progress tracking for account synchronization.
//!
//! The light client reports the block each registered script has been indexed up to. This module
//! turns that and the chain tip into an [`AccountStatus`], and throttles progress logging so a
//! long catch-up does not flood the log.

use crate::config::SYNCED_TOLERANCE;
use serde::Serialize;
use tracing::info;

/// Sync state of the tracked account relative to the chain tip.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AccountStatus {
	pub tip_number: u64,
	pub synced_to_block: u64,
	/// `synced / tip` clamped to `[0, 1]`; 0 while the tip is unknown.
	pub sync_progress: f64,
	pub is_synced: bool,
	pub is_registered: bool,
}

impl AccountStatus {
	pub fn new(tip_number: u64, synced_to_block: u64, is_registered: bool) -> Self {
		Self {
			tip_number,
			synced_to_block,
			sync_progress: sync_progress(tip_number, synced_to_block),
			is_synced: is_synced(tip_number, synced_to_block),
			is_registered,
		}
	}

	/// Get a human-readable summary of the status
	pub fn summary(&self) -> String {
		format!(
			"synced to {} of {} ({:.2}%){}",
			self.synced_to_block,
			self.tip_number,
			self.sync_progress * 100.0,
			if self.is_synced { ", in sync" } else { "" }
		)
	}
}

pub fn sync_progress(tip: u64, synced: u64) -> f64 {
	if tip == 0 {
		return 0.0;
	}
	(synced as f64 / tip as f64).clamp(0.0, 1.0)
}

pub fn is_synced(tip: u64, synced: u64) -> bool {
	tip > 0 && tip.abs_diff(synced) <= SYNCED_TOLERANCE
}

/// Logs sync progress every `interval` blocks of advancement, or when sync completes.
#[derive(Debug, Clone)]
pub struct SyncProgressLog {
	last_logged_block: u64,
	interval: u64,
	reported_synced: bool,
}

impl SyncProgressLog {
	pub fn new(interval: u64) -> Self {
		Self {
			last_logged_block: 0,
			interval,
			reported_synced: false,
		}
	}

	/// Record a status, returning whether it was logged.
	pub fn observe(&mut self, status: &AccountStatus) -> bool {
		let advanced = status
			.synced_to_block
			.saturating_sub(self.last_logged_block);
		let newly_synced = status.is_synced && !self.reported_synced;
		self.reported_synced = status.is_synced;

		if advanced >= self.interval || newly_synced {
			info!("Account sync progress: {}", status.summary());
			self.last_logged_block = status.synced_to_block;
			return true;
		}
		false
	}
}

impl Default for SyncProgressLog {
	fn default() -> Self {
		Self::new(1000)
	}
}
