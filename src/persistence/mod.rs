//! Per-network sync preference persistence.
//!
//! The engine keeps one [`SyncPreference`] per network: the chosen sync mode, the resumable
//! progress marker, and whether the initial registration finished. Implementations supply
//! whole-record load, an atomic in-place update and the selected-network slot; the
//! individual getters and setters the engine uses are provided on top of those.

/// Durable JSON file implementation
mod file_store;

pub use file_store::FileSyncPreferenceStore;

use crate::config::{Network, SyncMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync settings and progress for one network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPreference {
	pub network: Network,
	pub mode: SyncMode,
	#[serde(default)]
	pub custom_block_height: Option<u64>,
	#[serde(default)]
	pub last_synced_block: u64,
	#[serde(default)]
	pub completed_initial_sync: bool,
	#[serde(default)]
	pub updated_at: Option<DateTime<Utc>>,
}

impl SyncPreference {
	pub fn new(network: Network) -> Self {
		Self {
			network,
			mode: SyncMode::default(),
			custom_block_height: None,
			last_synced_block: 0,
			completed_initial_sync: false,
			updated_at: None,
		}
	}
}

/// Error types for preference storage
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

/// In-place edit applied by [`PersistencePort::update`].
pub type PreferenceUpdate = Box<dyn FnOnce(&mut SyncPreference) + Send>;

/// Storage for sync preferences, namespaced per network.
#[async_trait::async_trait]
pub trait PersistencePort: Send + Sync {
	async fn load(&self, network: Network) -> Result<Option<SyncPreference>, PersistenceError>;

	/// Load (or default), apply `edit` and store the preference for `network` as one step, so
	/// concurrent writers to different fields do not overwrite each other.
	async fn update(
		&self,
		network: Network,
		edit: PreferenceUpdate,
	) -> Result<SyncPreference, PersistenceError>;

	/// Delete the preference for `network`.
	async fn reset(&self, network: Network) -> Result<(), PersistenceError>;

	async fn selected_network(&self) -> Result<Option<Network>, PersistenceError>;

	/// Must be durable by the time it returns; the process may be terminated right after.
	async fn set_selected_network(&self, network: Network) -> Result<(), PersistenceError>;

	async fn sync_mode(&self, network: Network) -> Result<Option<SyncMode>, PersistenceError> {
		Ok(self.load(network).await?.map(|p| p.mode))
	}

	async fn set_sync_mode(&self, network: Network, mode: SyncMode) -> Result<(), PersistenceError> {
		let edit: PreferenceUpdate = Box::new(move |p: &mut SyncPreference| p.mode = mode);
		self.update(network, edit).await.map(drop)
	}

	async fn custom_block_height(&self, network: Network) -> Result<Option<u64>, PersistenceError> {
		Ok(self.load(network).await?.and_then(|p| p.custom_block_height))
	}

	async fn set_custom_block_height(
		&self,
		network: Network,
		height: Option<u64>,
	) -> Result<(), PersistenceError> {
		let edit: PreferenceUpdate =
			Box::new(move |p: &mut SyncPreference| p.custom_block_height = height);
		self.update(network, edit).await.map(drop)
	}

	async fn last_synced_block(&self, network: Network) -> Result<u64, PersistenceError> {
		Ok(self.load(network).await?.map_or(0, |p| p.last_synced_block))
	}

	async fn set_last_synced_block(&self, network: Network, block: u64) -> Result<(), PersistenceError> {
		let edit: PreferenceUpdate =
			Box::new(move |p: &mut SyncPreference| p.last_synced_block = block);
		self.update(network, edit).await.map(drop)
	}

	async fn has_completed_initial_sync(&self, network: Network) -> Result<bool, PersistenceError> {
		Ok(self.load(network).await?.is_some_and(|p| p.completed_initial_sync))
	}

	async fn set_initial_sync_completed(
		&self,
		network: Network,
		completed: bool,
	) -> Result<(), PersistenceError> {
		let edit: PreferenceUpdate =
			Box::new(move |p: &mut SyncPreference| p.completed_initial_sync = completed);
		self.update(network, edit).await.map(drop)
	}
}
