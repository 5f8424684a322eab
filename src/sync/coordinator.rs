//! Account registration and sync status.
//!
//! Registration decides the block the light client starts scanning the wallet script from. Any
//! progress already made (persisted, or reported by the client for the tracked script) is
//! resumed instead of recomputed, unless the caller explicitly asks for a resync.

use super::progress::{AccountStatus, SyncProgressLog};
use super::registrar::ScriptRegistrar;
use crate::config::{RECENT_SYNC_WINDOW, SyncMode};
use crate::error::WalletSyncError;
use crate::light_client::LightClientPort;
use crate::node::NodeLifecycleManager;
use crate::persistence::{PersistencePort, SyncPreference};

use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

/// Where a registration's start block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSource {
	/// Previously made progress was resumed.
	Resumed,
	/// Computed from the sync mode.
	Mode,
	/// The resolved block was past the tip and was pulled back to the recent window.
	ClampedToRecent,
	/// Nothing better was known; the network checkpoint was used.
	Checkpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
	pub start_block: u64,
	pub tip: u64,
	pub source: StartSource,
}

/// Start block implied by `mode` alone.
///
/// `NewWallet` falls back to the network checkpoint while the tip is unknown (zero).
pub fn resolve_start_block(
	mode: SyncMode,
	tip: u64,
	checkpoint: u64,
	custom_height: Option<u64>,
) -> u64 {
	match mode {
		SyncMode::NewWallet => {
			if tip > 0 {
				tip
			} else {
				checkpoint
			}
		}
		SyncMode::Recent => tip.saturating_sub(RECENT_SYNC_WINDOW),
		SyncMode::FullHistory => 0,
		SyncMode::Custom => custom_height.unwrap_or(0),
	}
}

pub struct SyncCoordinator {
	client: Arc<dyn LightClientPort>,
	store: Arc<dyn PersistencePort>,
	node: Arc<NodeLifecycleManager>,
	registrar: Arc<ScriptRegistrar>,
	operation: Mutex<()>,
	status: watch::Sender<AccountStatus>,
	progress_log: StdMutex<SyncProgressLog>,
}

impl SyncCoordinator {
	pub fn new(
		client: Arc<dyn LightClientPort>,
		store: Arc<dyn PersistencePort>,
		node: Arc<NodeLifecycleManager>,
		registrar: Arc<ScriptRegistrar>,
	) -> Self {
		let (status, _) = watch::channel(AccountStatus::default());
		Self {
			client,
			store,
			node,
			registrar,
			operation: Mutex::new(()),
			status,
			progress_log: StdMutex::new(SyncProgressLog::default()),
		}
	}

	/// Register the wallet script for tracking.
	///
	/// With `force_resync` unset, any known progress wins over `mode`. With `save_preference`
	/// set, the mode and custom height are stored and the initial sync is marked complete.
	pub async fn register(
		&self,
		mode: SyncMode,
		custom_height: Option<u64>,
		save_preference: bool,
		force_resync: bool,
	) -> Result<Registration, WalletSyncError> {
		let _guard = self.begin_operation()?;
		self.register_locked(mode, custom_height, save_preference, force_resync)
			.await
	}

	/// Discard sync progress and register again from the height `mode` implies.
	pub async fn resync(
		&self,
		mode: SyncMode,
		custom_height: Option<u64>,
	) -> Result<Registration, WalletSyncError> {
		let _guard = self.begin_operation()?;

		info!("Resyncing {} account with mode {:?}", self.registrar.network(), mode);
		self.store
			.set_last_synced_block(self.registrar.network(), 0)
			.await?;
		self.register_locked(mode, custom_height, true, true).await
	}

	/// Hold the operation slot. A network switch takes it for its whole duration.
	pub fn try_exclusive(&self) -> Result<MutexGuard<'_, ()>, WalletSyncError> {
		self.operation
			.try_lock()
			.map_err(|_| WalletSyncError::OperationInProgress)
	}

	fn begin_operation(&self) -> Result<MutexGuard<'_, ()>, WalletSyncError> {
		let guard = self.try_exclusive()?;
		// A switch leaves the flag set until the process restarts on the new network.
		if self.node.is_switching() {
			return Err(WalletSyncError::AlreadySwitching);
		}
		Ok(guard)
	}

	/// Register using whatever preference is stored, defaulting to `Recent`. Nothing is saved.
	pub async fn register_from_saved_preference(&self) -> Result<Registration, WalletSyncError> {
		let preference = self.store.load(self.registrar.network()).await?;
		let (mode, custom_height) = match preference {
			Some(p) => (p.mode, p.custom_block_height),
			None => (SyncMode::default(), None),
		};
		debug!("Registering from saved preference {:?}", mode);
		self.register(mode, custom_height, false, false).await
	}

	async fn register_locked(
		&self,
		mode: SyncMode,
		custom_height: Option<u64>,
		save_preference: bool,
		force_resync: bool,
	) -> Result<Registration, WalletSyncError> {
		if !self.node.has_started() || !self.node.await_ready().await {
			return Err(WalletSyncError::NodeNotReady);
		}

		let network = self.registrar.network();
		let checkpoint = network.checkpoint();
		let tip = self
			.client
			.get_tip_header()
			.await
			.map_err(|e| WalletSyncError::Registration(format!("tip unavailable: {}", e)))?
			.number;

		let mut resumed = 0;
		if !force_resync {
			let saved = self.store.last_synced_block(network).await?;
			let tracked = self
				.registrar
				.tracked_block()
				.await
				.map_err(|e| WalletSyncError::Registration(format!("script lookup failed: {}", e)))?
				.unwrap_or(0);
			resumed = saved.max(tracked);
		}

		let (mut start_block, mut source) = if resumed > 0 {
			(resumed, StartSource::Resumed)
		} else {
			(
				resolve_start_block(mode, tip, checkpoint, custom_height),
				StartSource::Mode,
			)
		};

		if tip > 0 && start_block > tip {
			warn!(
				"Start block {} is past tip {}, falling back to the recent window",
				start_block, tip
			);
			start_block = tip.saturating_sub(RECENT_SYNC_WINDOW);
			source = StartSource::ClampedToRecent;
		}

		// Only a full-history scan may start at genesis. A checkpoint ahead of a known tip
		// would register past it, so the floor only applies once the chain has reached it.
		if start_block == 0
			&& mode != SyncMode::FullHistory
			&& checkpoint > 0
			&& (tip == 0 || checkpoint <= tip)
		{
			start_block = checkpoint;
			source = StartSource::Checkpoint;
		}

		self.registrar
			.register_at(start_block)
			.await
			.map_err(|e| WalletSyncError::Registration(e.to_string()))?;

		if save_preference {
			self.store
				.update(
					network,
					Box::new(move |p: &mut SyncPreference| {
						p.mode = mode;
						p.custom_block_height = custom_height;
						p.completed_initial_sync = true;
					}),
				)
				.await?;
		}

		info!(
			"Account registered on {} from block {} ({:?}, tip {})",
			network, start_block, source, tip
		);
		Ok(Registration {
			start_block,
			tip,
			source,
		})
	}

	/// Query the tip and the tracked script's progress, persist any advance, and publish.
	pub async fn get_account_status(&self) -> Result<AccountStatus, WalletSyncError> {
		let network = self.registrar.network();
		let tip = self.client.get_tip_header().await?.number;
		let tracked = self.registrar.tracked_block().await?;
		let synced = tracked.unwrap_or(0);

		let saved = self.store.last_synced_block(network).await?;
		if synced > saved {
			if let Err(e) = self.store.set_last_synced_block(network, synced).await {
				warn!("Failed to persist sync progress {}: {}", synced, e);
			}
		}

		let status = AccountStatus::new(tip, synced, tracked.is_some());
		if let Ok(mut log) = self.progress_log.lock() {
			log.observe(&status);
		}
		self.status.send_replace(status.clone());
		Ok(status)
	}

	pub fn subscribe_status(&self) -> watch::Receiver<AccountStatus> {
		self.status.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{EngineTimings, Network};
	use crate::light_client::TrackedScript;
	use crate::testing::{MemoryPreferenceStore, MockLightClient, wallet_script};
	use std::collections::VecDeque;
	use std::path::PathBuf;

	struct Fixture {
		client: Arc<MockLightClient>,
		store: Arc<MemoryPreferenceStore>,
		coordinator: SyncCoordinator,
	}

	async fn fixture(tip: u64) -> Fixture {
		let client = Arc::new(MockLightClient::with_tip(tip));
		let store = Arc::new(MemoryPreferenceStore::default());
		let node = Arc::new(NodeLifecycleManager::new(
			client.clone(),
			store.clone(),
			EngineTimings::default(),
		));
		node.initialize(&PathBuf::from("light.toml")).await.unwrap();
		let registrar = Arc::new(ScriptRegistrar::new(
			client.clone(),
			store.clone(),
			Network::Testnet,
			wallet_script(),
		));
		let coordinator = SyncCoordinator::new(client.clone(), store.clone(), node, registrar);
		Fixture {
			client,
			store,
			coordinator,
		}
	}

	#[test]
	fn start_block_per_mode() {
		let checkpoint = Network::Testnet.checkpoint();
		assert_eq!(
			resolve_start_block(SyncMode::Recent, 16_000_000, checkpoint, None),
			15_800_000
		);
		assert_eq!(
			resolve_start_block(SyncMode::NewWallet, 16_000_000, checkpoint, None),
			16_000_000
		);
		assert_eq!(
			resolve_start_block(SyncMode::NewWallet, 0, checkpoint, None),
			checkpoint
		);
		assert_eq!(
			resolve_start_block(SyncMode::FullHistory, 16_000_000, checkpoint, None),
			0
		);
		assert_eq!(
			resolve_start_block(SyncMode::Custom, 16_000_000, checkpoint, Some(123)),
			123
		);
		assert_eq!(resolve_start_block(SyncMode::Custom, 100, checkpoint, None), 0);
		assert_eq!(resolve_start_block(SyncMode::Recent, 1_000, checkpoint, None), 0);
	}

	#[test]
	fn start_block_never_exceeds_tip() {
		let modes = [SyncMode::NewWallet, SyncMode::Recent, SyncMode::FullHistory];
		for tip in [1u64, 199_999, 200_000, 200_001, 16_000_000] {
			for mode in modes {
				let start = resolve_start_block(mode, tip, 12_000_000, None);
				assert!(start <= tip, "{:?} at tip {} gave {}", mode, tip, start);
			}
			let custom = resolve_start_block(SyncMode::Custom, tip, 12_000_000, Some(tip / 2));
			assert!(custom <= tip);
		}
	}

	#[tokio::test]
	async fn fresh_recent_registration_starts_200k_behind_tip() {
		let f = fixture(16_000_000).await;

		let registration = f
			.coordinator
			.register(SyncMode::Recent, None, true, false)
			.await
			.unwrap();

		assert_eq!(registration.start_block, 15_800_000);
		assert_eq!(registration.source, StartSource::Mode);
		assert_eq!(f.client.registered_block(), Some(15_800_000));
		let preference = f.store.load(Network::Testnet).await.unwrap().unwrap();
		assert_eq!(preference.mode, SyncMode::Recent);
		assert!(preference.completed_initial_sync);
	}

	#[tokio::test]
	async fn saved_progress_wins_over_mode() {
		let f = fixture(600_000).await;
		f.store
			.set_last_synced_block(Network::Testnet, 500_000)
			.await
			.unwrap();
		f.client
			.state()
			.scripts
			.push(TrackedScript::lock(wallet_script(), 480_000));

		let registration = f
			.coordinator
			.register(SyncMode::Recent, None, false, false)
			.await
			.unwrap();

		assert_eq!(registration.start_block, 500_000);
		assert_eq!(registration.source, StartSource::Resumed);
		assert_eq!(f.client.registered_block(), Some(500_000));
	}

	#[tokio::test]
	async fn tracked_block_wins_when_ahead_of_saved() {
		let f = fixture(600_000).await;
		f.store
			.set_last_synced_block(Network::Testnet, 400_000)
			.await
			.unwrap();
		f.client
			.state()
			.scripts
			.push(TrackedScript::lock(wallet_script(), 450_000));

		let registration = f
			.coordinator
			.register(SyncMode::FullHistory, None, false, false)
			.await
			.unwrap();

		assert_eq!(registration.start_block, 450_000);
	}

	#[tokio::test]
	async fn progress_past_tip_is_clamped_to_recent_window() {
		let f = fixture(600_000).await;
		f.store
			.set_last_synced_block(Network::Testnet, 900_000)
			.await
			.unwrap();

		let registration = f
			.coordinator
			.register(SyncMode::NewWallet, None, false, false)
			.await
			.unwrap();

		assert_eq!(registration.start_block, 400_000);
		assert_eq!(registration.source, StartSource::ClampedToRecent);
	}

	#[tokio::test]
	async fn custom_height_past_tip_is_clamped() {
		let f = fixture(150_000).await;

		let registration = f
			.coordinator
			.register(SyncMode::Custom, Some(200_000), true, false)
			.await
			.unwrap();

		// The checkpoint is ahead of this chain, so the recent window floor stands.
		assert_eq!(registration.start_block, 0);
		assert_eq!(registration.source, StartSource::ClampedToRecent);
		assert_eq!(f.client.registered_block(), Some(0));
		assert_eq!(
			f.store.custom_block_height(Network::Testnet).await.unwrap(),
			Some(200_000)
		);
	}

	#[tokio::test]
	async fn recent_below_checkpoint_height_stays_within_tip() {
		let f = fixture(1_000).await;

		let registration = f
			.coordinator
			.register(SyncMode::Recent, None, false, false)
			.await
			.unwrap();

		assert_eq!(registration.start_block, 0);
		assert_eq!(registration.source, StartSource::Mode);
	}

	#[tokio::test]
	async fn recent_on_short_window_falls_back_to_checkpoint() {
		let checkpoint = Network::Testnet.checkpoint();
		let f = fixture(checkpoint + 150_000).await;

		let registration = f
			.coordinator
			.register(SyncMode::Recent, None, false, false)
			.await
			.unwrap();

		assert_eq!(registration.start_block, checkpoint);
		assert_eq!(registration.source, StartSource::Checkpoint);
	}

	#[tokio::test]
	async fn registered_height_never_exceeds_tip() {
		for (mode, custom) in [
			(SyncMode::Custom, Some(200_000)),
			(SyncMode::Custom, None),
			(SyncMode::Recent, None),
			(SyncMode::NewWallet, None),
		] {
			let f = fixture(150_000).await;
			let registration = f.coordinator.register(mode, custom, false, false).await.unwrap();
			assert!(
				registration.start_block <= 150_000,
				"{:?} registered {} above tip",
				mode,
				registration.start_block
			);
			assert_eq!(f.client.registered_block(), Some(registration.start_block));
		}
	}

	#[tokio::test]
	async fn full_history_registers_from_genesis() {
		let f = fixture(16_000_000).await;

		let registration = f
			.coordinator
			.register(SyncMode::FullHistory, None, false, false)
			.await
			.unwrap();

		assert_eq!(registration.start_block, 0);
		assert!(f.store.load(Network::Testnet).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn resync_discards_progress() {
		let f = fixture(16_000_000).await;
		f.store
			.set_last_synced_block(Network::Testnet, 15_990_000)
			.await
			.unwrap();
		f.client
			.state()
			.scripts
			.push(TrackedScript::lock(wallet_script(), 15_990_000));

		let registration = f
			.coordinator
			.resync(SyncMode::Custom, Some(1_000_000))
			.await
			.unwrap();

		assert_eq!(registration.start_block, 1_000_000);
		assert_eq!(f.client.registered_block(), Some(1_000_000));
		assert_eq!(f.store.last_synced_block(Network::Testnet).await.unwrap(), 0);
		assert_eq!(
			f.store.sync_mode(Network::Testnet).await.unwrap(),
			Some(SyncMode::Custom)
		);
	}

	#[tokio::test]
	async fn saved_preference_is_used_without_saving() {
		let f = fixture(16_000_000).await;
		f.store
			.set_sync_mode(Network::Testnet, SyncMode::Custom)
			.await
			.unwrap();
		f.store
			.set_custom_block_height(Network::Testnet, Some(14_000_000))
			.await
			.unwrap();

		let registration = f.coordinator.register_from_saved_preference().await.unwrap();

		assert_eq!(registration.start_block, 14_000_000);
		assert!(!f.store.has_completed_initial_sync(Network::Testnet).await.unwrap());
	}

	#[tokio::test]
	async fn registration_requires_ready_node() {
		let f = fixture(1_000).await;
		let client = f.client.clone();
		client.state().init_results = VecDeque::from([false]);
		let node = Arc::new(NodeLifecycleManager::new(
			client.clone(),
			f.store.clone(),
			EngineTimings {
				init_attempts: 1,
				..EngineTimings::default()
			},
		));
		assert!(node.initialize(&PathBuf::from("light.toml")).await.is_err());
		let registrar = Arc::new(ScriptRegistrar::new(
			client.clone(),
			f.store.clone(),
			Network::Testnet,
			wallet_script(),
		));
		let coordinator = SyncCoordinator::new(client.clone(), f.store.clone(), node, registrar);

		assert!(matches!(
			coordinator
				.register(SyncMode::Recent, None, true, false)
				.await,
			Err(WalletSyncError::NodeNotReady)
		));
		assert_eq!(client.calls_to("set_scripts"), 0);
	}

	#[tokio::test]
	async fn registration_before_start_fails_fast() {
		let client = Arc::new(MockLightClient::with_tip(1_000));
		let store = Arc::new(MemoryPreferenceStore::default());
		let node = Arc::new(NodeLifecycleManager::new(
			client.clone(),
			store.clone(),
			EngineTimings::default(),
		));
		let registrar = Arc::new(ScriptRegistrar::new(
			client.clone(),
			store.clone(),
			Network::Testnet,
			wallet_script(),
		));
		let coordinator = SyncCoordinator::new(client, store, node, registrar);

		assert!(matches!(
			coordinator.register_from_saved_preference().await,
			Err(WalletSyncError::NodeNotReady)
		));
	}

	#[tokio::test]
	async fn concurrent_operation_is_rejected() {
		let f = fixture(1_000).await;
		let _held = f.coordinator.operation.try_lock().unwrap();

		assert!(matches!(
			f.coordinator.resync(SyncMode::Recent, None).await,
			Err(WalletSyncError::OperationInProgress)
		));
		assert!(matches!(
			f.coordinator
				.register(SyncMode::Recent, None, false, false)
				.await,
			Err(WalletSyncError::OperationInProgress)
		));
	}

	#[tokio::test]
	async fn set_scripts_failure_is_surfaced() {
		let f = fixture(16_000_000).await;
		f.client.state().fail_set_scripts = true;

		assert!(matches!(
			f.coordinator
				.register(SyncMode::Recent, None, true, false)
				.await,
			Err(WalletSyncError::Registration(_))
		));
		assert!(f.store.load(Network::Testnet).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn account_status_persists_progress_and_publishes() {
		let f = fixture(1_000).await;
		f.client
			.state()
			.scripts
			.push(TrackedScript::lock(wallet_script(), 995));
		let mut updates = f.coordinator.subscribe_status();

		let status = f.coordinator.get_account_status().await.unwrap();

		assert!(status.is_synced);
		assert!(status.is_registered);
		assert!((status.sync_progress - 0.995).abs() < 1e-9);
		assert_eq!(f.store.last_synced_block(Network::Testnet).await.unwrap(), 995);
		assert!(updates.has_changed().unwrap());
		assert_eq!(*updates.borrow_and_update(), status);
	}

	#[tokio::test]
	async fn account_status_never_moves_progress_backwards() {
		let f = fixture(1_000).await;
		f.store
			.set_last_synced_block(Network::Testnet, 900)
			.await
			.unwrap();
		f.client
			.state()
			.scripts
			.push(TrackedScript::lock(wallet_script(), 500));

		let status = f.coordinator.get_account_status().await.unwrap();

		assert!(!status.is_synced);
		assert_eq!(f.store.last_synced_block(Network::Testnet).await.unwrap(), 900);
	}
}
