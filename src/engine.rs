//! Wallet sync engine and integration point for all components.
//!
//! `WalletSyncEngine` wires the node lifecycle, script registration, balance reconciliation and
//! transaction submission together, and enforces their ordering: nothing is registered before the
//! light client is ready, and nothing is queried or sent before the account is registered.

use crate::balance::{BalanceReconciler, BalanceSnapshot, Page, TransactionRecord};
use crate::config::{AccountConfig, EngineConfig, EngineTimings, Network, SyncMode};
use crate::error::WalletSyncError;
use crate::light_client::{CellObject, LightClientPort, Transaction};
use crate::node::{NetworkSwitch, NodeLifecycleManager, Readiness};
use crate::persistence::PersistencePort;
use crate::sync::{AccountStatus, Registration, ScriptRegistrar, SyncCoordinator};
use crate::transaction::{
	TrackOutcome, TransactionProgress, TransactionStatusTracker, TransactionSubmitter, validate,
};

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Light client connectivity, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
	pub network: Network,
	pub tip_number: u64,
	pub peer_count: usize,
	/// At least one peer is connected.
	pub healthy: bool,
}

pub struct WalletSyncEngine {
	network: Network,
	light_client_config: PathBuf,
	client: Arc<dyn LightClientPort>,
	node: Arc<NodeLifecycleManager>,
	registrar: Arc<ScriptRegistrar>,
	coordinator: SyncCoordinator,
	reconciler: Arc<BalanceReconciler>,
	submitter: TransactionSubmitter,
	tracker: Arc<TransactionStatusTracker>,
	tracking: Mutex<Option<JoinHandle<TrackOutcome>>>,
}

impl WalletSyncEngine {
	pub fn new(
		client: Arc<dyn LightClientPort>,
		store: Arc<dyn PersistencePort>,
		network: Network,
		account: AccountConfig,
		light_client_config: PathBuf,
		timings: EngineTimings,
	) -> Self {
		let node = Arc::new(NodeLifecycleManager::new(
			client.clone(),
			store.clone(),
			timings.clone(),
		));
		let registrar = Arc::new(ScriptRegistrar::new(
			client.clone(),
			store.clone(),
			network,
			account.lock_script.clone(),
		));
		let coordinator =
			SyncCoordinator::new(client.clone(), store, node.clone(), registrar.clone());
		let reconciler = Arc::new(BalanceReconciler::new(
			client.clone(),
			registrar.clone(),
			account,
		));
		let submitter = TransactionSubmitter::new(client.clone(), registrar.clone(), timings.clone());
		let tracker = Arc::new(TransactionStatusTracker::new(
			client.clone(),
			reconciler.clone(),
			timings,
		));

		Self {
			network,
			light_client_config,
			client,
			node,
			registrar,
			coordinator,
			reconciler,
			submitter,
			tracker,
			tracking: Mutex::new(None),
		}
	}

	pub fn from_config(
		config: &EngineConfig,
		client: Arc<dyn LightClientPort>,
		store: Arc<dyn PersistencePort>,
	) -> Self {
		Self::new(
			client,
			store,
			config.network,
			config.account.clone(),
			config.light_client_config.clone(),
			config.timings.clone(),
		)
	}

	pub fn network(&self) -> Network {
		self.network
	}

	/// Bring the light client online. See [`NodeLifecycleManager::initialize`].
	pub async fn start(&self) -> Result<(), WalletSyncError> {
		info!("Starting wallet sync engine on {}", self.network);
		self.node.initialize(&self.light_client_config).await
	}

	pub async fn register(
		&self,
		mode: SyncMode,
		custom_height: Option<u64>,
		save_preference: bool,
		force_resync: bool,
	) -> Result<Registration, WalletSyncError> {
		self.coordinator
			.register(mode, custom_height, save_preference, force_resync)
			.await
	}

	pub async fn register_from_saved_preference(&self) -> Result<Registration, WalletSyncError> {
		self.coordinator.register_from_saved_preference().await
	}

	pub async fn resync(
		&self,
		mode: SyncMode,
		custom_height: Option<u64>,
	) -> Result<Registration, WalletSyncError> {
		self.coordinator.resync(mode, custom_height).await
	}

	pub async fn account_status(&self) -> Result<AccountStatus, WalletSyncError> {
		self.ensure_ready()?;
		self.coordinator.get_account_status().await
	}

	pub async fn refresh_balance(&self) -> Result<BalanceSnapshot, WalletSyncError> {
		self.ensure_registered()?;
		self.reconciler.refresh_balance().await
	}

	pub async fn cells(
		&self,
		limit: Option<u32>,
		cursor: Option<String>,
	) -> Result<Page<CellObject>, WalletSyncError> {
		self.ensure_registered()?;
		self.reconciler.get_cells(limit, cursor).await
	}

	pub async fn transactions(
		&self,
		limit: Option<u32>,
		cursor: Option<String>,
	) -> Result<Page<TransactionRecord>, WalletSyncError> {
		self.ensure_registered()?;
		self.reconciler.get_transactions(limit, cursor).await
	}

	/// Broadcast a signed transaction and track it in the background.
	///
	/// Progress is published through [`subscribe_transaction`](Self::subscribe_transaction);
	/// [`await_tracking`](Self::await_tracking) waits for the outcome.
	pub async fn send_transaction(&self, tx: &Transaction) -> Result<String, WalletSyncError> {
		self.ensure_registered()?;
		if self.node.is_switching() {
			return Err(WalletSyncError::AlreadySwitching);
		}
		validate(tx)?;

		let baseline = self.reconciler.current_balance();
		let token = self.tracker.begin_send();

		let tx_hash = match self.submitter.submit(tx).await {
			Ok(tx_hash) => tx_hash,
			Err(e) => {
				self.tracker.mark_failed(&token, e.to_string());
				return Err(e);
			}
		};
		self.tracker.mark_pending(&token, &tx_hash);

		let tracker = self.tracker.clone();
		let hash = tx_hash.clone();
		let handle = tokio::spawn(async move { tracker.track(&hash, baseline, token).await });
		if let Ok(mut tracking) = self.tracking.lock() {
			if let Some(previous) = tracking.replace(handle) {
				previous.abort();
			}
		}
		Ok(tx_hash)
	}

	/// Wait for the current tracking task, if any.
	pub async fn await_tracking(&self) -> Option<TrackOutcome> {
		let handle = self.tracking.lock().ok()?.take()?;
		match handle.await {
			Ok(outcome) => Some(outcome),
			Err(e) => {
				warn!("Transaction tracking task ended abnormally: {}", e);
				None
			}
		}
	}

	/// Stop tracking and return the transaction state to idle.
	pub fn clear_transaction(&self) {
		self.tracker.clear();
		self.take_tracking();
	}

	/// Cancel any tracking and persist `target` for the next launch.
	///
	/// Fails with `OperationInProgress` while a registration or resync runs.
	pub async fn switch_network(&self, target: Network) -> Result<NetworkSwitch, WalletSyncError> {
		if self.node.is_switching() {
			return Err(WalletSyncError::AlreadySwitching);
		}
		let _operation = self.coordinator.try_exclusive()?;
		self.tracker.cancel_for_network_change();
		self.take_tracking();
		self.node.switch_network(target).await
	}

	fn take_tracking(&self) {
		if let Ok(mut tracking) = self.tracking.lock() {
			tracking.take();
		}
	}

	pub async fn node_status(&self) -> Result<NodeStatus, WalletSyncError> {
		self.ensure_ready()?;
		let tip = self.client.get_tip_header().await?;
		let peers = self.client.get_peers().await?;
		Ok(NodeStatus {
			network: self.network,
			tip_number: tip.number,
			peer_count: peers.len(),
			healthy: !peers.is_empty(),
		})
	}

	/// Pass-through for light client RPCs the engine does not model.
	pub async fn call_rpc(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, WalletSyncError> {
		self.ensure_ready()?;
		Ok(self.client.call_rpc(method, params).await?)
	}

	pub fn readiness(&self) -> Readiness {
		self.node.readiness()
	}

	pub fn subscribe_readiness(&self) -> watch::Receiver<Readiness> {
		self.node.subscribe_readiness()
	}

	pub fn subscribe_account_status(&self) -> watch::Receiver<AccountStatus> {
		self.coordinator.subscribe_status()
	}

	pub fn subscribe_balance(&self) -> watch::Receiver<Option<BalanceSnapshot>> {
		self.reconciler.subscribe_balance()
	}

	pub fn subscribe_transaction(&self) -> watch::Receiver<TransactionProgress> {
		self.tracker.subscribe()
	}

	fn ensure_ready(&self) -> Result<(), WalletSyncError> {
		match self.node.readiness() {
			Readiness::Ready => Ok(()),
			_ => Err(WalletSyncError::NodeNotReady),
		}
	}

	fn ensure_registered(&self) -> Result<(), WalletSyncError> {
		self.ensure_ready()?;
		if !self.registrar.is_registered() {
			return Err(WalletSyncError::NotRegistered);
		}
		Ok(())
	}
}
