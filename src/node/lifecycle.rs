//! Light client lifecycle: bounded start-up retries, the readiness signal, and network switching.

use crate::config::{EngineTimings, Network};
use crate::error::WalletSyncError;
use crate::light_client::LightClientPort;
use crate::persistence::PersistencePort;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Whether the light client came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
	/// No initialization has finished yet.
	Unknown,
	Ready,
	/// All start-up attempts failed. Only a process restart tries again.
	Failed,
}

/// Outcome of a successful network switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSwitch {
	/// The target network is persisted; the host must relaunch the process so the light client
	/// starts clean on the new network.
	RestartRequired { network: Network },
}

/// Owns the light client's start-up and the single readiness signal.
pub struct NodeLifecycleManager {
	client: Arc<dyn LightClientPort>,
	store: Arc<dyn PersistencePort>,
	timings: EngineTimings,
	readiness: watch::Sender<Readiness>,
	started: AtomicBool,
	switching: AtomicBool,
}

impl NodeLifecycleManager {
	pub fn new(
		client: Arc<dyn LightClientPort>,
		store: Arc<dyn PersistencePort>,
		timings: EngineTimings,
	) -> Self {
		let (readiness, _) = watch::channel(Readiness::Unknown);
		Self {
			client,
			store,
			timings,
			readiness,
			started: AtomicBool::new(false),
			switching: AtomicBool::new(false),
		}
	}

	/// Bring the light client online.
	///
	/// Runs init+start up to `init_attempts` times with exponential backoff between attempts.
	/// The first attempt where both succeed marks the node ready. Exhausting every attempt marks
	/// it failed for the rest of the process lifetime.
	pub async fn initialize(&self, config_path: &Path) -> Result<(), WalletSyncError> {
		self.readiness.send_replace(Readiness::Unknown);
		self.started.store(true, Ordering::SeqCst);

		let mut backoff = ExponentialBackoff {
			current_interval: self.timings.init_initial_backoff,
			initial_interval: self.timings.init_initial_backoff,
			randomization_factor: 0.0,
			multiplier: 2.0,
			max_elapsed_time: None,
			..ExponentialBackoff::default()
		};

		let attempts = self.timings.init_attempts.max(1);
		let mut last_failure = String::new();

		for attempt in 1..=attempts {
			match self.try_start(config_path).await {
				Ok(()) => {
					info!("Light client ready after {} attempt(s)", attempt);
					self.readiness.send_replace(Readiness::Ready);
					return Ok(());
				}
				Err(reason) => {
					warn!(
						"Light client start attempt {}/{} failed: {}",
						attempt, attempts, reason
					);
					last_failure = reason;
				}
			}

			if attempt < attempts {
				let delay = backoff
					.next_backoff()
					.unwrap_or(self.timings.init_initial_backoff);
				tokio::time::sleep(delay).await;
			}
		}

		error!(
			"Light client failed to start after {} attempts, giving up",
			attempts
		);
		self.readiness.send_replace(Readiness::Failed);
		Err(WalletSyncError::NodeInit(last_failure))
	}

	async fn try_start(&self, config_path: &Path) -> Result<(), String> {
		match self.client.init(config_path).await {
			Ok(true) => {}
			Ok(false) => return Err("init returned false".to_string()),
			Err(e) => return Err(format!("init failed: {}", e)),
		}
		match self.client.start().await {
			Ok(true) => Ok(()),
			Ok(false) => Err("start returned false".to_string()),
			Err(e) => Err(format!("start failed: {}", e)),
		}
	}

	/// Wait until readiness is known and report whether the node is ready.
	pub async fn await_ready(&self) -> bool {
		let mut receiver = self.readiness.subscribe();
		match receiver.wait_for(|r| *r != Readiness::Unknown).await {
			Ok(readiness) => *readiness == Readiness::Ready,
			Err(_) => false,
		}
	}

	/// Whether [`initialize`](Self::initialize) has been called. Until then `await_ready` would
	/// wait indefinitely.
	pub fn has_started(&self) -> bool {
		self.started.load(Ordering::SeqCst)
	}

	pub fn readiness(&self) -> Readiness {
		*self.readiness.borrow()
	}

	pub fn subscribe_readiness(&self) -> watch::Receiver<Readiness> {
		self.readiness.subscribe()
	}

	pub fn is_switching(&self) -> bool {
		self.switching.load(Ordering::SeqCst)
	}

	/// Persist `target` as the selected network ahead of a process restart.
	///
	/// The light client cannot be re-initialized in-process, so this is the only way to change
	/// networks. The write is durable before this returns. On failure the in-flight flag is
	/// cleared so the caller can retry.
	pub async fn switch_network(&self, target: Network) -> Result<NetworkSwitch, WalletSyncError> {
		if self
			.switching
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			return Err(WalletSyncError::AlreadySwitching);
		}

		if let Err(e) = self.store.set_selected_network(target).await {
			error!("Failed to persist network switch to {}: {}", target, e);
			self.switching.store(false, Ordering::SeqCst);
			return Err(e.into());
		}

		info!("Network switch to {} persisted, restart required", target);
		Ok(NetworkSwitch::RestartRequired { network: target })
	}
}
