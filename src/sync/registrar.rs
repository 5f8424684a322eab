use crate::config::Network;
use crate::error::WalletSyncError;
use crate::light_client::{LightClientError, LightClientPort, Script, SetScriptsCommand, TrackedScript};
use crate::persistence::PersistencePort;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Registers the wallet's lock script with the light client.
///
/// Shared by initial registration, resync, the balance self-heal and the post-send rescan, all
/// of which replace the client's tracked set with the single wallet script at some height.
pub struct ScriptRegistrar {
	client: Arc<dyn LightClientPort>,
	store: Arc<dyn PersistencePort>,
	network: Network,
	script: Script,
	registered: AtomicBool,
}

impl ScriptRegistrar {
	pub fn new(
		client: Arc<dyn LightClientPort>,
		store: Arc<dyn PersistencePort>,
		network: Network,
		script: Script,
	) -> Self {
		Self {
			client,
			store,
			network,
			script,
			registered: AtomicBool::new(false),
		}
	}

	pub fn network(&self) -> Network {
		self.network
	}

	pub fn script(&self) -> &Script {
		&self.script
	}

	/// Whether a registration succeeded during this process lifetime.
	pub fn is_registered(&self) -> bool {
		self.registered.load(Ordering::SeqCst)
	}

	/// Replace the tracked set with the wallet script starting at `block_number`.
	pub async fn register_at(&self, block_number: u64) -> Result<(), LightClientError> {
		self.client
			.set_scripts(
				vec![TrackedScript::lock(self.script.normalized(), block_number)],
				SetScriptsCommand::All,
			)
			.await?;
		self.registered.store(true, Ordering::SeqCst);
		info!(
			"Registered lock script {} from block {}",
			self.script.args, block_number
		);
		Ok(())
	}

	/// Register from `block_number` and persist it as the resume point.
	pub async fn rescan_from(&self, block_number: u64) -> Result<(), WalletSyncError> {
		self.register_at(block_number)
			.await
			.map_err(|e| WalletSyncError::Registration(e.to_string()))?;
		self.store
			.set_last_synced_block(self.network, block_number)
			.await?;
		debug!("Rescan resume point set to {}", block_number);
		Ok(())
	}

	/// Block the light client reports for the wallet script, if it is tracked.
	pub async fn tracked_block(&self) -> Result<Option<u64>, LightClientError> {
		let scripts = self.client.get_scripts().await?;
		Ok(scripts
			.iter()
			.find(|tracked| tracked.script.matches(&self.script))
			.map(|tracked| tracked.block_number))
	}
}
