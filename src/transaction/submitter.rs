use super::broadcast::BroadcastCategory;
use crate::config::{EngineTimings, MIN_CELL_CAPACITY_SHANNONS, POST_SEND_RESCAN_MARGIN};
use crate::error::WalletSyncError;
use crate::light_client::{LightClientError, LightClientPort, Transaction};
use crate::sync::ScriptRegistrar;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reject transactions the node would refuse, before touching the network.
pub fn validate(tx: &Transaction) -> Result<(), WalletSyncError> {
	if tx.inputs.is_empty() {
		return Err(WalletSyncError::Validation(
			"transaction has no inputs".to_string(),
		));
	}
	if tx.outputs.is_empty() {
		return Err(WalletSyncError::Validation(
			"transaction has no outputs".to_string(),
		));
	}
	if let Some((index, output)) = tx
		.outputs
		.iter()
		.enumerate()
		.find(|(_, o)| o.capacity < MIN_CELL_CAPACITY_SHANNONS)
	{
		return Err(WalletSyncError::Validation(format!(
			"output {} carries {} shannons, below the {} minimum",
			index, output.capacity, MIN_CELL_CAPACITY_SHANNONS
		)));
	}
	Ok(())
}

fn broadcast_error(error: LightClientError) -> WalletSyncError {
	let category = match &error {
		LightClientError::HttpError(_) | LightClientError::EmptyResponse(_) => {
			BroadcastCategory::Transport
		}
		LightClientError::RpcError { message, .. } => BroadcastCategory::categorize(message),
		other => BroadcastCategory::categorize(&other.to_string()),
	};
	WalletSyncError::Broadcast {
		category,
		detail: error.to_string(),
	}
}

/// Broadcasts signed transactions and schedules the follow-up rescan.
pub struct TransactionSubmitter {
	client: Arc<dyn LightClientPort>,
	registrar: Arc<ScriptRegistrar>,
	timings: EngineTimings,
}

impl TransactionSubmitter {
	pub fn new(
		client: Arc<dyn LightClientPort>,
		registrar: Arc<ScriptRegistrar>,
		timings: EngineTimings,
	) -> Self {
		Self {
			client,
			registrar,
			timings,
		}
	}

	/// Validate and broadcast `tx`, returning its hash.
	pub async fn submit(&self, tx: &Transaction) -> Result<String, WalletSyncError> {
		let (tx_hash, _rescan) = self.submit_with_rescan(tx).await?;
		Ok(tx_hash)
	}

	/// As [`submit`](Self::submit), also handing back the detached rescan task.
	pub(crate) async fn submit_with_rescan(
		&self,
		tx: &Transaction,
	) -> Result<(String, JoinHandle<()>), WalletSyncError> {
		validate(tx)?;

		let tx_hash = self
			.client
			.send_transaction(tx)
			.await
			.map_err(broadcast_error)?;
		info!("Broadcast transaction {}", tx_hash);

		Ok((tx_hash, self.schedule_rescan()))
	}

	/// Re-register the wallet script just behind the tip once the transaction had time to land,
	/// so the block holding the change cell gets indexed. Failures are only logged.
	fn schedule_rescan(&self) -> JoinHandle<()> {
		let client = self.client.clone();
		let registrar = self.registrar.clone();
		let delay = self.timings.post_send_rescan_delay;

		tokio::spawn(async move {
			tokio::time::sleep(delay).await;

			let tip = match client.get_tip_header().await {
				Ok(header) => header.number,
				Err(e) => {
					warn!("Post-send rescan skipped, tip unavailable: {}", e);
					return;
				}
			};
			let rescan_from = tip.saturating_sub(POST_SEND_RESCAN_MARGIN);
			match registrar.rescan_from(rescan_from).await {
				Ok(()) => debug!("Post-send rescan registered from block {}", rescan_from),
				Err(e) => warn!("Post-send rescan from {} failed: {}", rescan_from, e),
			}
		})
	}
}
