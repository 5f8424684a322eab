use ckb_wallet_sync::light_client::{LightClientRpc, Transaction};
use ckb_wallet_sync::persistence::{FileSyncPreferenceStore, PersistencePort};
use ckb_wallet_sync::transaction::TrackOutcome;
use ckb_wallet_sync::utils::{format_ckb, format_shannons_delta};
use ckb_wallet_sync::{EngineConfig, WalletSyncEngine};

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	// Initialize tracing subscriber with info logging for the engine
	let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		tracing_subscriber::EnvFilter::new("ckb_wallet_sync=info,ckb_wallet_sync::light_client=warn")
	});
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting wallet sync service");

	let mut config = match EngineConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	let store = match FileSyncPreferenceStore::open(&config.data_dir).await {
		Ok(store) => Arc::new(store),
		Err(e) => {
			error!("Failed to open preference store: {}", e);
			return;
		}
	};

	// A network switch from a previous run takes precedence over the environment
	match store.selected_network().await {
		Ok(Some(network)) if network != config.network => {
			info!("Using previously selected network {}", network);
			config.network = network;
		}
		Ok(_) => {}
		Err(e) => warn!("Could not read selected network: {}", e),
	}

	let client = match LightClientRpc::new(config.light_client_url.clone()) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create light client RPC client: {}", e);
			return;
		}
	};

	let engine = WalletSyncEngine::from_config(&config, client, store);

	if let Err(e) = engine.start().await {
		error!("Light client did not come up: {}", e);
		return;
	}

	match engine.register_from_saved_preference().await {
		Ok(registration) => info!(
			"Tracking {} from block {} (tip {})",
			config.account.address, registration.start_block, registration.tip
		),
		Err(e) => {
			error!("Failed to register account: {}", e);
			return;
		}
	}

	match engine.node_status().await {
		Ok(status) => info!(
			"Light client at block {} with {} peer(s)",
			status.tip_number, status.peer_count
		),
		Err(e) => warn!("Node status unavailable: {}", e),
	}

	match engine.account_status().await {
		Ok(status) => info!("Account {}", status.summary()),
		Err(e) => warn!("Account status unavailable: {}", e),
	}

	match engine.refresh_balance().await {
		Ok(balance) => info!(
			"Balance: {} CKB as of block {}",
			format_ckb(balance.capacity),
			balance.as_of_block
		),
		Err(e) => error!("Failed to refresh balance: {}", e),
	}

	match engine.transactions(Some(10), None).await {
		Ok(page) => {
			for record in page.items {
				info!(
					"   - {} {:?} {} CKB ({} confirmations)",
					record.tx_hash,
					record.direction,
					format_shannons_delta(record.balance_change),
					record.confirmations
				);
			}
		}
		Err(e) => warn!("Failed to list transactions: {}", e),
	}

	let Some(path) = config.signed_tx_path.as_deref() else {
		return;
	};

	let tx = match load_transaction(path).await {
		Ok(tx) => tx,
		Err(e) => {
			error!("Failed to load signed transaction from {:?}: {}", path, e);
			return;
		}
	};

	info!("Sending transaction");
	match engine.send_transaction(&tx).await {
		Ok(tx_hash) => info!("Transaction submitted: {}", tx_hash),
		Err(e) => {
			error!("Failed to submit transaction: {}", e);
			return;
		}
	}

	match engine.await_tracking().await {
		Some(TrackOutcome::Confirmed {
			confirmations,
			verified,
		}) => info!(
			"Transaction confirmed ({} confirmations{})",
			confirmations,
			if verified { "" } else { ", unverified" }
		),
		Some(TrackOutcome::Failed { reason }) => error!("Transaction failed: {}", reason),
		Some(TrackOutcome::Unresolved) => {
			warn!("Transaction status unresolved, it may still confirm")
		}
		Some(TrackOutcome::Cancelled) | None => warn!("Transaction tracking stopped"),
	}
}

async fn load_transaction(path: &Path) -> Result<Transaction, String> {
	let content = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| e.to_string())?;
	serde_json::from_str(&content).map_err(|e| e.to_string())
}
