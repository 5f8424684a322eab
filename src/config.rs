//! Engine configuration: networks, sync modes, timing policy and environment loading.

use crate::light_client::Script;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Shannons per CKB.
pub const SHANNONS_PER_CKB: u64 = 100_000_000;

/// Smallest capacity an output may carry (61 CKB).
pub const MIN_CELL_CAPACITY_SHANNONS: u64 = 61 * SHANNONS_PER_CKB;

/// How far behind the tip a `Recent` sync starts (~30 days of blocks).
pub const RECENT_SYNC_WINDOW: u64 = 200_000;

/// Distance before the earliest observed transaction a self-heal rescan starts from.
pub const SELF_HEAL_RESCAN_MARGIN: u64 = 100;

/// Distance behind the tip the post-send rescan starts from.
pub const POST_SEND_RESCAN_MARGIN: u64 = 10;

/// Maximum tip distance at which an account still counts as synced.
pub const SYNCED_TOLERANCE: u64 = 10;

/// Code hash of the default secp256k1/blake160 lock.
pub const SECP256K1_BLAKE160_CODE_HASH: &str =
	"0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Mainnet,
	Testnet,
}

impl Network {
	/// Fixed starting height used as a sync floor when nothing better is known.
	pub fn checkpoint(&self) -> u64 {
		match self {
			Network::Mainnet => 12_000_000,
			Network::Testnet => 15_000_000,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Network::Mainnet => "mainnet",
			Network::Testnet => "testnet",
		}
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Network {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"mainnet" | "mirana" => Ok(Network::Mainnet),
			"testnet" | "pudge" => Ok(Network::Testnet),
			other => Err(format!("unknown network: {other}")),
		}
	}
}

/// How far back history is scanned for a newly registered account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
	/// Start at the current tip; no history.
	NewWallet,
	/// The last `RECENT_SYNC_WINDOW` blocks.
	#[default]
	Recent,
	/// Everything since genesis.
	FullHistory,
	/// A caller-chosen height.
	Custom,
}

impl FromStr for SyncMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"new_wallet" | "new" | "tip" => Ok(SyncMode::NewWallet),
			"recent" => Ok(SyncMode::Recent),
			"full_history" | "full" | "genesis" => Ok(SyncMode::FullHistory),
			"custom" => Ok(SyncMode::Custom),
			other => Err(format!("unknown sync mode: {other}")),
		}
	}
}

/// Retry, polling and rescan timing policy.
#[derive(Debug, Clone)]
pub struct EngineTimings {
	/// Node init+start attempts before giving up.
	pub init_attempts: u32,
	/// First backoff delay between init attempts; doubles each time.
	pub init_initial_backoff: Duration,
	pub status_poll_interval: Duration,
	pub max_status_polls: u32,
	/// Consecutive `unknown` polls after which a transaction is assumed confirmed.
	pub unknown_confirm_threshold: u32,
	/// Consecutive `unknown` polls that still count as confirmed when polling times out.
	pub timeout_unknown_threshold: u32,
	pub required_confirmations: u64,
	pub balance_poll_interval: Duration,
	pub max_balance_polls: u32,
	/// Delay before re-registering the tracked script after a send.
	pub post_send_rescan_delay: Duration,
}

impl Default for EngineTimings {
	fn default() -> Self {
		Self {
			init_attempts: 3,
			init_initial_backoff: Duration::from_secs(2),
			status_poll_interval: Duration::from_secs(3),
			max_status_polls: 120,
			unknown_confirm_threshold: 20,
			timeout_unknown_threshold: 10,
			required_confirmations: 3,
			balance_poll_interval: Duration::from_secs(3),
			max_balance_polls: 30,
			post_send_rescan_delay: Duration::from_secs(5),
		}
	}
}

/// The account the engine tracks.
#[derive(Debug, Clone)]
pub struct AccountConfig {
	/// Display form of the address; encoding is handled elsewhere.
	pub address: String,
	pub lock_script: Script,
}

impl AccountConfig {
	/// Account guarded by the default secp256k1/blake160 lock with the given args.
	pub fn secp256k1(address: impl Into<String>, lock_args: impl Into<String>) -> Self {
		Self {
			address: address.into(),
			lock_script: Script {
				code_hash: SECP256K1_BLAKE160_CODE_HASH.to_string(),
				hash_type: "type".to_string(),
				args: lock_args.into(),
			},
		}
	}
}

/// Runtime configuration for the binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub network: Network,
	pub light_client_url: String,
	pub light_client_config: PathBuf,
	pub data_dir: PathBuf,
	pub account: AccountConfig,
	pub signed_tx_path: Option<PathBuf>,
	pub timings: EngineTimings,
}

impl EngineConfig {
	/// Load configuration from environment variables.
	///
	/// `WALLET_LOCK_ARGS` is required; everything else has a default.
	pub fn from_env() -> Result<Self, String> {
		let network = match std::env::var("CKB_NETWORK") {
			Ok(raw) => raw.parse()?,
			Err(_) => Network::Testnet,
		};
		let lock_args = std::env::var("WALLET_LOCK_ARGS")
			.map_err(|_| "WALLET_LOCK_ARGS must be set to the wallet's lock args".to_string())?;
		let address = std::env::var("WALLET_ADDRESS").unwrap_or_else(|_| lock_args.clone());

		Ok(Self {
			network,
			light_client_url: std::env::var("LIGHT_CLIENT_URL")
				.unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
			light_client_config: std::env::var("LIGHT_CLIENT_CONFIG")
				.map(PathBuf::from)
				.unwrap_or_else(|_| PathBuf::from(format!("config/{}.toml", network))),
			data_dir: std::env::var("WALLET_DATA_DIR")
				.map(PathBuf::from)
				.unwrap_or_else(|_| PathBuf::from("./data")),
			account: AccountConfig::secp256k1(address, lock_args),
			signed_tx_path: std::env::var("SIGNED_TX_PATH").ok().map(PathBuf::from),
			timings: EngineTimings::default(),
		})
	}
}
