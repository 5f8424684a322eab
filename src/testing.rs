//! Scripted light client and in-memory preference store shared by the unit tests.

use crate::config::Network;
use crate::light_client::*;
use crate::persistence::{PersistenceError, PersistencePort, PreferenceUpdate, SyncPreference};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

pub fn wallet_script() -> Script {
	Script {
		code_hash: crate::config::SECP256K1_BLAKE160_CODE_HASH.to_string(),
		hash_type: "type".to_string(),
		args: "0x36c329ed630d6ce750712a477543672adab57f4c".to_string(),
	}
}

pub fn other_script() -> Script {
	Script {
		code_hash: crate::config::SECP256K1_BLAKE160_CODE_HASH.to_string(),
		hash_type: "type".to_string(),
		args: "0x0000000000000000000000000000000000000001".to_string(),
	}
}

pub fn hash(n: u8) -> String {
	format!("0x{}", hex::encode([n; 32]))
}

pub fn header(number: u64) -> HeaderView {
	HeaderView {
		hash: hash((number % 251) as u8),
		number,
		epoch: "0x0".to_string(),
		timestamp: 1_700_000_000_000 + number,
		dao: "0x".to_string(),
		parent_hash: String::new(),
		compact_target: String::new(),
		version: "0x0".to_string(),
		nonce: "0x0".to_string(),
		transactions_root: String::new(),
		proposals_hash: String::new(),
		extra_hash: String::new(),
	}
}

pub fn cell(out_point: OutPoint, capacity: u64, block_number: u64) -> CellObject {
	CellObject {
		out_point,
		output: CellOutput {
			capacity,
			lock: wallet_script(),
			type_: None,
		},
		output_data: Some("0x".to_string()),
		block_number,
		tx_index: 1,
	}
}

pub fn output(capacity: u64, lock: Script) -> CellOutput {
	CellOutput {
		capacity,
		lock,
		type_: None,
	}
}

pub fn transaction(inputs: Vec<OutPoint>, outputs: Vec<CellOutput>) -> Transaction {
	let outputs_data = outputs.iter().map(|_| "0x".to_string()).collect();
	Transaction {
		version: "0x0".to_string(),
		cell_deps: Vec::new(),
		header_deps: Vec::new(),
		inputs: inputs
			.into_iter()
			.map(|previous_output| CellInput {
				since: "0x0".to_string(),
				previous_output,
			})
			.collect(),
		outputs,
		outputs_data,
		witnesses: Vec::new(),
	}
}

pub fn tx_row(
	tx_hash: &str,
	block_number: u64,
	tx: Transaction,
	io_type: IoType,
	io_index: u32,
) -> TxWithCell {
	TxWithCell {
		transaction: TransactionView {
			hash: tx_hash.to_string(),
			inner: tx,
		},
		block_number,
		tx_index: 1,
		io_index,
		io_type,
	}
}

pub fn status(kind: TxStatusKind, block_hash: Option<String>) -> TransactionWithStatus {
	TransactionWithStatus {
		transaction: None,
		tx_status: TxStatus {
			status: kind,
			block_hash,
			reason: None,
		},
	}
}

fn rpc_failure(message: &str) -> LightClientError {
	LightClientError::RpcError {
		code: -1,
		message: message.to_string(),
	}
}

/// Mutable script for [`MockLightClient`].
pub struct MockState {
	/// Results of successive `init` calls; `true` once exhausted.
	pub init_results: VecDeque<bool>,
	pub start_results: VecDeque<bool>,
	pub tip: u64,
	pub scripts: Vec<TrackedScript>,
	pub capacity: u64,
	pub cells: Vec<CellObject>,
	pub transactions: Vec<TxWithCell>,
	pub headers: HashMap<String, HeaderView>,
	/// Full transactions returned by `get_transaction` regardless of polling.
	pub known_transactions: HashMap<String, TransactionWithStatus>,
	/// Successive results for any other `get_transaction` call.
	pub status_queue: VecDeque<Option<TransactionWithStatus>>,
	/// Returned once `status_queue` is empty.
	pub status_fallback: Option<TransactionWithStatus>,
	pub send_result: Result<String, String>,
	pub fail_tip: bool,
	pub fail_cells: bool,
	pub fail_transactions: bool,
	pub fail_set_scripts: bool,
	pub peers: usize,
	pub calls: Vec<String>,
	pub set_scripts_calls: Vec<(Vec<TrackedScript>, SetScriptsCommand)>,
}

impl Default for MockState {
	fn default() -> Self {
		Self {
			init_results: VecDeque::new(),
			start_results: VecDeque::new(),
			tip: 0,
			scripts: Vec::new(),
			capacity: 0,
			cells: Vec::new(),
			transactions: Vec::new(),
			headers: HashMap::new(),
			known_transactions: HashMap::new(),
			status_queue: VecDeque::new(),
			status_fallback: None,
			send_result: Ok(hash(0xee)),
			fail_tip: false,
			fail_cells: false,
			fail_transactions: false,
			fail_set_scripts: false,
			peers: 2,
			calls: Vec::new(),
			set_scripts_calls: Vec::new(),
		}
	}
}

#[derive(Default)]
pub struct MockLightClient {
	pub state: Mutex<MockState>,
}

impl MockLightClient {
	pub fn with_tip(tip: u64) -> Self {
		let mock = Self::default();
		mock.state().tip = tip;
		mock
	}

	pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
		self.state.lock().unwrap()
	}

	pub fn calls_to(&self, method: &str) -> usize {
		self.state().calls.iter().filter(|c| *c == method).count()
	}

	/// Block the tracked script is registered at, if any.
	pub fn registered_block(&self) -> Option<u64> {
		self.state().scripts.first().map(|s| s.block_number)
	}

	fn record(&self, method: &str) -> std::sync::MutexGuard<'_, MockState> {
		let mut state = self.state();
		state.calls.push(method.to_string());
		state
	}
}

#[async_trait::async_trait]
impl LightClientPort for MockLightClient {
	async fn init(&self, _config_path: &Path) -> Result<bool, LightClientError> {
		Ok(self.record("init").init_results.pop_front().unwrap_or(true))
	}

	async fn start(&self) -> Result<bool, LightClientError> {
		Ok(self.record("start").start_results.pop_front().unwrap_or(true))
	}

	async fn set_scripts(
		&self,
		scripts: Vec<TrackedScript>,
		command: SetScriptsCommand,
	) -> Result<(), LightClientError> {
		let mut state = self.record("set_scripts");
		if state.fail_set_scripts {
			return Err(rpc_failure("set_scripts refused"));
		}
		state.set_scripts_calls.push((scripts.clone(), command));
		match command {
			SetScriptsCommand::All => state.scripts = scripts,
			SetScriptsCommand::Partial => {
				for script in scripts {
					state.scripts.retain(|s| !s.script.matches(&script.script));
					state.scripts.push(script);
				}
			}
			SetScriptsCommand::Delete => {
				for script in scripts {
					state.scripts.retain(|s| !s.script.matches(&script.script));
				}
			}
		}
		Ok(())
	}

	async fn get_scripts(&self) -> Result<Vec<TrackedScript>, LightClientError> {
		Ok(self.record("get_scripts").scripts.clone())
	}

	async fn get_tip_header(&self) -> Result<HeaderView, LightClientError> {
		let state = self.record("get_tip_header");
		if state.fail_tip {
			return Err(rpc_failure("tip unavailable"));
		}
		Ok(header(state.tip))
	}

	async fn get_header(&self, block_hash: &str) -> Result<Option<HeaderView>, LightClientError> {
		Ok(self.record("get_header").headers.get(block_hash).cloned())
	}

	async fn get_cells_capacity(
		&self,
		_search_key: &SearchKey,
	) -> Result<CellsCapacity, LightClientError> {
		let state = self.record("get_cells_capacity");
		Ok(CellsCapacity {
			capacity: state.capacity,
			block_number: state.tip,
			block_hash: hash(1),
		})
	}

	async fn get_cells(
		&self,
		_search_key: &SearchKey,
		_order: Order,
		limit: u32,
		_cursor: Option<String>,
	) -> Result<Pagination<CellObject>, LightClientError> {
		let state = self.record("get_cells");
		if state.fail_cells {
			return Err(rpc_failure("cells unavailable"));
		}
		Ok(Pagination {
			objects: state.cells.iter().take(limit as usize).cloned().collect(),
			last_cursor: "0xcursor".to_string(),
		})
	}

	async fn get_transactions(
		&self,
		_search_key: &SearchKey,
		_order: Order,
		limit: u32,
		_cursor: Option<String>,
	) -> Result<Pagination<TxWithCell>, LightClientError> {
		let state = self.record("get_transactions");
		if state.fail_transactions {
			return Err(rpc_failure("transactions unavailable"));
		}
		Ok(Pagination {
			objects: state
				.transactions
				.iter()
				.take(limit as usize)
				.cloned()
				.collect(),
			last_cursor: "0xcursor".to_string(),
		})
	}

	async fn get_transaction(
		&self,
		tx_hash: &str,
	) -> Result<Option<TransactionWithStatus>, LightClientError> {
		let mut state = self.record("get_transaction");
		if let Some(known) = state.known_transactions.get(tx_hash) {
			return Ok(Some(known.clone()));
		}
		match state.status_queue.pop_front() {
			Some(next) => Ok(next),
			None => Ok(state.status_fallback.clone()),
		}
	}

	async fn send_transaction(&self, _tx: &Transaction) -> Result<String, LightClientError> {
		let state = self.record("send_transaction");
		state.send_result.clone().map_err(|message| rpc_failure(&message))
	}

	async fn get_peers(&self) -> Result<Vec<PeerInfo>, LightClientError> {
		let state = self.record("get_peers");
		Ok((0..state.peers)
			.map(|i| PeerInfo {
				node_id: format!("peer-{i}"),
				addresses: Vec::new(),
				connected_duration: None,
			})
			.collect())
	}

	async fn call_rpc(
		&self,
		method: &str,
		_params: serde_json::Value,
	) -> Result<serde_json::Value, LightClientError> {
		drop(self.record(method));
		Ok(serde_json::Value::Null)
	}
}

#[derive(Default)]
pub struct MemoryPreferenceStore {
	preferences: Mutex<HashMap<Network, SyncPreference>>,
	selected: Mutex<Option<Network>>,
}

#[async_trait::async_trait]
impl PersistencePort for MemoryPreferenceStore {
	async fn load(&self, network: Network) -> Result<Option<SyncPreference>, PersistenceError> {
		Ok(self.preferences.lock().unwrap().get(&network).cloned())
	}

	async fn update(
		&self,
		network: Network,
		edit: PreferenceUpdate,
	) -> Result<SyncPreference, PersistenceError> {
		let mut preferences = self.preferences.lock().unwrap();
		let preference = preferences
			.entry(network)
			.or_insert_with(|| SyncPreference::new(network));
		edit(preference);
		Ok(preference.clone())
	}

	async fn reset(&self, network: Network) -> Result<(), PersistenceError> {
		self.preferences.lock().unwrap().remove(&network);
		Ok(())
	}

	async fn selected_network(&self) -> Result<Option<Network>, PersistenceError> {
		Ok(*self.selected.lock().unwrap())
	}

	async fn set_selected_network(&self, network: Network) -> Result<(), PersistenceError> {
		*self.selected.lock().unwrap() = Some(network);
		Ok(())
	}
}
