use super::types::*;
use std::path::Path;

/// Operations the sync engine needs from a CKB light client.
///
/// The engine only ever talks to the chain through this trait, which keeps the embedded client,
/// a remote JSON-RPC endpoint and test doubles interchangeable.
#[async_trait::async_trait]
pub trait LightClientPort: Send + Sync {
	/// Prepare the client from its configuration file. `Ok(false)` means the client refused.
	async fn init(&self, config_path: &Path) -> Result<bool, LightClientError>;

	/// Start processing. Only meaningful after a successful `init`.
	async fn start(&self) -> Result<bool, LightClientError>;

	async fn set_scripts(
		&self,
		scripts: Vec<TrackedScript>,
		command: SetScriptsCommand,
	) -> Result<(), LightClientError>;

	async fn get_scripts(&self) -> Result<Vec<TrackedScript>, LightClientError>;

	async fn get_tip_header(&self) -> Result<HeaderView, LightClientError>;

	/// Header by hash, `None` if the client has not fetched it.
	async fn get_header(&self, block_hash: &str) -> Result<Option<HeaderView>, LightClientError>;

	async fn get_cells_capacity(
		&self,
		search_key: &SearchKey,
	) -> Result<CellsCapacity, LightClientError>;

	async fn get_cells(
		&self,
		search_key: &SearchKey,
		order: Order,
		limit: u32,
		cursor: Option<String>,
	) -> Result<Pagination<CellObject>, LightClientError>;

	async fn get_transactions(
		&self,
		search_key: &SearchKey,
		order: Order,
		limit: u32,
		cursor: Option<String>,
	) -> Result<Pagination<TxWithCell>, LightClientError>;

	/// Transaction and status by hash, `None` if the client knows nothing about it.
	async fn get_transaction(
		&self,
		tx_hash: &str,
	) -> Result<Option<TransactionWithStatus>, LightClientError>;

	/// Broadcast a signed transaction, returning its hash.
	async fn send_transaction(&self, tx: &Transaction) -> Result<String, LightClientError>;

	async fn get_peers(&self) -> Result<Vec<PeerInfo>, LightClientError>;

	/// Raw call for diagnostics.
	async fn call_rpc(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, LightClientError>;
}
