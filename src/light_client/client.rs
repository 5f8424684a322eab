//!
//! JSON-RPC client for a CKB light client process.
//!
//! This module provides an async client for the light client's JSON-RPC endpoint. It implements
//! [`LightClientPort`] so the engine can drive a light client running as a separate process. All
//! methods are async and designed for use with Tokio.

use super::port::LightClientPort;
use super::types::*;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// CKB light client JSON-RPC client
pub struct LightClientRpc {
	/// The underlying HTTP client.
	http_client: Client,
	/// The JSON-RPC endpoint of the light client.
	url: String,
	/// Id of the next request.
	request_id: AtomicU64,
}

impl LightClientRpc {
	/// Create a new light client RPC client.
	///
	/// # Arguments
	/// * `url` - The JSON-RPC endpoint, e.g. `http://127.0.0.1:9000`.
	///
	/// # Errors
	/// Returns `LightClientError::HttpError` if the HTTP client cannot be built.
	pub fn new(url: impl Into<String>) -> Result<Self, LightClientError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			url: url.into(),
			request_id: AtomicU64::new(1),
		})
	}

	fn next_id(&self) -> u64 {
		self.request_id.fetch_add(1, Ordering::SeqCst)
	}

	/// Execute a JSON-RPC call whose result may legitimately be `null`.
	async fn call_optional<P, R>(&self, method: &str, params: P) -> Result<Option<R>, LightClientError>
	where
		P: Serialize,
		R: DeserializeOwned,
	{
		let request = JsonRpcRequest {
			jsonrpc: "2.0",
			id: self.next_id(),
			method,
			params,
		};

		debug!("Calling light client method {}", method);

		let response = self
			.http_client
			.post(&self.url)
			.header("Content-Type", "application/json")
			.json(&request)
			.send()
			.await?
			.error_for_status()?;

		let body: Value = response.json().await?;
		let rpc_response: JsonRpcResponse<R> = serde_json::from_value(body)?;

		if let Some(error) = rpc_response.error {
			return Err(LightClientError::RpcError {
				code: error.code,
				message: error.message,
			});
		}

		Ok(rpc_response.result)
	}

	/// Execute a JSON-RPC call that must return a result.
	async fn call<P, R>(&self, method: &str, params: P) -> Result<R, LightClientError>
	where
		P: Serialize,
		R: DeserializeOwned,
	{
		self.call_optional(method, params)
			.await?
			.ok_or_else(|| LightClientError::EmptyResponse(method.to_string()))
	}
}

#[async_trait::async_trait]
impl LightClientPort for LightClientRpc {
	async fn init(&self, config_path: &Path) -> Result<bool, LightClientError> {
		if let Err(e) = tokio::fs::metadata(config_path).await {
			return Err(LightClientError::ConfigError(format!(
				"Cannot read light client config {}: {}",
				config_path.display(),
				e
			)));
		}

		let node: Value = self.call("local_node_info", json!([])).await?;
		let version = node.get("version").and_then(Value::as_str).unwrap_or("unknown");
		info!(
			"Light client at {} reachable (version {}, expecting {})",
			self.url, version, RPC_SCHEMA_VERSION
		);
		Ok(true)
	}

	async fn start(&self) -> Result<bool, LightClientError> {
		let tip = self.get_tip_header().await?;
		info!("Light client started, tip at block {}", tip.number);
		Ok(true)
	}

	async fn set_scripts(
		&self,
		scripts: Vec<TrackedScript>,
		command: SetScriptsCommand,
	) -> Result<(), LightClientError> {
		// set_scripts returns null on success
		let _: Option<Value> = self
			.call_optional("set_scripts", (scripts, command))
			.await?;
		Ok(())
	}

	async fn get_scripts(&self) -> Result<Vec<TrackedScript>, LightClientError> {
		self.call("get_scripts", json!([])).await
	}

	async fn get_tip_header(&self) -> Result<HeaderView, LightClientError> {
		self.call("get_tip_header", json!([])).await
	}

	async fn get_header(&self, block_hash: &str) -> Result<Option<HeaderView>, LightClientError> {
		self.call_optional("get_header", [block_hash]).await
	}

	async fn get_cells_capacity(
		&self,
		search_key: &SearchKey,
	) -> Result<CellsCapacity, LightClientError> {
		self.call("get_cells_capacity", [search_key]).await
	}

	async fn get_cells(
		&self,
		search_key: &SearchKey,
		order: Order,
		limit: u32,
		cursor: Option<String>,
	) -> Result<Pagination<CellObject>, LightClientError> {
		self.call(
			"get_cells",
			(search_key, order, to_hex(u64::from(limit)), cursor),
		)
		.await
	}

	async fn get_transactions(
		&self,
		search_key: &SearchKey,
		order: Order,
		limit: u32,
		cursor: Option<String>,
	) -> Result<Pagination<TxWithCell>, LightClientError> {
		self.call(
			"get_transactions",
			(search_key, order, to_hex(u64::from(limit)), cursor),
		)
		.await
	}

	async fn get_transaction(
		&self,
		tx_hash: &str,
	) -> Result<Option<TransactionWithStatus>, LightClientError> {
		self.call_optional("get_transaction", [tx_hash]).await
	}

	async fn send_transaction(&self, tx: &Transaction) -> Result<String, LightClientError> {
		let tx_hash: String = self.call("send_transaction", [tx]).await?;
		if let Err(e) = validate_hash(&tx_hash) {
			warn!("Light client returned a malformed transaction hash: {}", tx_hash);
			return Err(e);
		}
		Ok(tx_hash)
	}

	async fn get_peers(&self) -> Result<Vec<PeerInfo>, LightClientError> {
		self.call("get_peers", json!([])).await
	}

	async fn call_rpc(&self, method: &str, params: Value) -> Result<Value, LightClientError> {
		Ok(self
			.call_optional::<_, Value>(method, params)
			.await?
			.unwrap_or(Value::Null))
	}
}
