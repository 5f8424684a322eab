//! Wire types for the CKB light client JSON-RPC interface.
//!
//! Decoding follows the light client's response schema (`RPC_SCHEMA_VERSION`). Every chain
//! quantity travels as a `0x`-prefixed big-endian hex string; those fields go through the strict
//! [`hex_u64`] / [`hex_u32`] codecs so a malformed number fails deserialization instead of being
//! coerced to zero. Optional and late-added fields are defaulted, everything else is required.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Light client RPC schema these types were written against.
pub const RPC_SCHEMA_VERSION: &str = "ckb-light-client/0.3";

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(raw: &str) -> Result<u64, LightClientError> {
	let digits = raw
		.strip_prefix("0x")
		.ok_or_else(|| LightClientError::InvalidQuantity(raw.to_string()))?;
	if digits.is_empty() || digits.len() > 16 {
		return Err(LightClientError::InvalidQuantity(raw.to_string()));
	}
	u64::from_str_radix(digits, 16).map_err(|_| LightClientError::InvalidQuantity(raw.to_string()))
}

/// Encode a quantity the way the light client expects it (`0x0`, `0x1f4`, ...).
pub fn to_hex(value: u64) -> String {
	format!("{:#x}", value)
}

/// Serde codec for `u64` quantities encoded as `0x` hex strings.
pub mod hex_u64 {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&super::to_hex(*value))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
		let raw = String::deserialize(deserializer)?;
		super::parse_hex_u64(&raw).map_err(serde::de::Error::custom)
	}
}

/// Serde codec for `u32` quantities encoded as `0x` hex strings.
pub mod hex_u32 {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&super::to_hex(u64::from(*value)))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
		let raw = String::deserialize(deserializer)?;
		let value = super::parse_hex_u64(&raw).map_err(serde::de::Error::custom)?;
		u32::try_from(value).map_err(|_| serde::de::Error::custom(format!("{raw} overflows u32")))
	}
}

/// Check that a hash is a `0x`-prefixed 32-byte hex string.
pub fn validate_hash(raw: &str) -> Result<(), LightClientError> {
	let digits = raw
		.strip_prefix("0x")
		.ok_or_else(|| LightClientError::InvalidHash(raw.to_string()))?;
	match hex::decode(digits) {
		Ok(bytes) if bytes.len() == 32 => Ok(()),
		_ => Err(LightClientError::InvalidHash(raw.to_string())),
	}
}

/// A lock or type script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Script {
	pub code_hash: String,
	pub hash_type: String,
	pub args: String,
}

impl Script {
	/// Lowercased copy, used for comparisons against client responses.
	pub fn normalized(&self) -> Script {
		Script {
			code_hash: self.code_hash.to_lowercase(),
			hash_type: self.hash_type.to_lowercase(),
			args: self.args.to_lowercase(),
		}
	}

	/// Case-insensitive script equality.
	pub fn matches(&self, other: &Script) -> bool {
		self.code_hash.eq_ignore_ascii_case(&other.code_hash)
			&& self.hash_type.eq_ignore_ascii_case(&other.hash_type)
			&& self.args.eq_ignore_ascii_case(&other.args)
	}
}

/// Identity of a cell: the creating transaction and the output index within it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OutPoint {
	pub tx_hash: String,
	#[serde(with = "hex_u32")]
	pub index: u32,
}

impl OutPoint {
	pub fn new(tx_hash: impl Into<String>, index: u32) -> Self {
		Self {
			tx_hash: tx_hash.into().to_lowercase(),
			index,
		}
	}

	/// Lowercased copy so outpoints from different responses compare equal.
	pub fn normalized(&self) -> OutPoint {
		OutPoint::new(self.tx_hash.clone(), self.index)
	}
}

impl fmt::Display for OutPoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.tx_hash, self.index)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellDep {
	pub out_point: OutPoint,
	pub dep_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellInput {
	pub since: String,
	pub previous_output: OutPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellOutput {
	#[serde(with = "hex_u64")]
	pub capacity: u64,
	pub lock: Script,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub type_: Option<Script>,
}

/// A signed transaction as accepted by `send_transaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
	pub version: String,
	pub cell_deps: Vec<CellDep>,
	pub header_deps: Vec<String>,
	pub inputs: Vec<CellInput>,
	pub outputs: Vec<CellOutput>,
	pub outputs_data: Vec<String>,
	pub witnesses: Vec<String>,
}

/// A transaction together with its hash, as embedded in query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
	pub hash: String,
	#[serde(flatten)]
	pub inner: Transaction,
}

/// `get_transaction` returns the transaction either directly or wrapped in `inner`,
/// depending on the client build.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransactionWrapper {
	Wrapped { inner: TransactionView },
	Direct(TransactionView),
}

impl TransactionWrapper {
	pub fn view(&self) -> &TransactionView {
		match self {
			TransactionWrapper::Wrapped { inner } => inner,
			TransactionWrapper::Direct(view) => view,
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxStatusKind {
	Pending,
	Proposed,
	Committed,
	Unknown,
	Rejected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxStatus {
	pub status: TxStatusKind,
	#[serde(default)]
	pub block_hash: Option<String>,
	#[serde(default)]
	pub reason: Option<String>,
}

/// Result of `get_transaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionWithStatus {
	#[serde(default)]
	pub transaction: Option<TransactionWrapper>,
	pub tx_status: TxStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderView {
	pub hash: String,
	#[serde(with = "hex_u64")]
	pub number: u64,
	pub epoch: String,
	#[serde(with = "hex_u64")]
	pub timestamp: u64,
	pub dao: String,
	#[serde(default)]
	pub parent_hash: String,
	#[serde(default)]
	pub compact_target: String,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub nonce: String,
	#[serde(default)]
	pub transactions_root: String,
	#[serde(default)]
	pub proposals_hash: String,
	#[serde(default)]
	pub extra_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
	Lock,
	Type,
}

/// A script registered with the light client and the block it is synced to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedScript {
	pub script: Script,
	pub script_type: ScriptType,
	#[serde(with = "hex_u64")]
	pub block_number: u64,
}

impl TrackedScript {
	pub fn lock(script: Script, block_number: u64) -> Self {
		Self {
			script,
			script_type: ScriptType::Lock,
			block_number,
		}
	}
}

/// How `set_scripts` combines the given scripts with the registered set.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SetScriptsCommand {
	/// Replace the whole registered set.
	All,
	Partial,
	Delete,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Order {
	Asc,
	Desc,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSearchMode {
	Prefix,
	Exact,
	Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchKey {
	pub script: Script,
	pub script_type: ScriptType,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub script_search_mode: Option<ScriptSearchMode>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub filter: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub with_data: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub group_by_transaction: Option<bool>,
}

impl SearchKey {
	/// Search by lock script with prefix matching on args.
	pub fn lock(script: Script) -> Self {
		Self {
			script,
			script_type: ScriptType::Lock,
			script_search_mode: Some(ScriptSearchMode::Prefix),
			filter: None,
			with_data: None,
			group_by_transaction: None,
		}
	}

	pub fn with_data(mut self, with_data: bool) -> Self {
		self.with_data = Some(with_data);
		self
	}
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, Deserialize)]
pub struct Pagination<T> {
	pub objects: Vec<T>,
	pub last_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CellsCapacity {
	#[serde(with = "hex_u64")]
	pub capacity: u64,
	#[serde(with = "hex_u64")]
	pub block_number: u64,
	#[serde(default)]
	pub block_hash: String,
}

/// A live-cell row from `get_cells`.
#[derive(Debug, Clone, Deserialize)]
pub struct CellObject {
	pub out_point: OutPoint,
	pub output: CellOutput,
	#[serde(default)]
	pub output_data: Option<String>,
	#[serde(with = "hex_u64")]
	pub block_number: u64,
	#[serde(with = "hex_u32")]
	pub tx_index: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IoType {
	Input,
	Output,
}

/// A row from ungrouped `get_transactions`: one input or output of a transaction
/// that touched the searched script.
#[derive(Debug, Clone, Deserialize)]
pub struct TxWithCell {
	pub transaction: TransactionView,
	#[serde(with = "hex_u64")]
	pub block_number: u64,
	#[serde(with = "hex_u32")]
	pub tx_index: u32,
	#[serde(with = "hex_u32")]
	pub io_index: u32,
	pub io_type: IoType,
}

impl TxWithCell {
	pub fn tx_hash(&self) -> &str {
		&self.transaction.hash
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerInfo {
	pub node_id: String,
	#[serde(default)]
	pub addresses: Vec<serde_json::Value>,
	#[serde(default)]
	pub connected_duration: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a, T> {
	pub jsonrpc: &'static str,
	pub id: u64,
	pub method: &'a str,
	pub params: T,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
	pub result: Option<T>,
	#[serde(default)]
	pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
	pub code: i64,
	pub message: String,
}

/// Error types for light client transport and decoding
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum LightClientError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("RPC error {code}: {message}")]
	RpcError { code: i64, message: String },

	#[error("Empty response from {0}")]
	EmptyResponse(String),

	#[error("Invalid quantity: {0}")]
	InvalidQuantity(String),

	#[error("Invalid hash: {0}")]
	InvalidHash(String),

	#[error("Config error: {0}")]
	ConfigError(String),
}
