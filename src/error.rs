use crate::light_client::LightClientError;
use crate::persistence::PersistenceError;
use crate::transaction::BroadcastCategory;

/// Error kinds surfaced by every public engine operation
#[derive(Debug, thiserror::Error)]
pub enum WalletSyncError {
	#[error("Light client failed to start: {0}")]
	NodeInit(String),

	#[error("Light client is not ready")]
	NodeNotReady,

	#[error("A network switch is already in progress")]
	AlreadySwitching,

	#[error("Another sync operation is already in progress")]
	OperationInProgress,

	#[error("Account is not registered with the light client")]
	NotRegistered,

	#[error("Registration failed: {0}")]
	Registration(String),

	#[error("Query error: {0}")]
	Query(#[from] LightClientError),

	#[error("Invalid transaction: {0}")]
	Validation(String),

	#[error("{}", .category.describe())]
	Broadcast {
		category: BroadcastCategory,
		detail: String,
	},

	#[error("Persistence error: {0}")]
	Persistence(#[from] PersistenceError),
}

impl WalletSyncError {
	/// Whether the caller can reasonably retry the same operation later.
	pub fn is_retryable(&self) -> bool {
		match self {
			WalletSyncError::NodeInit(_) | WalletSyncError::Validation(_) => false,
			WalletSyncError::Broadcast { category, .. } => category.is_retryable(),
			_ => true,
		}
	}
}
