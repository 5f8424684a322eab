/// Classification of broadcast failures
pub mod broadcast;
/// Validation and broadcast of signed transactions
pub mod submitter;
/// Confirmation tracking for submitted transactions
pub mod tracker;

pub use broadcast::BroadcastCategory;
pub use submitter::{TransactionSubmitter, validate};
pub use tracker::{
	NETWORK_CHANGED, PollResult, StatusMachine, Step, TrackOutcome, TransactionProgress,
	TransactionState, TransactionStatusTracker,
};
