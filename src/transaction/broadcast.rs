use serde::Serialize;
use std::fmt;

/// Why a broadcast was refused, derived from the client's error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastCategory {
	Duplicate,
	PoolFull,
	LowFeeRate,
	/// An input is already spent or was never created.
	DeadOrUnknownInput,
	InsufficientCapacity,
	ScriptVerification,
	/// The request never reached the pool.
	Transport,
	Other,
}

const PATTERNS: &[(BroadcastCategory, &[&str])] = &[
	(
		BroadcastCategory::Duplicate,
		&["duplicated", "duplicate", "already exists", "already in pool"],
	),
	(BroadcastCategory::PoolFull, &["poolisfull", "pool is full"]),
	(
		BroadcastCategory::LowFeeRate,
		&["minfeerate", "min fee rate", "fee rate", "feerate"],
	),
	(
		BroadcastCategory::DeadOrUnknownInput,
		&["dead", "unknown input", "unknown(", "failedtoresolve", "failed to resolve"],
	),
	(
		BroadcastCategory::InsufficientCapacity,
		&["insufficientcellcapacity", "insufficient", "capacity overflow", "outputsumoverflow"],
	),
	(
		BroadcastCategory::ScriptVerification,
		&["verification", "verify", "validationfailure", "script", "witness"],
	),
	(
		BroadcastCategory::Transport,
		&["http error", "connection", "timed out", "timeout", "empty response"],
	),
];

impl BroadcastCategory {
	/// Classify a failure message. The first matching category wins.
	pub fn categorize(message: &str) -> Self {
		let lowered = message.to_lowercase();
		PATTERNS
			.iter()
			.find(|(_, needles)| needles.iter().any(|n| lowered.contains(n)))
			.map(|(category, _)| *category)
			.unwrap_or(BroadcastCategory::Other)
	}

	pub fn describe(&self) -> &'static str {
		match self {
			BroadcastCategory::Duplicate => "This transaction was already submitted",
			BroadcastCategory::PoolFull => "The transaction pool is full, try again later",
			BroadcastCategory::LowFeeRate => "The fee is too low for the node to accept",
			BroadcastCategory::DeadOrUnknownInput => {
				"An input has already been spent or does not exist yet"
			}
			BroadcastCategory::InsufficientCapacity => {
				"Insufficient capacity to cover the outputs"
			}
			BroadcastCategory::ScriptVerification => "The transaction failed script verification",
			BroadcastCategory::Transport => "Could not reach the light client",
			BroadcastCategory::Other => "The transaction was rejected",
		}
	}

	/// Whether resubmitting the same transaction later may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			BroadcastCategory::PoolFull | BroadcastCategory::Transport
		)
	}
}

impl fmt::Display for BroadcastCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.describe())
	}
}
