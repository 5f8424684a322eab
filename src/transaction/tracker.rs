//! Follows a broadcast transaction to a terminal state, then waits for the balance to move.
//!
//! The light client only sees transactions touching scripts it tracks, so a freshly sent
//! transaction often reports `unknown` for a while. A long enough run of `unknown` results is
//! taken as confirmation; such confirmations are published with `verified: false`.

use crate::balance::{BalanceReconciler, BalanceSnapshot};
use crate::config::EngineTimings;
use crate::light_client::{LightClientPort, TxStatusKind};

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const NETWORK_CHANGED: &str = "network changed";
const TIMED_OUT: &str = "status check timed out, may still confirm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransactionState {
	Idle,
	Sending,
	Pending,
	Proposed,
	Confirmed {
		confirmations: u64,
		/// False when confirmation was inferred rather than observed on chain.
		verified: bool,
	},
	Failed {
		reason: String,
	},
}

impl TransactionState {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			TransactionState::Confirmed { .. } | TransactionState::Failed { .. }
		)
	}

	pub fn is_in_flight(&self) -> bool {
		matches!(
			self,
			TransactionState::Sending | TransactionState::Pending | TransactionState::Proposed
		)
	}
}

/// Published view of the current submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionProgress {
	pub tx_hash: Option<String>,
	pub state: TransactionState,
	pub message: String,
}

impl TransactionProgress {
	fn idle() -> Self {
		Self {
			tx_hash: None,
			state: TransactionState::Idle,
			message: String::new(),
		}
	}
}

/// How tracking ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
	Confirmed { confirmations: u64, verified: bool },
	Failed { reason: String },
	/// Polling gave up without a verdict; the transaction may still confirm.
	Unresolved,
	Cancelled,
}

/// One status poll, reduced to what the state machine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
	Unknown,
	Pending,
	Proposed,
	Committed { confirmations: u64 },
	Rejected { reason: String },
}

/// What the poll loop does after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
	Continue {
		state: TransactionState,
		message: String,
	},
	Finish {
		state: TransactionState,
		message: String,
	},
	/// Stop polling, leave the state as is.
	GiveUp {
		message: String,
	},
}

/// Pure transition rules for status polling.
#[derive(Debug, Clone)]
pub struct StatusMachine {
	required_confirmations: u64,
	unknown_confirm_threshold: u32,
	timeout_unknown_threshold: u32,
	unknown_streak: u32,
}

impl StatusMachine {
	pub fn new(timings: &EngineTimings) -> Self {
		Self {
			required_confirmations: timings.required_confirmations,
			unknown_confirm_threshold: timings.unknown_confirm_threshold,
			timeout_unknown_threshold: timings.timeout_unknown_threshold,
			unknown_streak: 0,
		}
	}

	pub fn unknown_streak(&self) -> u32 {
		self.unknown_streak
	}

	pub fn observe(&mut self, poll: PollResult) -> Step {
		if poll != PollResult::Unknown {
			self.unknown_streak = 0;
		}
		match poll {
			PollResult::Unknown => {
				self.unknown_streak += 1;
				if self.unknown_streak >= self.unknown_confirm_threshold {
					return Step::Finish {
						state: TransactionState::Confirmed {
							confirmations: 1,
							verified: false,
						},
						message: format!(
							"Assumed confirmed after {} unknown status checks",
							self.unknown_streak
						),
					};
				}
				Step::Continue {
					state: TransactionState::Pending,
					message: "Waiting for the transaction to be seen".to_string(),
				}
			}
			PollResult::Pending => Step::Continue {
				state: TransactionState::Pending,
				message: "Waiting in the transaction pool".to_string(),
			},
			PollResult::Proposed => Step::Continue {
				state: TransactionState::Proposed,
				message: "Proposed for inclusion".to_string(),
			},
			PollResult::Committed { confirmations } => {
				if confirmations >= self.required_confirmations {
					Step::Finish {
						state: TransactionState::Confirmed {
							confirmations,
							verified: true,
						},
						message: format!("Confirmed with {} confirmations", confirmations),
					}
				} else {
					Step::Continue {
						state: TransactionState::Proposed,
						message: format!(
							"Confirming ({} of {})",
							confirmations, self.required_confirmations
						),
					}
				}
			}
			PollResult::Rejected { reason } => Step::Finish {
				message: format!("Rejected: {}", reason),
				state: TransactionState::Failed { reason },
			},
		}
	}

	/// Verdict once the poll budget is spent.
	pub fn timeout(&self) -> Step {
		if self.unknown_streak >= self.timeout_unknown_threshold {
			Step::Finish {
				state: TransactionState::Confirmed {
					confirmations: 1,
					verified: false,
				},
				message: format!(
					"Assumed confirmed after {} unknown status checks",
					self.unknown_streak
				),
			}
		} else {
			Step::GiveUp {
				message: TIMED_OUT.to_string(),
			}
		}
	}
}

/// Owns the published [`TransactionProgress`] and the polling for the current submission.
pub struct TransactionStatusTracker {
	client: Arc<dyn LightClientPort>,
	reconciler: Arc<BalanceReconciler>,
	timings: EngineTimings,
	progress: watch::Sender<TransactionProgress>,
	// Held while publishing so a cancelled poll can never overwrite the cancellation.
	active: Mutex<CancellationToken>,
}

impl TransactionStatusTracker {
	pub fn new(
		client: Arc<dyn LightClientPort>,
		reconciler: Arc<BalanceReconciler>,
		timings: EngineTimings,
	) -> Self {
		let (progress, _) = watch::channel(TransactionProgress::idle());
		Self {
			client,
			reconciler,
			timings,
			progress,
			active: Mutex::new(CancellationToken::new()),
		}
	}

	pub fn current(&self) -> TransactionProgress {
		self.progress.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<TransactionProgress> {
		self.progress.subscribe()
	}

	/// Start a new submission, cancelling any polling left from the previous one.
	pub fn begin_send(&self) -> CancellationToken {
		let token = CancellationToken::new();
		if let Ok(mut active) = self.active.lock() {
			active.cancel();
			*active = token.clone();
		}
		self.progress.send_replace(TransactionProgress {
			tx_hash: None,
			state: TransactionState::Sending,
			message: "Broadcasting transaction".to_string(),
		});
		token
	}

	pub fn mark_pending(&self, token: &CancellationToken, tx_hash: &str) {
		self.publish(
			token,
			Some(tx_hash),
			TransactionState::Pending,
			"Broadcast accepted".to_string(),
		);
	}

	pub fn mark_failed(&self, token: &CancellationToken, reason: String) {
		self.publish(
			token,
			None,
			TransactionState::Failed {
				reason: reason.clone(),
			},
			reason,
		);
	}

	/// Stop all polling. A submission still in flight ends as failed.
	pub fn cancel_for_network_change(&self) {
		let Ok(active) = self.active.lock() else {
			return;
		};
		active.cancel();
		let current = self.progress.borrow().clone();
		if current.state.is_in_flight() {
			info!("Cancelling transaction tracking: {}", NETWORK_CHANGED);
			self.progress.send_replace(TransactionProgress {
				tx_hash: current.tx_hash,
				state: TransactionState::Failed {
					reason: NETWORK_CHANGED.to_string(),
				},
				message: NETWORK_CHANGED.to_string(),
			});
		}
	}

	/// Stop all polling and return to idle.
	pub fn clear(&self) {
		let Ok(active) = self.active.lock() else {
			return;
		};
		active.cancel();
		self.progress.send_replace(TransactionProgress::idle());
	}

	fn publish(
		&self,
		token: &CancellationToken,
		tx_hash: Option<&str>,
		state: TransactionState,
		message: String,
	) -> bool {
		let Ok(_active) = self.active.lock() else {
			return false;
		};
		if token.is_cancelled() {
			return false;
		}
		let tx_hash = tx_hash
			.map(str::to_string)
			.or_else(|| self.progress.borrow().tx_hash.clone());
		debug!("Transaction state {:?}: {}", state, message);
		self.progress.send_replace(TransactionProgress {
			tx_hash,
			state,
			message,
		});
		true
	}

	/// Poll `tx_hash` to a verdict and, on success, wait for the balance to reflect it.
	pub async fn track(
		&self,
		tx_hash: &str,
		baseline: Option<BalanceSnapshot>,
		token: CancellationToken,
	) -> TrackOutcome {
		let mut machine = StatusMachine::new(&self.timings);
		let mut verdict = None;

		for attempt in 1..=self.timings.max_status_polls {
			if !self.pause(&token, self.timings.status_poll_interval).await {
				return TrackOutcome::Cancelled;
			}
			let poll = tokio::select! {
				_ = token.cancelled() => return TrackOutcome::Cancelled,
				poll = self.poll_status(tx_hash) => poll,
			};
			let Some(poll) = poll else {
				continue;
			};
			debug!("Status poll {} for {}: {:?}", attempt, tx_hash, poll);

			match machine.observe(poll) {
				Step::Continue { state, message } => {
					if !self.publish(&token, Some(tx_hash), state, message) {
						return TrackOutcome::Cancelled;
					}
				}
				step => {
					verdict = Some(step);
					break;
				}
			}
		}

		let step = verdict.unwrap_or_else(|| machine.timeout());
		let outcome = match step {
			Step::Finish { state, message } => {
				let outcome = match &state {
					TransactionState::Confirmed {
						confirmations,
						verified,
					} => TrackOutcome::Confirmed {
						confirmations: *confirmations,
						verified: *verified,
					},
					TransactionState::Failed { reason } => TrackOutcome::Failed {
						reason: reason.clone(),
					},
					_ => TrackOutcome::Unresolved,
				};
				if !self.publish(&token, Some(tx_hash), state, message) {
					return TrackOutcome::Cancelled;
				}
				outcome
			}
			Step::GiveUp { message } => {
				let state = self.progress.borrow().state.clone();
				if !self.publish(&token, Some(tx_hash), state, message) {
					return TrackOutcome::Cancelled;
				}
				warn!("Gave up tracking {}: {}", tx_hash, TIMED_OUT);
				return TrackOutcome::Unresolved;
			}
			Step::Continue { .. } => TrackOutcome::Unresolved,
		};

		match &outcome {
			TrackOutcome::Confirmed { .. } => {
				info!("Transaction {} confirmed, watching balance", tx_hash);
				if !self.await_balance_change(baseline, &token).await {
					return TrackOutcome::Cancelled;
				}
			}
			TrackOutcome::Failed { reason } => warn!("Transaction {} failed: {}", tx_hash, reason),
			_ => {}
		}
		outcome
	}

	/// Sleep unless cancelled first; returns false on cancellation.
	async fn pause(&self, token: &CancellationToken, duration: std::time::Duration) -> bool {
		tokio::select! {
			_ = token.cancelled() => false,
			_ = tokio::time::sleep(duration) => true,
		}
	}

	/// `None` when the query itself failed; that poll is not counted either way.
	async fn poll_status(&self, tx_hash: &str) -> Option<PollResult> {
		let found = match self.client.get_transaction(tx_hash).await {
			Ok(found) => found,
			Err(e) => {
				warn!("Status query for {} failed: {}", tx_hash, e);
				return None;
			}
		};
		let Some(found) = found else {
			return Some(PollResult::Unknown);
		};

		let status = found.tx_status;
		Some(match status.status {
			TxStatusKind::Unknown => PollResult::Unknown,
			TxStatusKind::Pending => PollResult::Pending,
			TxStatusKind::Proposed => PollResult::Proposed,
			TxStatusKind::Rejected => PollResult::Rejected {
				reason: status
					.reason
					.unwrap_or_else(|| "rejected by the node".to_string()),
			},
			TxStatusKind::Committed => PollResult::Committed {
				confirmations: self.confirmation_depth(status.block_hash.as_deref()).await,
			},
		})
	}

	/// Depth of the committing block, or the required count when it cannot be determined.
	async fn confirmation_depth(&self, block_hash: Option<&str>) -> u64 {
		let fallback = self.timings.required_confirmations;
		let Some(block_hash) = block_hash else {
			return fallback;
		};
		let header = match self.client.get_header(block_hash).await {
			Ok(Some(header)) => header,
			_ => return fallback,
		};
		match self.client.get_tip_header().await {
			Ok(tip) => crate::balance::confirmations(tip.number, header.number),
			Err(_) => fallback,
		}
	}

	/// Refresh the balance until it moves away from `baseline`, then once more on timeout.
	async fn await_balance_change(
		&self,
		baseline: Option<BalanceSnapshot>,
		token: &CancellationToken,
	) -> bool {
		let baseline_capacity = baseline.map(|b| b.capacity);

		for attempt in 1..=self.timings.max_balance_polls {
			if !self.pause(token, self.timings.balance_poll_interval).await {
				return false;
			}
			match self.reconciler.refresh_balance().await {
				Ok(snapshot) => {
					let changed = match baseline_capacity {
						Some(before) => snapshot.capacity != before,
						None => snapshot.capacity > 0,
					};
					if changed {
						info!(
							"Balance updated to {} after {} poll(s)",
							snapshot.capacity, attempt
						);
						return true;
					}
				}
				Err(e) => warn!("Balance poll {} failed: {}", attempt, e),
			}
		}

		if token.is_cancelled() {
			return false;
		}
		if let Err(e) = self.reconciler.refresh_balance().await {
			warn!("Final balance refresh failed: {}", e);
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{AccountConfig, Network};
	use crate::light_client::OutPoint;
	use crate::persistence::PersistencePort;
	use crate::sync::ScriptRegistrar;
	use crate::testing::{
		MemoryPreferenceStore, MockLightClient, cell, hash, header, status, wallet_script,
	};
	use std::collections::VecDeque;
	use std::time::Duration;

	fn timings() -> EngineTimings {
		EngineTimings::default()
	}

	fn tracker(client: Arc<MockLightClient>) -> Arc<TransactionStatusTracker> {
		let store: Arc<dyn PersistencePort> = Arc::new(MemoryPreferenceStore::default());
		let registrar = Arc::new(ScriptRegistrar::new(
			client.clone(),
			store,
			Network::Testnet,
			wallet_script(),
		));
		let reconciler = Arc::new(BalanceReconciler::new(
			client.clone(),
			registrar,
			AccountConfig {
				address: "ckt1qwallet".to_string(),
				lock_script: wallet_script(),
			},
		));
		Arc::new(TransactionStatusTracker::new(client, reconciler, timings()))
	}

	fn baseline(capacity: u64) -> Option<BalanceSnapshot> {
		Some(BalanceSnapshot {
			address: "ckt1qwallet".to_string(),
			capacity,
			as_of_block: 0,
			source: crate::balance::BalanceSource::Live,
		})
	}

	#[test]
	fn unknown_streak_confirms_optimistically() {
		let mut machine = StatusMachine::new(&timings());
		let mut finished = None;
		for i in 1..=21 {
			if let Step::Finish { state, .. } = machine.observe(PollResult::Unknown) {
				finished = Some((i, state));
				break;
			}
		}
		let (at, state) = finished.unwrap();
		assert_eq!(at, 20);
		assert_eq!(machine.unknown_streak(), 20);
		assert_eq!(
			state,
			TransactionState::Confirmed {
				confirmations: 1,
				verified: false
			}
		);
	}

	#[test]
	fn known_status_resets_unknown_streak() {
		let mut machine = StatusMachine::new(&timings());
		for _ in 0..19 {
			machine.observe(PollResult::Unknown);
		}
		machine.observe(PollResult::Pending);
		assert_eq!(machine.unknown_streak(), 0);
		assert!(matches!(
			machine.observe(PollResult::Unknown),
			Step::Continue { .. }
		));
	}

	#[test]
	fn confirmations_below_threshold_keep_polling() {
		let mut machine = StatusMachine::new(&timings());
		match machine.observe(PollResult::Committed { confirmations: 2 }) {
			Step::Continue { message, .. } => assert_eq!(message, "Confirming (2 of 3)"),
			other => panic!("unexpected {other:?}"),
		}
		assert!(matches!(
			machine.observe(PollResult::Committed { confirmations: 3 }),
			Step::Finish {
				state: TransactionState::Confirmed {
					confirmations: 3,
					verified: true
				},
				..
			}
		));
	}

	#[test]
	fn timeout_verdict_depends_on_unknown_streak() {
		let mut machine = StatusMachine::new(&timings());
		for _ in 0..10 {
			machine.observe(PollResult::Unknown);
		}
		assert!(matches!(machine.timeout(), Step::Finish { .. }));

		machine.observe(PollResult::Proposed);
		for _ in 0..9 {
			machine.observe(PollResult::Unknown);
		}
		assert_eq!(
			machine.timeout(),
			Step::GiveUp {
				message: TIMED_OUT.to_string()
			}
		);
	}

	#[tokio::test(start_paused = true)]
	async fn twenty_unknown_polls_confirm_then_watch_balance() {
		let client = Arc::new(MockLightClient::with_tip(100));
		client.state().cells = vec![cell(OutPoint::new(hash(1), 0), 7_000_000_000, 90)];
		let tracker = tracker(client.clone());
		let token = tracker.begin_send();
		tracker.mark_pending(&token, &hash(0xee));

		let outcome = tracker.track(&hash(0xee), baseline(10_000_000_000), token).await;

		assert_eq!(
			outcome,
			TrackOutcome::Confirmed {
				confirmations: 1,
				verified: false
			}
		);
		assert_eq!(client.calls_to("get_transaction"), 20);
		assert_eq!(client.calls_to("get_cells_capacity"), 1);
		assert_eq!(
			tracker.current().state,
			TransactionState::Confirmed {
				confirmations: 1,
				verified: false
			}
		);
	}

	#[tokio::test(start_paused = true)]
	async fn committed_status_uses_block_depth() {
		let client = Arc::new(MockLightClient::with_tip(110));
		{
			let mut state = client.state();
			state.status_queue = VecDeque::from([
				Some(status(TxStatusKind::Pending, None)),
				Some(status(TxStatusKind::Proposed, None)),
			]);
			state.status_fallback = Some(status(TxStatusKind::Committed, Some(hash(0x42))));
			state.headers.insert(hash(0x42), header(100));
		}
		let tracker = tracker(client.clone());
		let token = tracker.begin_send();

		let outcome = tracker.track(&hash(0xee), None, token).await;

		assert_eq!(
			outcome,
			TrackOutcome::Confirmed {
				confirmations: 11,
				verified: true
			}
		);
		assert_eq!(client.calls_to("get_transaction"), 3);
		// empty balance never changes: 30 polls plus the final refresh
		assert_eq!(client.calls_to("get_cells_capacity"), 31);
	}

	#[tokio::test(start_paused = true)]
	async fn rejected_status_fails() {
		let client = Arc::new(MockLightClient::default());
		let mut rejected = status(TxStatusKind::Rejected, None);
		rejected.tx_status.reason = Some("Resolve failed Dead".to_string());
		client.state().status_fallback = Some(rejected);
		let tracker = tracker(client.clone());
		let token = tracker.begin_send();

		let outcome = tracker.track(&hash(0xee), None, token).await;

		assert_eq!(
			outcome,
			TrackOutcome::Failed {
				reason: "Resolve failed Dead".to_string()
			}
		);
		assert!(tracker.current().state.is_terminal());
		assert_eq!(client.calls_to("get_cells_capacity"), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn pending_forever_times_out_unresolved() {
		let client = Arc::new(MockLightClient::default());
		client.state().status_fallback = Some(status(TxStatusKind::Pending, None));
		let tracker = tracker(client.clone());
		let token = tracker.begin_send();

		let started = tokio::time::Instant::now();
		let outcome = tracker.track(&hash(0xee), None, token).await;

		assert_eq!(outcome, TrackOutcome::Unresolved);
		assert_eq!(started.elapsed(), Duration::from_secs(360));
		let current = tracker.current();
		assert_eq!(current.state, TransactionState::Pending);
		assert_eq!(current.message, TIMED_OUT);
	}

	#[tokio::test(start_paused = true)]
	async fn network_change_cancels_polling_and_fails_send() {
		let client = Arc::new(MockLightClient::default());
		client.state().status_fallback = Some(status(TxStatusKind::Pending, None));
		let tracker = tracker(client.clone());
		let token = tracker.begin_send();
		tracker.mark_pending(&token, &hash(0xee));

		let handle = tokio::spawn({
			let tracker = tracker.clone();
			async move { tracker.track(&hash(0xee), None, token).await }
		});
		tokio::time::sleep(Duration::from_secs(10)).await;
		tracker.cancel_for_network_change();

		assert_eq!(handle.await.unwrap(), TrackOutcome::Cancelled);
		let current = tracker.current();
		assert_eq!(
			current.state,
			TransactionState::Failed {
				reason: NETWORK_CHANGED.to_string()
			}
		);
		assert_eq!(current.tx_hash, Some(hash(0xee)));

		let polls = client.calls_to("get_transaction");
		tokio::time::sleep(Duration::from_secs(30)).await;
		assert_eq!(client.calls_to("get_transaction"), polls);
	}

	#[tokio::test]
	async fn clear_returns_to_idle() {
		let tracker = tracker(Arc::new(MockLightClient::default()));
		let token = tracker.begin_send();
		tracker.mark_failed(&token, "pool is full".to_string());
		assert!(tracker.current().state.is_terminal());

		tracker.clear();

		assert_eq!(tracker.current(), TransactionProgress::idle());
		assert!(token.is_cancelled());
		// stale writes after a clear are dropped
		tracker.mark_pending(&token, &hash(1));
		assert_eq!(tracker.current().state, TransactionState::Idle);
	}
}
