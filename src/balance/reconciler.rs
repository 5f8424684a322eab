use super::ledger::{
	TransactionRecord, build_record, earliest_block, group_rows, page_outputs,
	partition_cells, spent_outpoints, total_capacity, unresolved_inputs,
};
use crate::config::{AccountConfig, SELF_HEAL_RESCAN_MARGIN};
use crate::error::WalletSyncError;
use crate::light_client::{
	CellObject, CellOutput, LightClientError, LightClientPort, Order, OutPoint, SearchKey,
	TxWithCell,
};
use crate::sync::ScriptRegistrar;

use futures::future::join_all;
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Page size for the bounded scans behind balance reconciliation.
const RECONCILE_PAGE: u32 = 100;
const MAX_PAGE: u32 = 100;
const DEFAULT_CELLS_PAGE: u32 = 20;
const DEFAULT_TRANSACTIONS_PAGE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceSource {
	/// Recomputed from live cells.
	Live,
	/// The indexer's aggregate, used when cells or transactions could not be fetched.
	Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
	pub address: String,
	pub capacity: u64,
	pub as_of_block: u64,
	pub source: BalanceSource,
}

/// One page of a cursor-paginated view. `next_cursor` is set only when the page was full.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
	pub items: Vec<T>,
	pub next_cursor: Option<String>,
}

/// Computes the wallet's live balance, cells and transaction history.
pub struct BalanceReconciler {
	client: Arc<dyn LightClientPort>,
	registrar: Arc<ScriptRegistrar>,
	account: AccountConfig,
	snapshot: watch::Sender<Option<BalanceSnapshot>>,
}

impl BalanceReconciler {
	pub fn new(
		client: Arc<dyn LightClientPort>,
		registrar: Arc<ScriptRegistrar>,
		account: AccountConfig,
	) -> Self {
		let (snapshot, _) = watch::channel(None);
		Self {
			client,
			registrar,
			account,
			snapshot,
		}
	}

	fn search_key(&self) -> SearchKey {
		SearchKey::lock(self.account.lock_script.clone())
	}

	/// Recompute the live balance and publish it.
	///
	/// When no live cell is found but transactions exist, the indexer most likely has not
	/// scanned the block holding the change cell yet; the script is re-registered shortly before
	/// the earliest known transaction so the next refresh picks it up.
	pub async fn refresh_balance(&self) -> Result<BalanceSnapshot, WalletSyncError> {
		let key = self.search_key();

		let aggregate = match self.client.get_cells_capacity(&key).await {
			Ok(capacity) => Some(capacity),
			Err(e) => {
				warn!("Aggregate capacity query failed: {}", e);
				None
			}
		};

		let scanned = self.scan_live_cells(&key).await;

		let snapshot = match scanned {
			Ok((live, rows)) => {
				let capacity = total_capacity(&live);
				debug!(
					"Live balance {} from {} cell(s), {} transaction row(s)",
					capacity,
					live.len(),
					rows.len()
				);
				if capacity == 0 && !rows.is_empty() {
					self.self_heal(&rows).await;
				}
				let as_of_block = match &aggregate {
					Some(a) => a.block_number,
					None => self.tip_or_zero().await,
				};
				BalanceSnapshot {
					address: self.account.address.clone(),
					capacity,
					as_of_block,
					source: BalanceSource::Live,
				}
			}
			Err(e) => {
				let Some(aggregate) = aggregate else {
					return Err(e.into());
				};
				warn!(
					"Falling back to aggregate capacity {} after query failure: {}",
					aggregate.capacity, e
				);
				BalanceSnapshot {
					address: self.account.address.clone(),
					capacity: aggregate.capacity,
					as_of_block: aggregate.block_number,
					source: BalanceSource::Aggregate,
				}
			}
		};

		self.snapshot.send_replace(Some(snapshot.clone()));
		Ok(snapshot)
	}

	/// Live cells plus the transaction rows used to filter them.
	async fn scan_live_cells(
		&self,
		key: &SearchKey,
	) -> Result<(Vec<CellObject>, Vec<TxWithCell>), LightClientError> {
		let rows = self
			.client
			.get_transactions(key, Order::Desc, RECONCILE_PAGE, None)
			.await?
			.objects;
		let cells = self
			.client
			.get_cells(key, Order::Desc, RECONCILE_PAGE, None)
			.await?
			.objects;

		let (live, _) = partition_cells(cells, &spent_outpoints(&rows));
		Ok((live, rows))
	}

	async fn self_heal(&self, rows: &[TxWithCell]) {
		let Some(earliest) = earliest_block(rows) else {
			return;
		};
		let rescan_from = earliest.saturating_sub(SELF_HEAL_RESCAN_MARGIN);
		info!(
			"No live cells despite {} transaction row(s), rescanning from block {}",
			rows.len(),
			rescan_from
		);
		if let Err(e) = self.registrar.rescan_from(rescan_from).await {
			warn!("Self-heal rescan from {} failed: {}", rescan_from, e);
		}
	}

	async fn tip_or_zero(&self) -> u64 {
		match self.client.get_tip_header().await {
			Ok(header) => header.number,
			Err(e) => {
				debug!("Tip unavailable for snapshot: {}", e);
				0
			}
		}
	}

	pub fn current_balance(&self) -> Option<BalanceSnapshot> {
		self.snapshot.borrow().clone()
	}

	pub fn subscribe_balance(&self) -> watch::Receiver<Option<BalanceSnapshot>> {
		self.snapshot.subscribe()
	}

	/// Live cells, oldest first.
	pub async fn get_cells(
		&self,
		limit: Option<u32>,
		cursor: Option<String>,
	) -> Result<Page<CellObject>, WalletSyncError> {
		let limit = limit.unwrap_or(DEFAULT_CELLS_PAGE).clamp(1, MAX_PAGE);
		let rows = self
			.client
			.get_transactions(&self.search_key(), Order::Desc, RECONCILE_PAGE, None)
			.await?
			.objects;
		let page = self
			.client
			.get_cells(&self.search_key().with_data(true), Order::Asc, limit, cursor)
			.await?;

		let full = page.objects.len() == limit as usize;
		let (live, spent) = partition_cells(page.objects, &spent_outpoints(&rows));
		if !spent.is_empty() {
			debug!("Filtered {} spent cell(s) from page", spent.len());
		}

		Ok(Page {
			items: live,
			next_cursor: full.then_some(page.last_cursor),
		})
	}

	/// Transactions touching the wallet script, newest first.
	pub async fn get_transactions(
		&self,
		limit: Option<u32>,
		cursor: Option<String>,
	) -> Result<Page<TransactionRecord>, WalletSyncError> {
		let limit = limit.unwrap_or(DEFAULT_TRANSACTIONS_PAGE).clamp(1, MAX_PAGE);
		let key = self.search_key();

		let page = self
			.client
			.get_transactions(&key, Order::Desc, limit, cursor)
			.await?;
		let tip = self.client.get_tip_header().await?.number;
		let full = page.objects.len() == limit as usize;

		let groups = group_rows(&page.objects);
		let mut resolved = page_outputs(&page.objects);
		let missing = unresolved_inputs(&groups, &resolved);
		resolved.extend(self.resolve_previous_outputs(&missing).await);

		let script = &self.account.lock_script;
		let mut records = Vec::with_capacity(groups.len());
		for group in &groups {
			let mut record = build_record(group, script, tip, &resolved);
			self.attach_block_info(&mut record).await;
			records.push(record);
		}

		debug!(
			"Built {} transaction record(s) from {} row(s)",
			records.len(),
			page.objects.len()
		);
		Ok(Page {
			items: records,
			next_cursor: full.then_some(page.last_cursor),
		})
	}

	/// Fetch the transactions that created `out_points`. Failures leave them unresolved.
	async fn resolve_previous_outputs(
		&self,
		out_points: &[OutPoint],
	) -> HashMap<OutPoint, CellOutput> {
		let by_tx = out_points.iter().into_group_map_by(|op| op.tx_hash.clone());

		let fetched = join_all(by_tx.keys().map(|tx_hash| async move {
			let result = self.client.get_transaction(tx_hash).await;
			(tx_hash.clone(), result)
		}))
		.await;

		let mut resolved = HashMap::new();
		for (tx_hash, result) in fetched {
			let outputs = match result {
				Ok(Some(found)) => match found.transaction {
					Some(wrapper) => wrapper.view().inner.outputs.clone(),
					None => continue,
				},
				Ok(None) => continue,
				Err(e) => {
					debug!("Previous transaction {} unavailable: {}", tx_hash, e);
					continue;
				}
			};
			for out_point in by_tx.get(&tx_hash).into_iter().flatten() {
				if let Some(output) = outputs.get(out_point.index as usize) {
					resolved.insert((*out_point).clone(), output.clone());
				}
			}
		}
		resolved
	}

	/// Fill in block hash and timestamp; best effort.
	async fn attach_block_info(&self, record: &mut TransactionRecord) {
		let block_hash = match self.client.get_transaction(&record.tx_hash).await {
			Ok(Some(found)) => found.tx_status.block_hash,
			_ => None,
		};
		let Some(block_hash) = block_hash else {
			return;
		};
		if let Ok(Some(header)) = self.client.get_header(&block_hash).await {
			record.block_timestamp = Some(header.timestamp);
		}
		record.block_hash = Some(block_hash);
	}
}
