//! Pure reconciliation over raw light client query results.
//!
//! The indexer's aggregate capacity counts cells it has not yet seen spent, so the live balance
//! is recomputed here: a cell is live unless its outpoint appears among the inputs of a
//! transaction touching the wallet script.

use crate::light_client::{CellObject, CellOutput, IoType, OutPoint, Script, TxWithCell};

use itertools::Itertools;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Every input outpoint of the given transactions.
pub fn spent_outpoints(rows: &[TxWithCell]) -> HashSet<OutPoint> {
	rows.iter()
		.unique_by(|row| row.tx_hash().to_lowercase())
		.flat_map(|row| row.transaction.inner.inputs.iter())
		.map(|input| input.previous_output.normalized())
		.collect()
}

/// Split cells into `(live, spent)`.
pub fn partition_cells(
	cells: Vec<CellObject>,
	spent: &HashSet<OutPoint>,
) -> (Vec<CellObject>, Vec<CellObject>) {
	cells
		.into_iter()
		.partition(|cell| !spent.contains(&cell.out_point.normalized()))
}

pub fn total_capacity(cells: &[CellObject]) -> u64 {
	cells
		.iter()
		.fold(0u64, |sum, cell| sum.saturating_add(cell.output.capacity))
}

/// Lowest block any of the rows was committed in.
pub fn earliest_block(rows: &[TxWithCell]) -> Option<u64> {
	rows.iter().map(|row| row.block_number).min()
}

/// Effect of a transaction on the wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	In,
	Out,
	/// Net zero, e.g. consolidating own cells.
	#[serde(rename = "self")]
	SelfTransfer,
}

impl Direction {
	fn of(net: i128) -> Self {
		match net {
			n if n > 0 => Direction::In,
			n if n < 0 => Direction::Out,
			_ => Direction::SelfTransfer,
		}
	}
}

/// A transaction as seen by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
	pub tx_hash: String,
	pub block_number: u64,
	pub block_hash: Option<String>,
	/// Block timestamp in milliseconds.
	pub block_timestamp: Option<u64>,
	/// Shannons received minus shannons spent by the wallet script.
	pub balance_change: i128,
	pub direction: Direction,
	/// Zero unless every input's capacity could be resolved.
	pub fee: u64,
	pub confirmations: u64,
}

/// `tip - block + 1`, or zero for a block past the tip.
pub fn confirmations(tip: u64, block_number: u64) -> u64 {
	if tip >= block_number {
		tip - block_number + 1
	} else {
		0
	}
}

/// One transaction's rows from an ungrouped `get_transactions` page.
#[derive(Debug, Clone)]
pub struct TxGroup<'a> {
	pub row: &'a TxWithCell,
	/// Input indices the indexer attributed to the wallet script.
	pub own_inputs: HashSet<u32>,
}

/// Group rows by transaction hash, keeping first-seen order.
pub fn group_rows(rows: &[TxWithCell]) -> Vec<TxGroup<'_>> {
	let mut groups: Vec<TxGroup<'_>> = Vec::new();
	let mut index: HashMap<String, usize> = HashMap::new();

	for row in rows {
		let key = row.tx_hash().to_lowercase();
		let slot = *index.entry(key).or_insert_with(|| {
			groups.push(TxGroup {
				row,
				own_inputs: HashSet::new(),
			});
			groups.len() - 1
		});
		if row.io_type == IoType::Input {
			groups[slot].own_inputs.insert(row.io_index);
		}
	}
	groups
}

/// Outputs created by the page's transactions, keyed by outpoint.
pub fn page_outputs(rows: &[TxWithCell]) -> HashMap<OutPoint, CellOutput> {
	rows.iter()
		.unique_by(|row| row.tx_hash().to_lowercase())
		.flat_map(|row| {
			let hash = row.tx_hash();
			row.transaction
				.inner
				.outputs
				.iter()
				.enumerate()
				.map(move |(i, output)| (OutPoint::new(hash, i as u32), output.clone()))
		})
		.collect()
}

/// Inputs of the grouped transactions whose previous output is not in `known`.
pub fn unresolved_inputs(
	groups: &[TxGroup<'_>],
	known: &HashMap<OutPoint, CellOutput>,
) -> Vec<OutPoint> {
	groups
		.iter()
		.flat_map(|group| group.row.transaction.inner.inputs.iter())
		.map(|input| input.previous_output.normalized())
		.filter(|out_point| !known.contains_key(out_point))
		.unique()
		.collect()
}

/// Net effect, direction and fee of one transaction.
///
/// `resolved` maps previous outpoints to the outputs they refer to. An input counts as the
/// wallet's when the indexer attributed it or its resolved lock is the wallet script.
pub fn build_record(
	group: &TxGroup<'_>,
	script: &Script,
	tip: u64,
	resolved: &HashMap<OutPoint, CellOutput>,
) -> TransactionRecord {
	let tx = &group.row.transaction.inner;

	let outputs_total: u64 = tx.outputs.iter().map(|o| o.capacity).sum();
	let received: u64 = tx
		.outputs
		.iter()
		.filter(|o| o.lock.matches(script))
		.map(|o| o.capacity)
		.sum();

	let mut spent: u64 = 0;
	let mut inputs_total: u64 = 0;
	let mut all_resolved = true;
	for (i, input) in tx.inputs.iter().enumerate() {
		match resolved.get(&input.previous_output.normalized()) {
			Some(previous) => {
				inputs_total += previous.capacity;
				if group.own_inputs.contains(&(i as u32)) || previous.lock.matches(script) {
					spent += previous.capacity;
				}
			}
			None => all_resolved = false,
		}
	}

	let fee = if all_resolved && !tx.inputs.is_empty() {
		inputs_total.saturating_sub(outputs_total)
	} else {
		0
	};
	let net = received as i128 - spent as i128;

	TransactionRecord {
		tx_hash: group.row.tx_hash().to_string(),
		block_number: group.row.block_number,
		block_hash: None,
		block_timestamp: None,
		balance_change: net,
		direction: Direction::of(net),
		fee,
		confirmations: confirmations(tip, group.row.block_number),
	}
}
