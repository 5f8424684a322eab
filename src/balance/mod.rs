//! Live balance reconciliation and wallet history views.

mod ledger;
mod reconciler;

pub use ledger::{Direction, TransactionRecord, confirmations, partition_cells, spent_outpoints};
pub use reconciler::{BalanceReconciler, BalanceSnapshot, BalanceSource, Page};
