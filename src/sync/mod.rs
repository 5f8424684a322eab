//! Wallet script registration and account sync status.

mod coordinator;
mod progress;
mod registrar;

pub use coordinator::{Registration, StartSource, SyncCoordinator, resolve_start_block};
pub use progress::{AccountStatus, SyncProgressLog, is_synced, sync_progress};
pub use registrar::ScriptRegistrar;
