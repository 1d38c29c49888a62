//! Batch store.
//!
//! The store owns the ledger checkpoint, the identity index (batch id to batch) and the
//! value index (sortable batch value to batch id). Every chain event goes through
//! [`Store::update`], which settles the ledger up to the event's block, applies the
//! event and persists the checkpoint as one critical section.
//!
//! - `keys`: record key layout for both indexes.
//! - `state`: the persisted ledger checkpoint and the settlement step.
//! - `store`: the store itself and its apply transaction.
//! - `sync`: the dispatcher that drives the store from a [`Listener`](crate::postage::Listener).
//! - `progress`: counters and periodic progress logging for a sync session.

/// Record key layout
pub mod keys;
/// Sync session progress tracking
pub mod progress;
/// Ledger checkpoint
pub mod state;
/// Batch store and apply transaction
pub mod store;
/// Event dispatcher and sync lifecycle
pub mod sync;

pub use progress::{SyncProgressTracker, SyncStats};
pub use state::LedgerState;
pub use store::Store;
pub use sync::{SyncConfig, SyncError, SyncHandle};

use crate::storage::StorageError;

/// Errors raised while applying events to the batch store.
#[derive(Debug, thiserror::Error)]
pub enum BatchStoreError {
	#[error("batch {} not found", hex::encode(.0))]
	NotFound(Vec<u8>),

	#[error("invalid batch: {0}")]
	InvalidBatch(String),

	#[error("storage failure: {0}")]
	StorageFailure(#[from] StorageError),

	#[error("event at block {block} is older than checkpoint block {checkpoint}")]
	OutOfOrder { block: u64, checkpoint: u64 },

	#[error("batch index corrupted: {0}")]
	Corrupted(String),

	#[error("arithmetic overflow computing {0}")]
	Overflow(&'static str),

	#[error("batch store lock poisoned")]
	LockPoisoned,
}
