//! Ledger checkpoint.
//!
//! The checkpoint is a single record holding the last applied block, the current price and
//! the cumulative normalized outpayment. It is read once when the store opens and written
//! after every applied event. It has no locking of its own; the store's apply lock covers it.

use crate::postage::batchstore::BatchStoreError;
use crate::postage::batchstore::keys::STATE_KEY;
use crate::storage::{StateStore, StateStoreExt, StorageError};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Synchronization checkpoint of the batch ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
	/// Last block whose events have been fully applied.
	pub block: u64,
	/// Price per chunk per block.
	pub price: U256,
	/// Cumulative normalized outpayment.
	pub total: U256,
	/// Set once an event has been applied, even one at block 0.
	pub applied: bool,
}

impl LedgerState {
	/// Load the checkpoint, starting from zero when none was saved yet.
	pub fn load<S: StateStore + ?Sized>(store: &S) -> Result<Self, StorageError> {
		match store.get::<LedgerState>(STATE_KEY) {
			Ok(state) => {
				info!(
					"Restored ledger checkpoint at block {} (price {}, total {})",
					state.block, state.price, state.total
				);
				Ok(state)
			}
			Err(StorageError::NotFound) => {
				info!("No ledger checkpoint found, starting from genesis");
				Ok(Self::default())
			}
			Err(e) => Err(e),
		}
	}

	/// Write the full checkpoint under its single key.
	pub fn save<S: StateStore + ?Sized>(&self, store: &mut S) -> Result<(), StorageError> {
		store.put(STATE_KEY, self)
	}

	/// Whether anything has ever been applied.
	pub fn is_genesis(&self) -> bool {
		!self.applied
	}

	/// Accrue outpayment up to `block`: `total += price * (block - self.block)`.
	///
	/// Several events in the same block settle a zero period, so `total` only depends on
	/// elapsed blocks.
	pub fn settle(&mut self, block: u64) -> Result<(), BatchStoreError> {
		let period = block
			.checked_sub(self.block)
			.ok_or(BatchStoreError::OutOfOrder {
				block,
				checkpoint: self.block,
			})?;
		let accrued = self
			.price
			.checked_mul(U256::from(period))
			.ok_or(BatchStoreError::Overflow("settlement outpayment"))?;
		self.total = self
			.total
			.checked_add(accrued)
			.ok_or(BatchStoreError::Overflow("cumulative outpayment"))?;
		self.block = block;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::MemoryStateStore;

	#[test]
	fn test_load_defaults_when_absent() {
		let store = MemoryStateStore::new();
		let state = LedgerState::load(&store).unwrap();
		assert_eq!(state, LedgerState::default());
		assert!(state.is_genesis());
	}

	#[test]
	fn test_save_then_load_reproduces_triple() {
		let mut store = MemoryStateStore::new();
		let state = LedgerState {
			block: 77,
			price: U256::from(5),
			total: U256::from(12345),
			applied: true,
		};
		state.save(&mut store).unwrap();
		assert_eq!(LedgerState::load(&store).unwrap(), state);
	}

	#[test]
	fn test_load_propagates_storage_errors() {
		let mut store = MemoryStateStore::new();
		store.close().unwrap();
		assert!(matches!(
			LedgerState::load(&store),
			Err(StorageError::Closed)
		));
	}

	#[test]
	fn test_settlement_is_piecewise_linear() {
		let mut state = LedgerState::default();
		state.settle(10).unwrap();
		assert_eq!(state.total, U256::zero());

		state.price = U256::from(5);
		state.settle(20).unwrap();
		state.settle(20).unwrap();
		state.settle(25).unwrap();
		assert_eq!(state.total, U256::from(5 * 15));

		state.price = U256::from(2);
		state.settle(30).unwrap();
		assert_eq!(state.total, U256::from(5 * 15 + 2 * 5));
		assert_eq!(state.block, 30);
	}

	#[test]
	fn test_settlement_rejects_older_blocks() {
		let mut state = LedgerState {
			block: 20,
			price: U256::from(1),
			total: U256::zero(),
			applied: true,
		};
		let err = state.settle(19).unwrap_err();
		assert!(matches!(
			err,
			BatchStoreError::OutOfOrder {
				block: 19,
				checkpoint: 20
			}
		));
		assert_eq!(state.block, 20);
		assert_eq!(state.total, U256::zero());
	}

	#[test]
	fn test_settlement_overflow_is_an_error() {
		let mut state = LedgerState {
			block: 0,
			price: U256::MAX,
			total: U256::zero(),
			applied: true,
		};
		assert!(matches!(
			state.settle(2),
			Err(BatchStoreError::Overflow(_))
		));
	}
}
