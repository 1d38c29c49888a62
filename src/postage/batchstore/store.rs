use crate::postage::batchstore::keys::{
	BATCH_KEY_PREFIX, VALUE_KEY_PREFIX, batch_key, parse_value_key, value_key,
};
use crate::postage::batchstore::{BatchStoreError, LedgerState};
use crate::postage::events::{BatchUpdater, Event};
use crate::postage::types::Batch;
use crate::storage::{StateStore, StateStoreExt, StorageError};

use primitive_types::U256;
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// Local store of postage batches kept in sync with the chain.
///
/// `storage` doubles as the apply lock: holding its guard is what makes settlement,
/// mutation and persistence of one event a single critical section. The committed
/// checkpoint sits behind its own lock so readers never wait on an apply and never see
/// a half-updated `block`/`total` pair.
pub struct Store<S> {
	storage: Mutex<S>,
	checkpoint: RwLock<LedgerState>,
}

impl<S: StateStore> Store<S> {
	/// Open the store, restoring the checkpoint from `storage` or starting from zero.
	pub fn new(storage: S) -> Result<Self, BatchStoreError> {
		let state = LedgerState::load(&storage)?;
		Ok(Self {
			storage: Mutex::new(storage),
			checkpoint: RwLock::new(state),
		})
	}

	/// Snapshot of the last committed checkpoint.
	pub fn checkpoint(&self) -> Result<LedgerState, BatchStoreError> {
		self.checkpoint
			.read()
			.map(|state| state.clone())
			.map_err(|_| BatchStoreError::LockPoisoned)
	}

	/// Block the next subscription should start from.
	///
	/// A ledger that has applied something resumes right after its checkpoint block. A
	/// fresh ledger starts at `start_block`, typically the contract deployment block.
	pub fn resume_from(&self, start_block: u64) -> Result<u64, BatchStoreError> {
		let state = self.checkpoint()?;
		if state.is_genesis() {
			return Ok(start_block);
		}
		Ok(state.block.saturating_add(1).max(start_block))
	}

	/// Apply one chain event emitted at `block`.
	///
	/// Settles the ledger up to `block`, applies the event and saves the checkpoint. The
	/// work happens on a copy of the checkpoint that is only committed once the save
	/// succeeded, so a failed event leaves the checkpoint where it was.
	pub fn update(&self, block: u64, event: Event) -> Result<(), BatchStoreError> {
		let mut storage = self.lock_storage()?;
		let mut next = self.checkpoint()?;

		next.settle(block)?;
		let kind = event.kind();
		event.apply(&mut Transition {
			storage: &mut *storage,
			state: &mut next,
		})?;
		next.applied = true;
		next.save(&mut *storage)?;

		debug!(
			"Applied {} at block {} (total {}, price {})",
			kind, block, next.total, next.price
		);
		let mut committed = self
			.checkpoint
			.write()
			.map_err(|_| BatchStoreError::LockPoisoned)?;
		*committed = next;
		Ok(())
	}

	/// Look up a batch by id.
	pub fn get(&self, id: &[u8]) -> Result<Batch, BatchStoreError> {
		let storage = self.lock_storage()?;
		get_batch(&*storage, id)
	}

	pub fn exists(&self, id: &[u8]) -> Result<bool, BatchStoreError> {
		match self.get(id) {
			Ok(_) => Ok(true),
			Err(BatchStoreError::NotFound(_)) => Ok(false),
			Err(e) => Err(e),
		}
	}

	/// Visit batches from the lowest value up. `f` returns `true` to stop.
	///
	/// Fails with [`BatchStoreError::Corrupted`] on an index entry whose batch is missing or
	/// holds a different value.
	pub fn iterate_by_value<F>(&self, mut f: F) -> Result<(), BatchStoreError>
	where
		F: FnMut(&Batch) -> bool,
	{
		let storage = self.lock_storage()?;
		let mut corrupted = None;
		storage.iterate(VALUE_KEY_PREFIX, &mut |key, _| {
			match indexed_batch(&*storage, key)? {
				Ok(batch) => Ok(f(&batch)),
				Err(reason) => {
					corrupted = Some(reason);
					Ok(true)
				}
			}
		})?;
		match corrupted {
			Some(reason) => Err(BatchStoreError::Corrupted(reason)),
			None => Ok(()),
		}
	}

	/// Batch with the lowest value, the first candidate for expiry.
	pub fn lowest_value(&self) -> Result<Option<Batch>, BatchStoreError> {
		let mut lowest = None;
		self.iterate_by_value(|batch| {
			lowest = Some(batch.clone());
			true
		})?;
		Ok(lowest)
	}

	/// Batch with the highest value.
	pub fn highest_value(&self) -> Result<Option<Batch>, BatchStoreError> {
		let mut highest = None;
		self.iterate_by_value(|batch| {
			highest = Some(batch.clone());
			false
		})?;
		Ok(highest)
	}

	/// Value index as `(value, batch id)` pairs in key order, checked against the batches.
	pub fn value_index(&self) -> Result<Vec<(U256, Vec<u8>)>, BatchStoreError> {
		let mut entries = Vec::new();
		self.iterate_by_value(|batch| {
			entries.push((batch.value, batch.id.clone()));
			false
		})?;
		Ok(entries)
	}

	/// All batches in identity index order.
	pub fn batches(&self) -> Result<Vec<Batch>, BatchStoreError> {
		let storage = self.lock_storage()?;
		let mut batches = Vec::new();
		storage.iterate(BATCH_KEY_PREFIX, &mut |_, value| {
			batches.push(bincode::deserialize::<Batch>(value)?);
			Ok(false)
		})?;
		Ok(batches)
	}

	/// Close the underlying storage. Only call once no sync loop is running.
	pub fn close(&self) -> Result<(), BatchStoreError> {
		let mut storage = self.lock_storage()?;
		storage.close()?;
		info!("Batch store closed");
		Ok(())
	}

	fn lock_storage(&self) -> Result<MutexGuard<'_, S>, BatchStoreError> {
		self.storage
			.lock()
			.map_err(|_| BatchStoreError::LockPoisoned)
	}
}

fn get_batch<S: StateStore + ?Sized>(storage: &S, id: &[u8]) -> Result<Batch, BatchStoreError> {
	match storage.get::<Batch>(&batch_key(id)) {
		Ok(batch) => Ok(batch),
		Err(StorageError::NotFound) => Err(BatchStoreError::NotFound(id.to_vec())),
		Err(e) => Err(e.into()),
	}
}

/// Resolve a value index key to its batch.
///
/// The inner `Err` describes an entry that does not match the identity index.
fn indexed_batch<S: StateStore + ?Sized>(
	storage: &S,
	key: &[u8],
) -> Result<Result<Batch, String>, StorageError> {
	let Some((value, id)) = parse_value_key(key) else {
		return Ok(Err(format!("malformed value index key {}", hex::encode(key))));
	};
	match storage.get::<Batch>(&batch_key(id)) {
		Ok(batch) if batch.value == value => Ok(Ok(batch)),
		Ok(batch) => Ok(Err(format!(
			"value index entry {} for batch {} does not match batch value {}",
			value,
			hex::encode(id),
			batch.value
		))),
		Err(StorageError::NotFound) => Ok(Err(format!(
			"value index entry points at missing batch {}",
			hex::encode(id)
		))),
		Err(e) => Err(e),
	}
}

/// Apply transaction for a single event.
///
/// Borrows the locked storage and the working copy of the checkpoint. A new value index
/// entry is written before the batch record and the superseded one is removed after it,
/// so a failed write leaves at most an entry that disagrees with its batch record. Value
/// queries report such an entry as corruption until the event is applied again.
struct Transition<'a, S: ?Sized> {
	storage: &'a mut S,
	state: &'a mut LedgerState,
}

impl<S: StateStore + ?Sized> Transition<'_, S> {
	/// Normalized balance after adding `amount`.
	///
	/// A new batch starts from the ledger's cumulative outpayment, an existing one from its
	/// current value.
	fn balance(&self, current: Option<&U256>, amount: U256) -> Result<U256, BatchStoreError> {
		let base = current.unwrap_or(&self.state.total);
		base.checked_add(amount)
			.ok_or(BatchStoreError::Overflow("batch value"))
	}

	fn index(&mut self, id: &[u8], value: &U256) -> Result<(), StorageError> {
		self.storage.put(&value_key(value, id), id)
	}

	fn unindex(&mut self, id: &[u8], value: &U256) -> Result<(), StorageError> {
		self.storage.delete(&value_key(value, id))
	}

	fn put(&mut self, batch: &Batch) -> Result<(), StorageError> {
		self.storage.put(&batch_key(&batch.id), batch)
	}
}

impl<S: StateStore + ?Sized> BatchUpdater for Transition<'_, S> {
	fn create(
		&mut self,
		id: Vec<u8>,
		owner: Vec<u8>,
		amount: U256,
		depth: u8,
	) -> Result<(), BatchStoreError> {
		if id.is_empty() {
			return Err(BatchStoreError::InvalidBatch("empty batch id".to_string()));
		}
		match get_batch(&*self.storage, &id) {
			Ok(_) => {
				return Err(BatchStoreError::InvalidBatch(format!(
					"batch {} already exists",
					hex::encode(&id)
				)));
			}
			Err(BatchStoreError::NotFound(_)) => {}
			Err(e) => return Err(e),
		}

		let value = self.balance(None, amount)?;
		let batch = Batch {
			id,
			owner,
			depth,
			start: self.state.block,
			value,
		};
		self.index(&batch.id, &batch.value)?;
		self.put(&batch)?;
		debug!(
			"Created batch {} at block {} with depth {} and value {}",
			hex::encode(&batch.id),
			batch.start,
			batch.depth,
			batch.value
		);
		Ok(())
	}

	fn top_up(&mut self, id: &[u8], amount: U256) -> Result<(), BatchStoreError> {
		let mut batch = get_batch(&*self.storage, id)?;
		let old = batch.value;
		batch.value = self.balance(Some(&old), amount)?;
		self.index(id, &batch.value)?;
		self.put(&batch)?;
		if old != batch.value {
			self.unindex(id, &old)?;
		}
		debug!(
			"Topped up batch {} by {} to value {}",
			hex::encode(id),
			amount,
			batch.value
		);
		Ok(())
	}

	fn update_depth(&mut self, id: &[u8], depth: u8) -> Result<(), BatchStoreError> {
		let mut batch = get_batch(&*self.storage, id)?;
		batch.depth = depth;
		self.put(&batch)?;
		debug!("Batch {} depth set to {}", hex::encode(id), depth);
		Ok(())
	}

	fn update_price(&mut self, price: U256) -> Result<(), BatchStoreError> {
		self.state.price = price;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::{IterFn, MemoryStateStore};
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};

	fn create(id: &str, owner: &str, amount: u64, depth: u8) -> Event {
		Event::Create {
			id: id.as_bytes().to_vec(),
			owner: owner.as_bytes().to_vec(),
			amount: U256::from(amount),
			depth,
		}
	}

	fn top_up(id: &str, amount: u64) -> Event {
		Event::TopUp {
			id: id.as_bytes().to_vec(),
			amount: U256::from(amount),
		}
	}

	fn price(price: u64) -> Event {
		Event::UpdatePrice {
			price: U256::from(price),
		}
	}

	/// Every batch has exactly one value index entry and every entry has a batch.
	fn assert_index_consistent<S: StateStore>(store: &Store<S>) {
		let batches = store.batches().unwrap();
		let index = store.value_index().unwrap();
		assert_eq!(batches.len(), index.len());
		for batch in &batches {
			let entries: Vec<_> = index.iter().filter(|(_, id)| *id == batch.id).collect();
			assert_eq!(entries.len(), 1, "batch {:?}", batch.id);
			assert_eq!(entries[0].0, batch.value);
		}
	}

	/// Memory store whose writes under `prefix` can be made to fail.
	struct FlakyStore {
		inner: MemoryStateStore,
		prefix: &'static [u8],
		fail_puts: Arc<AtomicBool>,
	}

	impl FlakyStore {
		fn new(prefix: &'static [u8]) -> (Self, Arc<AtomicBool>) {
			let fail_puts = Arc::new(AtomicBool::new(false));
			let store = Self {
				inner: MemoryStateStore::new(),
				prefix,
				fail_puts: fail_puts.clone(),
			};
			(store, fail_puts)
		}
	}

	impl StateStore for FlakyStore {
		fn get_raw(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
			self.inner.get_raw(key)
		}

		fn put_raw(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
			if self.fail_puts.load(Ordering::SeqCst) && key.starts_with(self.prefix) {
				return Err(StorageError::Io(std::io::Error::other("disk full")));
			}
			self.inner.put_raw(key, value)
		}

		fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
			self.inner.delete(key)
		}

		fn iterate(&self, prefix: &[u8], f: &mut IterFn<'_>) -> Result<(), StorageError> {
			self.inner.iterate(prefix, f)
		}

		fn close(&mut self) -> Result<(), StorageError> {
			self.inner.close()
		}
	}

	#[test]
	fn test_create_at_zero_price() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(10, create("b1", "o1", 100, 2)).unwrap();

		let batch = store.get(b"b1").unwrap();
		assert_eq!(batch.owner, b"o1".to_vec());
		assert_eq!(batch.depth, 2);
		assert_eq!(batch.start, 10);
		assert_eq!(batch.value, U256::from(100));

		let index = store.value_index().unwrap();
		assert_eq!(index, vec![(U256::from(100), b"b1".to_vec())]);
		assert_eq!(store.checkpoint().unwrap().block, 10);
	}

	#[test]
	fn test_price_settlement_and_top_up_moves_index_entry() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(10, create("b1", "o1", 100, 2)).unwrap();
		store.update(10, price(5)).unwrap();
		store.update(20, top_up("b1", 50)).unwrap();

		let state = store.checkpoint().unwrap();
		assert_eq!(state.block, 20);
		assert_eq!(state.price, U256::from(5));
		assert_eq!(state.total, U256::from(50));

		let batch = store.get(b"b1").unwrap();
		assert_eq!(batch.value, U256::from(150));
		assert_eq!(
			store.value_index().unwrap(),
			vec![(U256::from(150), b"b1".to_vec())]
		);
	}

	#[test]
	fn test_top_up_unknown_batch() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(5, create("b1", "o1", 10, 1)).unwrap();
		let before = store.checkpoint().unwrap();

		let err = store.update(6, top_up("unknown-id", 10)).unwrap_err();
		assert!(matches!(err, BatchStoreError::NotFound(ref id) if id == b"unknown-id"));
		assert_eq!(store.value_index().unwrap().len(), 1);
		assert_eq!(store.checkpoint().unwrap(), before);
	}

	#[test]
	fn test_duplicate_create_is_rejected() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(1, create("b1", "o1", 100, 2)).unwrap();
		let original = store.get(b"b1").unwrap();

		let err = store.update(2, create("b1", "o2", 999, 8)).unwrap_err();
		assert!(matches!(err, BatchStoreError::InvalidBatch(_)));
		assert_eq!(store.get(b"b1").unwrap(), original);
		assert_index_consistent(&store);
	}

	#[test]
	fn test_empty_id_is_invalid() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		let err = store.update(1, create("", "o1", 1, 1)).unwrap_err();
		assert!(matches!(err, BatchStoreError::InvalidBatch(_)));
	}

	#[test]
	fn test_out_of_order_block_is_rejected() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(20, price(1)).unwrap();
		let err = store.update(19, price(2)).unwrap_err();
		assert!(matches!(
			err,
			BatchStoreError::OutOfOrder {
				block: 19,
				checkpoint: 20
			}
		));
		let state = store.checkpoint().unwrap();
		assert_eq!(state.block, 20);
		assert_eq!(state.price, U256::from(1));
	}

	#[test]
	fn test_update_depth_keeps_value_index() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(1, create("b1", "o1", 100, 2)).unwrap();
		store
			.update(
				2,
				Event::UpdateDepth {
					id: b"b1".to_vec(),
					depth: 5,
				},
			)
			.unwrap();
		let batch = store.get(b"b1").unwrap();
		assert_eq!(batch.depth, 5);
		assert_eq!(batch.capacity(), U256::from(32));
		assert_eq!(
			store.value_index().unwrap(),
			vec![(U256::from(100), b"b1".to_vec())]
		);

		let err = store
			.update(
				3,
				Event::UpdateDepth {
					id: b"nope".to_vec(),
					depth: 5,
				},
			)
			.unwrap_err();
		assert!(matches!(err, BatchStoreError::NotFound(_)));
	}

	#[test]
	fn test_new_batches_start_at_cumulative_total() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(0, price(3)).unwrap();
		store.update(10, create("late", "o", 7, 1)).unwrap();
		// 3 * 10 accrued before the batch existed
		assert_eq!(store.get(b"late").unwrap().value, U256::from(37));
	}

	#[test]
	fn test_value_index_orders_batches() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(1, create("mid", "o", 50, 1)).unwrap();
		store.update(1, create("low", "o", 10, 1)).unwrap();
		store.update(1, create("high", "o", 90, 1)).unwrap();
		store.update(1, create("tie", "o", 50, 1)).unwrap();
		store.update(2, top_up("low", 100)).unwrap();

		let mut order = Vec::new();
		store
			.iterate_by_value(|batch| {
				order.push(String::from_utf8(batch.id.clone()).unwrap());
				false
			})
			.unwrap();
		assert_eq!(order, vec!["mid", "tie", "high", "low"]);

		assert_eq!(store.lowest_value().unwrap().unwrap().id, b"mid".to_vec());
		assert_eq!(store.highest_value().unwrap().unwrap().id, b"low".to_vec());
		assert_index_consistent(&store);
	}

	#[test]
	fn test_value_index_stays_consistent_over_many_top_ups() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		for i in 0..10u64 {
			store
				.update(i, create(&format!("b{}", i), "o", i * 3, 4))
				.unwrap();
		}
		for round in 0..5u64 {
			for i in 0..10u64 {
				store
					.update(10 + round, top_up(&format!("b{}", i), (i + round) % 4))
					.unwrap();
			}
		}
		assert_index_consistent(&store);
	}

	#[test]
	fn test_empty_store_queries() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		assert!(store.lowest_value().unwrap().is_none());
		assert!(store.highest_value().unwrap().is_none());
		assert!(!store.exists(b"b1").unwrap());
		assert_eq!(store.resume_from(100).unwrap(), 100);
	}

	#[test]
	fn test_reload_restores_checkpoint_and_resume_height() {
		let mut backing = MemoryStateStore::new();
		let saved = {
			let store = Store::new(MemoryStateStore::new()).unwrap();
			store.update(10, create("b1", "o1", 100, 2)).unwrap();
			store.update(12, price(4)).unwrap();
			store.update(15, top_up("b1", 1)).unwrap();
			let state = store.checkpoint().unwrap();
			state.save(&mut backing).unwrap();
			state
		};

		let reopened = Store::new(backing).unwrap();
		assert_eq!(reopened.checkpoint().unwrap(), saved);
		assert_eq!(reopened.resume_from(0).unwrap(), saved.block + 1);
		assert_eq!(reopened.resume_from(1000).unwrap(), 1000);
	}

	#[test]
	fn test_failed_persistence_does_not_advance_checkpoint() {
		let (flaky, fail_puts) = FlakyStore::new(b"");
		let store = Store::new(flaky).unwrap();
		store.update(10, price(2)).unwrap();

		fail_puts.store(true, Ordering::SeqCst);
		let err = store.update(20, create("b1", "o1", 5, 1)).unwrap_err();
		assert!(matches!(err, BatchStoreError::StorageFailure(_)));
		let state = store.checkpoint().unwrap();
		assert_eq!(state.block, 10);
		assert_eq!(state.total, U256::zero());

		// redelivery from the same height succeeds once storage recovers
		fail_puts.store(false, Ordering::SeqCst);
		store.update(20, create("b1", "o1", 5, 1)).unwrap();
		let state = store.checkpoint().unwrap();
		assert_eq!(state.block, 20);
		assert_eq!(state.total, U256::from(20));
		assert_eq!(store.get(b"b1").unwrap().value, U256::from(25));
		assert_index_consistent(&store);
	}

	#[test]
	fn test_failed_batch_write_during_top_up_is_detected_and_repaired() {
		let (flaky, fail_puts) = FlakyStore::new(BATCH_KEY_PREFIX);
		let store = Store::new(flaky).unwrap();
		store.update(10, create("b1", "o1", 100, 2)).unwrap();

		fail_puts.store(true, Ordering::SeqCst);
		let err = store.update(10, top_up("b1", 50)).unwrap_err();
		assert!(matches!(err, BatchStoreError::StorageFailure(_)));

		// the batch record still holds the old value; the new index entry disagrees with it
		assert_eq!(store.get(b"b1").unwrap().value, U256::from(100));
		assert!(matches!(
			store.value_index(),
			Err(BatchStoreError::Corrupted(_))
		));
		assert!(matches!(
			store.highest_value(),
			Err(BatchStoreError::Corrupted(_))
		));
		assert!(matches!(
			store.iterate_by_value(|_| false),
			Err(BatchStoreError::Corrupted(_))
		));

		fail_puts.store(false, Ordering::SeqCst);
		store.update(10, top_up("b1", 50)).unwrap();
		assert_eq!(store.get(b"b1").unwrap().value, U256::from(150));
		assert_eq!(
			store.value_index().unwrap(),
			vec![(U256::from(150), b"b1".to_vec())]
		);
		assert_index_consistent(&store);
	}

	#[test]
	fn test_index_entry_without_batch_is_corruption() {
		let (flaky, fail_puts) = FlakyStore::new(BATCH_KEY_PREFIX);
		let store = Store::new(flaky).unwrap();

		fail_puts.store(true, Ordering::SeqCst);
		let err = store.update(3, create("b1", "o1", 100, 2)).unwrap_err();
		assert!(matches!(err, BatchStoreError::StorageFailure(_)));
		assert!(!store.exists(b"b1").unwrap());
		assert!(store.batches().unwrap().is_empty());
		match store.lowest_value() {
			Err(BatchStoreError::Corrupted(reason)) => assert!(reason.contains("missing batch")),
			other => panic!("expected corruption, got {:?}", other),
		}

		fail_puts.store(false, Ordering::SeqCst);
		store.update(3, create("b1", "o1", 100, 2)).unwrap();
		assert_eq!(store.lowest_value().unwrap().unwrap().id, b"b1".to_vec());
		assert_index_consistent(&store);
	}

	#[test]
	fn test_events_at_block_zero_count_as_applied() {
		let mut backing = MemoryStateStore::new();
		{
			let store = Store::new(MemoryStateStore::new()).unwrap();
			store.update(0, create("b1", "o1", 100, 2)).unwrap();
			let state = store.checkpoint().unwrap();
			assert_eq!(state.block, 0);
			assert!(!state.is_genesis());
			assert_eq!(store.resume_from(0).unwrap(), 1);
			state.save(&mut backing).unwrap();
		}

		let reopened = Store::new(backing).unwrap();
		assert!(!reopened.checkpoint().unwrap().is_genesis());
		assert_eq!(reopened.resume_from(0).unwrap(), 1);

		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.update(0, price(0)).unwrap();
		assert_eq!(store.checkpoint().unwrap().price, U256::zero());
		assert_eq!(store.resume_from(0).unwrap(), 1);
	}

	#[test]
	fn test_closed_store_fails_updates() {
		let store = Store::new(MemoryStateStore::new()).unwrap();
		store.close().unwrap();
		let err = store.update(1, price(1)).unwrap_err();
		assert!(matches!(
			err,
			BatchStoreError::StorageFailure(StorageError::Closed)
		));
	}
}
