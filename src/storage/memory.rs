use super::{IterFn, StateStore, StorageError};
use std::collections::BTreeMap;
use std::ops::Bound;

/// In-memory state store backed by an ordered map.
///
/// Used by tests and for ephemeral runs that replay a log dump without keeping state.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
	data: BTreeMap<Vec<u8>, Vec<u8>>,
	closed: bool,
}

impl MemoryStateStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn ensure_open(&self) -> Result<(), StorageError> {
		if self.closed {
			return Err(StorageError::Closed);
		}
		Ok(())
	}
}

impl StateStore for MemoryStateStore {
	fn get_raw(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
		self.ensure_open()?;
		self.data.get(key).cloned().ok_or(StorageError::NotFound)
	}

	fn put_raw(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
		self.ensure_open()?;
		self.data.insert(key.to_vec(), value);
		Ok(())
	}

	fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
		self.ensure_open()?;
		self.data.remove(key);
		Ok(())
	}

	fn iterate(&self, prefix: &[u8], f: &mut IterFn<'_>) -> Result<(), StorageError> {
		self.ensure_open()?;
		let range = self
			.data
			.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded));
		for (key, value) in range {
			if !key.starts_with(prefix) {
				break;
			}
			if f(key, value)? {
				break;
			}
		}
		Ok(())
	}

	fn close(&mut self) -> Result<(), StorageError> {
		self.closed = true;
		Ok(())
	}
}
