//! Key/value persistence substrate for the postage batch store.
//!
//! The store knows nothing about batches. It keeps opaque byte values under byte keys and
//! offers ordered prefix iteration, which the batch store relies on for its value index.
//! Records are encoded with bincode through [`StateStoreExt`].

/// File-per-key persistent store
mod file;
/// Ordered in-memory store
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use serde::{Serialize, de::DeserializeOwned};

/// Errors raised by a [`StateStore`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("key not found")]
	NotFound,

	#[error("state store is closed")]
	Closed,

	#[error("key of {0} bytes exceeds the store limit")]
	KeyTooLong(usize),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("codec error: {0}")]
	Codec(#[from] bincode::Error),
}

/// Callback used by [`StateStore::iterate`]. Returning `Ok(true)` stops the iteration.
pub type IterFn<'a> = dyn FnMut(&[u8], &[u8]) -> Result<bool, StorageError> + 'a;

/// Durable key/value storage consumed by the batch store.
///
/// Only single-key atomicity is assumed. `get` on a missing key must return
/// [`StorageError::NotFound`] so callers can tell absence apart from failure.
pub trait StateStore: Send {
	/// Read the raw value stored under `key`.
	fn get_raw(&self, key: &[u8]) -> Result<Vec<u8>, StorageError>;

	/// Store `value` under `key`, replacing any previous value.
	fn put_raw(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;

	/// Remove `key`. Removing a missing key is not an error.
	fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

	/// Visit every entry whose key starts with `prefix`, in ascending key order.
	fn iterate(&self, prefix: &[u8], f: &mut IterFn<'_>) -> Result<(), StorageError>;

	/// Release the store. Every later call fails with [`StorageError::Closed`].
	fn close(&mut self) -> Result<(), StorageError>;
}

/// Typed access on top of the raw byte interface.
pub trait StateStoreExt: StateStore {
	fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<T, StorageError> {
		let bytes = self.get_raw(key)?;
		Ok(bincode::deserialize(&bytes)?)
	}

	fn put<T: Serialize + ?Sized>(&mut self, key: &[u8], value: &T) -> Result<(), StorageError> {
		let bytes = bincode::serialize(value)?;
		self.put_raw(key, bytes)
	}
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
