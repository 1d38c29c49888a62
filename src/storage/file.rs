use super::{IterFn, StateStore, StorageError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Record files carry this suffix; temp files written during a put do not.
const RECORD_SUFFIX: &str = ".bin";
const TEMP_SUFFIX: &str = ".tmp";
/// Hex doubles the key length and most filesystems cap names at 255 bytes.
const MAX_KEY_LEN: usize = 120;

/// File-backed state store keeping one file per key under a data directory.
///
/// File names are the lowercase hex encoding of the key, so sorting names sorts keys.
/// Every put goes through a temp file that is synced and then renamed over the record,
/// which gives single-key atomicity. The directory is synced after each rename or unlink.
pub struct FileStateStore {
	data_dir: PathBuf,
	closed: bool,
}

impl FileStateStore {
	/// Open (creating if needed) a store rooted at `data_dir`.
	pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let data_dir = data_dir.into();
		fs::create_dir_all(&data_dir)?;
		info!("Opened state store at {:?}", data_dir);
		Ok(Self {
			data_dir,
			closed: false,
		})
	}

	fn record_path(&self, key: &[u8]) -> Result<PathBuf, StorageError> {
		if key.len() > MAX_KEY_LEN {
			return Err(StorageError::KeyTooLong(key.len()));
		}
		Ok(self
			.data_dir
			.join(format!("{}{}", hex::encode(key), RECORD_SUFFIX)))
	}

	fn ensure_open(&self) -> Result<(), StorageError> {
		if self.closed {
			return Err(StorageError::Closed);
		}
		Ok(())
	}
}

impl StateStore for FileStateStore {
	fn get_raw(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
		self.ensure_open()?;
		let path = self.record_path(key)?;
		match fs::read(&path) {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(e.into()),
		}
	}

	fn put_raw(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
		self.ensure_open()?;
		let path = self.record_path(key)?;
		let temp_path = self
			.data_dir
			.join(format!(".{}{}", hex::encode(key), TEMP_SUFFIX));

		let mut file = fs::File::create(&temp_path)?;
		file.write_all(&value)?;
		file.sync_all()?;
		fs::rename(&temp_path, &path)?;
		sync_dir(&self.data_dir)?;
		debug!("Wrote {} bytes to {:?}", value.len(), path);
		Ok(())
	}

	fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
		self.ensure_open()?;
		let path = self.record_path(key)?;
		match fs::remove_file(&path) {
			Ok(()) => sync_dir(&self.data_dir),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	fn iterate(&self, prefix: &[u8], f: &mut IterFn<'_>) -> Result<(), StorageError> {
		self.ensure_open()?;
		let hex_prefix = hex::encode(prefix);

		let mut names = Vec::new();
		for entry in fs::read_dir(&self.data_dir)? {
			let entry = entry?;
			let file_name = entry.file_name();
			let Some(name) = file_name.to_str() else {
				continue;
			};
			if let Some(stem) = name.strip_suffix(RECORD_SUFFIX) {
				if stem.starts_with(&hex_prefix) {
					names.push(stem.to_string());
				}
			}
		}
		names.sort();

		for stem in names {
			let Ok(key) = hex::decode(&stem) else {
				continue;
			};
			let value = match fs::read(self.data_dir.join(format!("{}{}", stem, RECORD_SUFFIX))) {
				Ok(value) => value,
				// deleted between listing and reading
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
				Err(e) => return Err(e.into()),
			};
			if f(&key, &value)? {
				break;
			}
		}
		Ok(())
	}

	fn close(&mut self) -> Result<(), StorageError> {
		if !self.closed {
			self.closed = true;
			info!("Closed state store at {:?}", self.data_dir);
		}
		Ok(())
	}
}

/// Flush directory entries so a rename or unlink survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StorageError> {
	fs::File::open(dir)?.sync_all()?;
	Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StorageError> {
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::StateStoreExt;

	#[test]
	fn test_values_survive_reopen() {
		let dir = tempfile::tempdir().unwrap();
		{
			let mut store = FileStateStore::open(dir.path()).unwrap();
			store.put(b"checkpoint", &42u64).unwrap();
			store.close().unwrap();
		}
		let store = FileStateStore::open(dir.path()).unwrap();
		let value: u64 = store.get(b"checkpoint").unwrap();
		assert_eq!(value, 42);
	}

	#[test]
	fn test_missing_and_deleted_keys() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = FileStateStore::open(dir.path()).unwrap();
		assert!(matches!(store.get_raw(b"k"), Err(StorageError::NotFound)));

		store.put_raw(b"k", vec![1, 2, 3]).unwrap();
		store.delete(b"k").unwrap();
		assert!(matches!(store.get_raw(b"k"), Err(StorageError::NotFound)));
		// deleting again is fine
		store.delete(b"k").unwrap();
	}

	#[test]
	fn test_iterate_sorted_by_key_bytes() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = FileStateStore::open(dir.path()).unwrap();
		store.put_raw(&[b'v', 0xff], vec![3]).unwrap();
		store.put_raw(&[b'v', 0x00], vec![1]).unwrap();
		store.put_raw(&[b'v', 0x0a], vec![2]).unwrap();
		store.put_raw(b"other", vec![9]).unwrap();

		let mut seen = Vec::new();
		store
			.iterate(b"v", &mut |_, value| {
				seen.push(value[0]);
				Ok(false)
			})
			.unwrap();
		assert_eq!(seen, vec![1, 2, 3]);
	}

	#[test]
	fn test_overwrite_leaves_only_the_record() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = FileStateStore::open(dir.path()).unwrap();
		store.put_raw(b"k", vec![1]).unwrap();
		store.put_raw(b"k", vec![2]).unwrap();
		assert_eq!(store.get_raw(b"k").unwrap(), vec![2]);
		sync_dir(dir.path()).unwrap();

		let names: Vec<String> = fs::read_dir(dir.path())
			.unwrap()
			.map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!(names, vec![format!("{}{}", hex::encode(b"k"), RECORD_SUFFIX)]);
	}

	#[test]
	fn test_rejects_oversized_keys() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = FileStateStore::open(dir.path()).unwrap();
		let key = vec![0u8; MAX_KEY_LEN + 1];
		assert!(matches!(
			store.put_raw(&key, vec![]),
			Err(StorageError::KeyTooLong(_))
		));
	}
}
