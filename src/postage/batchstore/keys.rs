//! Record key layout.
//!
//! - `batchKeyPrefix ++ id` holds the bincode-encoded [`Batch`](crate::postage::Batch).
//! - `valueKeyPrefix ++ be32(value) ++ id` holds the batch id. The value is 32 bytes
//!   big-endian, so key order is numeric value order and a prefix scan walks batches from
//!   the lowest value up. The id suffix keeps batches with equal value apart.
//! - [`STATE_KEY`] holds the ledger checkpoint.

use primitive_types::U256;

pub const BATCH_KEY_PREFIX: &[u8] = b"batchKeyPrefix";
pub const VALUE_KEY_PREFIX: &[u8] = b"valueKeyPrefix";
pub const STATE_KEY: &[u8] = b"postage_state";

const VALUE_LEN: usize = 32;

/// Key of the identity index record for `id`.
pub fn batch_key(id: &[u8]) -> Vec<u8> {
	let mut key = Vec::with_capacity(BATCH_KEY_PREFIX.len() + id.len());
	key.extend_from_slice(BATCH_KEY_PREFIX);
	key.extend_from_slice(id);
	key
}

/// Key of the value index record for a batch `id` holding `value`.
pub fn value_key(value: &U256, id: &[u8]) -> Vec<u8> {
	let mut encoded = [0u8; VALUE_LEN];
	value.to_big_endian(&mut encoded);

	let mut key = Vec::with_capacity(VALUE_KEY_PREFIX.len() + VALUE_LEN + id.len());
	key.extend_from_slice(VALUE_KEY_PREFIX);
	key.extend_from_slice(&encoded);
	key.extend_from_slice(id);
	key
}

/// Decode the value and batch id out of a value index key.
pub fn parse_value_key(key: &[u8]) -> Option<(U256, &[u8])> {
	let rest = key.strip_prefix(VALUE_KEY_PREFIX)?;
	if rest.len() < VALUE_LEN {
		return None;
	}
	let (value, id) = rest.split_at(VALUE_LEN);
	Some((U256::from_big_endian(value), id))
}
