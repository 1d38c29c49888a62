//! Types shared by the postage listener and batch store.

use crate::postage::events::Event;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Contract address the listener filters logs on.
pub type Address = primitive_types::H160;

/// A prepaid storage-capacity grant.
///
/// `value` is the normalized balance committed to the batch. It is measured on the same
/// clock as the ledger's cumulative outpayment, so a batch is used up once the ledger
/// total reaches its value. Deciding what to do with such batches is left to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
	/// Batch identifier, unique and immutable.
	pub id: Vec<u8>,
	/// Account that paid for the batch.
	pub owner: Vec<u8>,
	/// Capacity is `2^depth` chunks.
	pub depth: u8,
	/// Block at which the batch was created.
	pub start: u64,
	/// Normalized balance, the value index key.
	pub value: U256,
}

impl Batch {
	/// Number of chunks the batch can stamp.
	pub fn capacity(&self) -> U256 {
		U256::one() << self.depth
	}
}

/// An event together with the block that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
	pub block: u64,
	pub event: Event,
}
