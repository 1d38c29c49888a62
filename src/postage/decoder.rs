//! Postage contract log decoding.
//!
//! The postage contract emits four events. The batch id is the single indexed argument;
//! everything else is ABI-encoded in the log data as 32-byte words:
//!
//! ```text
//! BatchCreated(bytes32 indexed batchId, uint256 amount, address owner, uint8 depth)
//! BatchTopUp(bytes32 indexed batchId, uint256 amount)
//! BatchDepthIncrease(bytes32 indexed batchId, uint8 depth)
//! PriceUpdate(uint256 price)
//! ```
//!
//! Amounts are per chunk.

use crate::postage::events::Event;
use crate::postage::listener::Log;
use crate::postage::types::Address;

use primitive_types::{H256, U256};
use sha3::{Digest, Keccak256};
use std::sync::LazyLock;

const WORD: usize = 32;
const ADDRESS_LEN: usize = 20;

const BATCH_CREATED: &str = "BatchCreated(bytes32,uint256,address,uint8)";
const BATCH_TOP_UP: &str = "BatchTopUp(bytes32,uint256)";
const BATCH_DEPTH_INCREASE: &str = "BatchDepthIncrease(bytes32,uint8)";
const PRICE_UPDATE: &str = "PriceUpdate(uint256)";

/// Topic hashes of the postage contract events.
struct Topics {
	batch_created: H256,
	batch_top_up: H256,
	batch_depth_increase: H256,
	price_update: H256,
}

static TOPICS: LazyLock<Topics> = LazyLock::new(|| Topics {
	batch_created: event_topic(BATCH_CREATED),
	batch_top_up: event_topic(BATCH_TOP_UP),
	batch_depth_increase: event_topic(BATCH_DEPTH_INCREASE),
	price_update: event_topic(PRICE_UPDATE),
});

/// Errors decoding a postage contract log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
	#[error("log has no topics")]
	MissingTopic,

	#[error("unknown event topic {0:?}")]
	UnknownEvent(H256),

	#[error("{event} log is missing the indexed batch id")]
	MissingBatchId { event: &'static str },

	#[error("{event} log data is {actual} bytes, expected {expected}")]
	DataLength {
		event: &'static str,
		expected: usize,
		actual: usize,
	},

	#[error("{event} field {field} is out of range")]
	OutOfRange {
		event: &'static str,
		field: &'static str,
	},
}

/// Keccak-256 hash of an event signature, the log's first topic.
pub fn event_topic(signature: &str) -> H256 {
	H256::from_slice(&Keccak256::digest(signature.as_bytes()))
}

/// Decode a raw postage contract log into an [`Event`].
pub fn decode_log(log: &Log) -> Result<Event, DecodeError> {
	let topic = *log.topics.first().ok_or(DecodeError::MissingTopic)?;
	let topics = &*TOPICS;

	if topic == topics.batch_created {
		let event = "BatchCreated";
		let id = batch_id(event, log)?;
		let words = words(event, &log.data, 3)?;
		Ok(Event::Create {
			id,
			amount: U256::from_big_endian(words[0]),
			owner: address(event, "owner", words[1])?,
			depth: small(event, "depth", words[2])?,
		})
	} else if topic == topics.batch_top_up {
		let event = "BatchTopUp";
		let id = batch_id(event, log)?;
		let words = words(event, &log.data, 1)?;
		Ok(Event::TopUp {
			id,
			amount: U256::from_big_endian(words[0]),
		})
	} else if topic == topics.batch_depth_increase {
		let event = "BatchDepthIncrease";
		let id = batch_id(event, log)?;
		let words = words(event, &log.data, 1)?;
		Ok(Event::UpdateDepth {
			id,
			depth: small(event, "depth", words[0])?,
		})
	} else if topic == topics.price_update {
		let words = words("PriceUpdate", &log.data, 1)?;
		Ok(Event::UpdatePrice {
			price: U256::from_big_endian(words[0]),
		})
	} else {
		Err(DecodeError::UnknownEvent(topic))
	}
}

/// Encode `event` as the log the postage contract at `address` would emit in `block`.
///
/// Batch ids must be 32 bytes and owners 20 bytes, as on chain.
pub fn encode_log(event: &Event, block: u64, address: Address) -> Result<Log, DecodeError> {
	let known = &*TOPICS;
	let (topics, data) = match event {
		Event::Create {
			id,
			owner,
			amount,
			depth,
		} => {
			let name = "BatchCreated";
			let mut data = uint_word(amount).to_vec();
			data.extend_from_slice(&address_word(name, owner)?);
			data.extend_from_slice(&uint_word(&U256::from(*depth)));
			(vec![known.batch_created, id_topic(name, id)?], data)
		}
		Event::TopUp { id, amount } => (
			vec![known.batch_top_up, id_topic("BatchTopUp", id)?],
			uint_word(amount).to_vec(),
		),
		Event::UpdateDepth { id, depth } => (
			vec![
				known.batch_depth_increase,
				id_topic("BatchDepthIncrease", id)?,
			],
			uint_word(&U256::from(*depth)).to_vec(),
		),
		Event::UpdatePrice { price } => (vec![known.price_update], uint_word(price).to_vec()),
	};
	Ok(Log {
		address,
		topics,
		data,
		block_number: block,
		transaction_hash: None,
		removed: false,
	})
}

fn batch_id(event: &'static str, log: &Log) -> Result<Vec<u8>, DecodeError> {
	log.topics
		.get(1)
		.map(|topic| topic.as_bytes().to_vec())
		.ok_or(DecodeError::MissingBatchId { event })
}

fn words<'a>(event: &'static str, data: &'a [u8], count: usize) -> Result<Vec<&'a [u8]>, DecodeError> {
	if data.len() != count * WORD {
		return Err(DecodeError::DataLength {
			event,
			expected: count * WORD,
			actual: data.len(),
		});
	}
	Ok(data.chunks_exact(WORD).collect())
}

fn small(event: &'static str, field: &'static str, word: &[u8]) -> Result<u8, DecodeError> {
	let (high, low) = word.split_at(WORD - 1);
	if high.iter().any(|b| *b != 0) {
		return Err(DecodeError::OutOfRange { event, field });
	}
	Ok(low[0])
}

fn address(event: &'static str, field: &'static str, word: &[u8]) -> Result<Vec<u8>, DecodeError> {
	let (padding, address) = word.split_at(WORD - ADDRESS_LEN);
	if padding.iter().any(|b| *b != 0) {
		return Err(DecodeError::OutOfRange { event, field });
	}
	Ok(address.to_vec())
}

fn uint_word(value: &U256) -> [u8; WORD] {
	let mut word = [0u8; WORD];
	value.to_big_endian(&mut word);
	word
}

fn address_word(event: &'static str, owner: &[u8]) -> Result<[u8; WORD], DecodeError> {
	if owner.len() != ADDRESS_LEN {
		return Err(DecodeError::OutOfRange {
			event,
			field: "owner",
		});
	}
	let mut word = [0u8; WORD];
	word[WORD - ADDRESS_LEN..].copy_from_slice(owner);
	Ok(word)
}

fn id_topic(event: &'static str, id: &[u8]) -> Result<H256, DecodeError> {
	if id.len() != WORD {
		return Err(DecodeError::OutOfRange {
			event,
			field: "batchId",
		});
	}
	Ok(H256::from_slice(id))
}
