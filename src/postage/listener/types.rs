//! Raw contract log as delivered by `eth_getLogs` and `eth_subscribe("logs")`.

use crate::postage::types::Address;
use primitive_types::H256;
use serde::{Deserialize, Serialize};

/// A raw contract log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
	/// Emitting contract.
	pub address: Address,
	/// Indexed topics; the first is the event signature hash.
	pub topics: Vec<H256>,
	/// ABI-encoded non-indexed arguments.
	#[serde(with = "hex_bytes")]
	pub data: Vec<u8>,
	#[serde(with = "quantity")]
	pub block_number: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transaction_hash: Option<H256>,
	/// Set when the log was dropped by a chain reorganization.
	#[serde(default)]
	pub removed: bool,
}

/// Parse a JSON-RPC hex quantity such as `"0x1b4"`.
pub fn parse_quantity(value: &str) -> Result<u64, String> {
	let digits = value
		.strip_prefix("0x")
		.ok_or_else(|| format!("quantity {:?} is missing the 0x prefix", value))?;
	u64::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {:?}: {}", value, e))
}

/// Format a JSON-RPC hex quantity.
pub fn format_quantity(value: u64) -> String {
	format!("0x{:x}", value)
}

mod quantity {
	use serde::{Deserialize, Deserializer, Serializer, de};

	pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&super::format_quantity(*value))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
		let value = String::deserialize(deserializer)?;
		super::parse_quantity(&value).map_err(de::Error::custom)
	}
}

mod hex_bytes {
	use serde::{Deserialize, Deserializer, Serializer, de};

	pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format!("0x{}", hex::encode(value)))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let value = String::deserialize(deserializer)?;
		let digits = value.strip_prefix("0x").unwrap_or(&value);
		hex::decode(digits).map_err(de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_deserialize_rpc_log() {
		let json = r#"{
			"address": "0x1111111111111111111111111111111111111111",
			"topics": ["0x2222222222222222222222222222222222222222222222222222222222222222"],
			"data": "0x00ff",
			"blockNumber": "0x1b4",
			"transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
			"logIndex": "0x0",
			"removed": false
		}"#;
		let log: Log = serde_json::from_str(json).unwrap();
		assert_eq!(log.address, Address::repeat_byte(0x11));
		assert_eq!(log.topics, vec![H256::repeat_byte(0x22)]);
		assert_eq!(log.data, vec![0x00, 0xff]);
		assert_eq!(log.block_number, 436);
		assert_eq!(log.transaction_hash, Some(H256::repeat_byte(0x33)));
		assert!(!log.removed);
	}

	#[test]
	fn test_removed_defaults_to_false() {
		let json = r#"{"address":"0x1111111111111111111111111111111111111111","topics":[],"data":"0x","blockNumber":"0x1"}"#;
		let log: Log = serde_json::from_str(json).unwrap();
		assert!(!log.removed);
		assert!(log.data.is_empty());
	}

	#[test]
	fn test_quantity_parsing() {
		assert_eq!(parse_quantity("0x0"), Ok(0));
		assert_eq!(parse_quantity("0xff"), Ok(255));
		assert!(parse_quantity("ff").is_err());
		assert!(parse_quantity("0xzz").is_err());
		assert_eq!(format_quantity(255), "0xff");
	}
}
