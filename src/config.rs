//! Service configuration.
//!
//! Settings come from an optional JSON file; any field may be omitted and falls back to
//! its default. `BATCHSTORE_*` environment variables override individual fields:
//!
//! | variable                         | field                  |
//! |----------------------------------|------------------------|
//! | `BATCHSTORE_DATA_DIR`            | `data_dir`             |
//! | `BATCHSTORE_RPC_URL`             | `rpc_url`              |
//! | `BATCHSTORE_WS_URL`              | `ws_url`               |
//! | `BATCHSTORE_CONTRACT_ADDRESSES`  | `contract_addresses`   |
//! | `BATCHSTORE_START_BLOCK`         | `start_block`          |
//! | `BATCHSTORE_EVENT_BUFFER`        | `event_buffer`         |
//! | `BATCHSTORE_PROGRESS_INTERVAL`   | `progress_interval`    |
//! | `BATCHSTORE_BACKFILL_BLOCK_RANGE`| `backfill_block_range` |
//! | `BATCHSTORE_REPLAY_FILE`         | `replay_file`          |
//!
//! Contract addresses in the environment are comma separated.

use crate::postage::SyncConfig;
use crate::postage::batchstore::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::postage::types::Address;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	Read {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	Parse {
		path: PathBuf,
		source: serde_json::Error,
	},

	#[error("invalid value {value:?} for {key}: {reason}")]
	InvalidValue {
		key: &'static str,
		value: String,
		reason: String,
	},

	#[error("{0} must not be empty")]
	Missing(&'static str),
}

/// Runtime settings of the batch store service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
	/// Directory holding the store's records.
	#[serde(default = "Config::default_data_dir")]
	pub data_dir: PathBuf,
	/// HTTP JSON-RPC endpoint used for backfilling.
	#[serde(default = "Config::default_rpc_url")]
	pub rpc_url: String,
	/// WebSocket JSON-RPC endpoint used for live logs.
	#[serde(default = "Config::default_ws_url")]
	pub ws_url: String,
	/// Postage contract addresses to follow.
	#[serde(default)]
	pub contract_addresses: Vec<Address>,
	/// Block a fresh ledger starts syncing from.
	#[serde(default)]
	pub start_block: u64,
	/// Capacity of the listener to dispatcher channel.
	#[serde(default = "Config::default_event_buffer")]
	pub event_buffer: usize,
	/// Blocks between progress log lines.
	#[serde(default = "Config::default_progress_interval")]
	pub progress_interval: u64,
	/// Blocks per `eth_getLogs` request.
	#[serde(default = "Config::default_backfill_block_range")]
	pub backfill_block_range: u64,
	/// Replay logs from this file instead of connecting to a node.
	#[serde(default)]
	pub replay_file: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			data_dir: Self::default_data_dir(),
			rpc_url: Self::default_rpc_url(),
			ws_url: Self::default_ws_url(),
			contract_addresses: Vec::new(),
			start_block: 0,
			event_buffer: Self::default_event_buffer(),
			progress_interval: Self::default_progress_interval(),
			backfill_block_range: Self::default_backfill_block_range(),
			replay_file: None,
		}
	}
}

impl Config {
	fn default_data_dir() -> PathBuf {
		PathBuf::from("state/batchstore")
	}

	fn default_rpc_url() -> String {
		"http://localhost:8545".to_string()
	}

	fn default_ws_url() -> String {
		"ws://localhost:8546".to_string()
	}

	fn default_event_buffer() -> usize {
		1
	}

	fn default_progress_interval() -> u64 {
		DEFAULT_PROGRESS_INTERVAL
	}

	fn default_backfill_block_range() -> u64 {
		crate::postage::listener::DEFAULT_BLOCK_RANGE
	}

	/// Load the configuration from `path` (or defaults) and apply environment overrides.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply_overrides(|key| std::env::var(key).ok())
	}

	/// Parse a JSON config file.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Override fields from `BATCHSTORE_*` variables resolved through `lookup`.
	pub fn apply_overrides(
		mut self,
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<Self, ConfigError> {
		if let Some(value) = lookup("BATCHSTORE_DATA_DIR") {
			self.data_dir = PathBuf::from(value);
		}
		if let Some(value) = lookup("BATCHSTORE_RPC_URL") {
			self.rpc_url = value;
		}
		if let Some(value) = lookup("BATCHSTORE_WS_URL") {
			self.ws_url = value;
		}
		if let Some(value) = lookup("BATCHSTORE_CONTRACT_ADDRESSES") {
			self.contract_addresses = parse_addresses(&value)?;
		}
		if let Some(value) = lookup("BATCHSTORE_START_BLOCK") {
			self.start_block = parse_number("BATCHSTORE_START_BLOCK", &value)?;
		}
		if let Some(value) = lookup("BATCHSTORE_EVENT_BUFFER") {
			self.event_buffer = parse_number("BATCHSTORE_EVENT_BUFFER", &value)?;
		}
		if let Some(value) = lookup("BATCHSTORE_PROGRESS_INTERVAL") {
			self.progress_interval = parse_number("BATCHSTORE_PROGRESS_INTERVAL", &value)?;
		}
		if let Some(value) = lookup("BATCHSTORE_BACKFILL_BLOCK_RANGE") {
			self.backfill_block_range = parse_number("BATCHSTORE_BACKFILL_BLOCK_RANGE", &value)?;
		}
		if let Some(value) = lookup("BATCHSTORE_REPLAY_FILE") {
			self.replay_file = (!value.is_empty()).then(|| PathBuf::from(value));
		}
		self.validate()
	}

	fn validate(mut self) -> Result<Self, ConfigError> {
		if self.data_dir.as_os_str().is_empty() {
			return Err(ConfigError::Missing("data_dir"));
		}
		if self.replay_file.is_none() && (self.rpc_url.is_empty() || self.ws_url.is_empty()) {
			return Err(ConfigError::Missing("rpc_url/ws_url"));
		}
		if self.event_buffer == 0 {
			self.event_buffer = Self::default_event_buffer();
		}
		if self.progress_interval == 0 {
			self.progress_interval = Self::default_progress_interval();
		}
		if self.backfill_block_range == 0 {
			self.backfill_block_range = Self::default_backfill_block_range();
		}
		Ok(self)
	}

	/// Settings of a sync session.
	pub fn sync_config(&self) -> SyncConfig {
		SyncConfig {
			start_block: self.start_block,
			addresses: self.contract_addresses.clone(),
			event_buffer: self.event_buffer,
			progress_interval: self.progress_interval,
		}
	}
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	value
		.trim()
		.parse()
		.map_err(|e: T::Err| ConfigError::InvalidValue {
			key,
			value: value.to_string(),
			reason: e.to_string(),
		})
}

fn parse_addresses(value: &str) -> Result<Vec<Address>, ConfigError> {
	value
		.split(',')
		.map(str::trim)
		.filter(|part| !part.is_empty())
		.map(|part| {
			let invalid = |reason: String| ConfigError::InvalidValue {
				key: "BATCHSTORE_CONTRACT_ADDRESSES",
				value: part.to_string(),
				reason,
			};
			let bytes = hex::decode(part.strip_prefix("0x").unwrap_or(part))
				.map_err(|e| invalid(e.to_string()))?;
			if bytes.len() != Address::len_bytes() {
				return Err(invalid(format!("expected 20 bytes, got {}", bytes.len())));
			}
			Ok(Address::from_slice(&bytes))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::io::Write;

	fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |key| vars.get(key).cloned()
	}

	#[test]
	fn test_defaults() {
		let config = Config::default().apply_overrides(env(&[])).unwrap();
		assert_eq!(config, Config::default());
		assert_eq!(config.event_buffer, 1);
		assert_eq!(config.progress_interval, 1000);
		assert!(config.replay_file.is_none());
	}

	#[test]
	fn test_from_file_with_partial_fields() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{
				"data_dir": "/var/lib/batchstore",
				"contract_addresses": ["0x1111111111111111111111111111111111111111"],
				"start_block": 16000000
			}}"#
		)
		.unwrap();

		let config = Config::from_file(file.path()).unwrap();
		assert_eq!(config.data_dir, PathBuf::from("/var/lib/batchstore"));
		assert_eq!(config.contract_addresses, vec![Address::repeat_byte(0x11)]);
		assert_eq!(config.start_block, 16_000_000);
		assert_eq!(config.rpc_url, "http://localhost:8545");

		let sync = config.sync_config();
		assert_eq!(sync.start_block, 16_000_000);
		assert_eq!(sync.addresses, vec![Address::repeat_byte(0x11)]);
	}

	#[test]
	fn test_from_file_errors() {
		let missing = Config::from_file(Path::new("/nonexistent/batchstore.json"));
		assert!(matches!(missing, Err(ConfigError::Read { .. })));

		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{"start_block": "soon"}}"#).unwrap();
		assert!(matches!(
			Config::from_file(file.path()),
			Err(ConfigError::Parse { .. })
		));
	}

	#[test]
	fn test_env_overrides() {
		let config = Config::default()
			.apply_overrides(env(&[
				("BATCHSTORE_DATA_DIR", "/tmp/store"),
				("BATCHSTORE_WS_URL", "wss://node.example/ws"),
				(
					"BATCHSTORE_CONTRACT_ADDRESSES",
					"0x2222222222222222222222222222222222222222, 3333333333333333333333333333333333333333",
				),
				("BATCHSTORE_START_BLOCK", " 42 "),
				("BATCHSTORE_EVENT_BUFFER", "16"),
				("BATCHSTORE_REPLAY_FILE", "logs.json"),
			]))
			.unwrap();

		assert_eq!(config.data_dir, PathBuf::from("/tmp/store"));
		assert_eq!(config.ws_url, "wss://node.example/ws");
		assert_eq!(
			config.contract_addresses,
			vec![Address::repeat_byte(0x22), Address::repeat_byte(0x33)]
		);
		assert_eq!(config.start_block, 42);
		assert_eq!(config.event_buffer, 16);
		assert_eq!(config.replay_file, Some(PathBuf::from("logs.json")));
	}

	#[test]
	fn test_invalid_overrides() {
		let err = Config::default()
			.apply_overrides(env(&[("BATCHSTORE_START_BLOCK", "-1")]))
			.unwrap_err();
		assert!(matches!(
			err,
			ConfigError::InvalidValue {
				key: "BATCHSTORE_START_BLOCK",
				..
			}
		));

		let err = Config::default()
			.apply_overrides(env(&[("BATCHSTORE_CONTRACT_ADDRESSES", "0x1234")]))
			.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { .. }));

		let err = Config::default()
			.apply_overrides(env(&[("BATCHSTORE_RPC_URL", "")]))
			.unwrap_err();
		assert!(matches!(err, ConfigError::Missing(_)));
	}

	#[test]
	fn test_zero_values_fall_back_to_defaults() {
		let config = Config::default()
			.apply_overrides(env(&[
				("BATCHSTORE_EVENT_BUFFER", "0"),
				("BATCHSTORE_PROGRESS_INTERVAL", "0"),
			]))
			.unwrap();
		assert_eq!(config.event_buffer, 1);
		assert_eq!(config.progress_interval, 1000);
	}
}
