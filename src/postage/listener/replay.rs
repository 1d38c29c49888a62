//! Subscriber that replays a fixed list of logs.
//!
//! Used to drive the batch store from a recorded log file and as the scripted event
//! source in tests.

use crate::postage::listener::{ListenerError, Log, LogFilter, LogStream, LogSubscriber};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Replays a list of logs in order, honouring the filter's start block and addresses.
pub struct ReplaySubscriber {
	logs: Vec<Log>,
	/// End the stream after the last log instead of waiting forever.
	close_after_replay: bool,
	/// Yield a subscription error after this many delivered logs.
	fail_after: Option<(usize, String)>,
	requests: Mutex<Vec<LogFilter>>,
}

impl ReplaySubscriber {
	/// Replay `logs` and then keep the subscription open, like a live chain with no new blocks.
	pub fn new(logs: Vec<Log>) -> Self {
		Self {
			logs,
			close_after_replay: false,
			fail_after: None,
			requests: Mutex::new(Vec::new()),
		}
	}

	/// Load logs from a JSON array in `eth_getLogs` result format.
	pub fn from_file(path: &Path) -> Result<Self, ListenerError> {
		let contents = std::fs::read_to_string(path)?;
		let logs: Vec<Log> = serde_json::from_str(&contents)?;
		info!("Loaded {} logs from {}", logs.len(), path.display());
		Ok(Self::new(logs))
	}

	/// End the stream once every log was delivered.
	pub fn closing(mut self) -> Self {
		self.close_after_replay = true;
		self
	}

	/// Fail the subscription after `delivered` logs.
	pub fn fail_after(mut self, delivered: usize, message: impl Into<String>) -> Self {
		self.fail_after = Some((delivered, message.into()));
		self
	}

	/// Filters of every subscription opened so far.
	pub fn requests(&self) -> Vec<LogFilter> {
		match self.requests.lock() {
			Ok(requests) => requests.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		}
	}
}

#[async_trait]
impl LogSubscriber for ReplaySubscriber {
	async fn subscribe(&self, filter: &LogFilter) -> Result<LogStream, ListenerError> {
		match self.requests.lock() {
			Ok(mut requests) => requests.push(filter.clone()),
			Err(poisoned) => poisoned.into_inner().push(filter.clone()),
		}

		let mut selected: Vec<Result<Log, ListenerError>> = self
			.logs
			.iter()
			.filter(|log| log.block_number >= filter.from_block)
			.filter(|log| filter.addresses.is_empty() || filter.addresses.contains(&log.address))
			.cloned()
			.map(Ok)
			.collect();
		debug!(
			"Replaying {} of {} logs from block {}",
			selected.len(),
			self.logs.len(),
			filter.from_block
		);

		if let Some((delivered, message)) = &self.fail_after {
			selected.truncate(*delivered);
			selected.push(Err(ListenerError::Subscription(message.clone())));
		}

		let replay = stream::iter(selected);
		if self.close_after_replay {
			Ok(replay.boxed())
		} else {
			Ok(replay.chain(stream::pending()).boxed())
		}
	}

	fn name(&self) -> &'static str {
		"replay"
	}
}
