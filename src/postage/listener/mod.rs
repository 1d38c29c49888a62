//! Postage contract log subscription.
//!
//! A [`LogSubscriber`] is the transport: it yields raw contract logs from a start block
//! onward. The [`Listener`] wraps a subscriber, decodes each log into an
//! [`Event`](crate::postage::Event) and forwards `(block, event)` messages to the batch
//! store's dispatcher over a channel until it is stopped or something fails.

/// Listen loop bridging a subscriber to the dispatcher
mod listen;
/// Subscriber replaying a recorded list of logs
mod replay;
/// JSON-RPC subscriber (HTTP backfill + WebSocket live logs)
mod rpc;
/// Raw log type and its JSON-RPC encoding
mod types;

pub use listen::{DecodeFn, Listener};
pub use replay::ReplaySubscriber;
pub use rpc::{DEFAULT_BLOCK_RANGE, RpcLogSubscriber};
pub use types::*;

use crate::postage::decoder::DecodeError;
use crate::postage::types::Address;
use futures_util::Stream;
use std::pin::Pin;

/// Stream of raw logs produced by a subscription.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Log, ListenerError>> + Send>>;

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
	/// First block whose logs are wanted.
	pub from_block: u64,
	/// Emitting contracts. Empty means any.
	pub addresses: Vec<Address>,
}

/// Transport delivering contract logs.
///
/// Implementations must deliver logs in non-decreasing block order. Dropping the returned
/// stream releases the subscription.
#[async_trait::async_trait]
pub trait LogSubscriber: Send + Sync {
	/// Open a subscription for `filter`.
	async fn subscribe(&self, filter: &LogFilter) -> Result<LogStream, ListenerError>;

	/// Get the name of this subscriber for logging.
	fn name(&self) -> &'static str;
}

/// Errors from log subscription and the listen loop.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
	#[error("RPC error: {0}")]
	Rpc(String),

	#[error("No data returned")]
	NoData,

	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Subscription error: {0}")]
	Subscription(String),

	#[error("log subscription closed by the remote end")]
	SubscriptionClosed,

	#[error("invalid event payload: {0}")]
	Decode(#[from] DecodeError),

	#[error("chain reorganization: log at block {0} was removed")]
	Reorg(u64),

	#[error("event dispatcher closed")]
	DispatcherClosed,
}
