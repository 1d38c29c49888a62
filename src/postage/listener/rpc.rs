//! JSON-RPC log subscriber for an Ethereum-compatible node.
//!
//! Historic logs are fetched over HTTP with `eth_getLogs` in fixed-size block ranges up to
//! the chain head observed at subscription time. New logs arrive over a WebSocket
//! `eth_subscribe("logs")` subscription that is opened before the head is read, so no block
//! falls between the two. Live logs at or below the backfill head are dropped.

use crate::postage::listener::{
	ListenerError, Log, LogFilter, LogStream, LogSubscriber, format_quantity, parse_quantity,
};
use crate::postage::types::Address;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future, stream};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

/// Blocks requested per `eth_getLogs` call.
pub const DEFAULT_BLOCK_RANGE: u64 = 5_000;

const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// JSON-RPC client subscribing to contract logs
#[derive(Clone)]
pub struct RpcLogSubscriber {
	/// The underlying HTTP client for JSON-RPC calls.
	http_client: Client,
	/// HTTP JSON-RPC endpoint.
	rpc_url: String,
	/// WebSocket JSON-RPC endpoint for live subscriptions.
	ws_url: String,
	/// Blocks per backfill page.
	block_range: u64,
}

impl RpcLogSubscriber {
	/// Create a new subscriber.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC calls.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	pub fn new(rpc_url: String, ws_url: String) -> Result<Self, ListenerError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			block_range: DEFAULT_BLOCK_RANGE,
		})
	}

	/// Set the number of blocks fetched per `eth_getLogs` call.
	pub fn with_block_range(mut self, block_range: u64) -> Self {
		self.block_range = block_range.max(1);
		self
	}

	/// Current chain head.
	pub async fn block_number(&self) -> Result<u64, ListenerError> {
		let result = self.call("eth_blockNumber", json!([])).await?;
		let quantity = result.as_str().ok_or(ListenerError::NoData)?;
		parse_quantity(quantity).map_err(ListenerError::Rpc)
	}

	/// Logs emitted by `addresses` in blocks `from..=to`.
	pub async fn get_logs(
		&self,
		from: u64,
		to: u64,
		addresses: &[Address],
	) -> Result<Vec<Log>, ListenerError> {
		let params = json!([{
			"fromBlock": format_quantity(from),
			"toBlock": format_quantity(to),
			"address": addresses,
		}]);
		let result = self.call("eth_getLogs", params).await?;
		Ok(serde_json::from_value(result)?)
	}

	/// Execute a JSON-RPC call and return its `result`.
	pub async fn call(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, ListenerError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(ListenerError::Rpc(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let mut response_json: serde_json::Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			return Err(ListenerError::Rpc(format!("{} failed: {}", method, error)));
		}

		match response_json.get_mut("result") {
			Some(result) => Ok(result.take()),
			None => Err(ListenerError::NoData),
		}
	}

	/// Open a WebSocket `eth_subscribe("logs")` subscription.
	async fn subscribe_live(&self, addresses: &[Address]) -> Result<LogStream, ListenerError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);
		let (ws_stream, response) = connect_async(self.ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": SUBSCRIBE_REQUEST_ID,
			"method": "eth_subscribe",
			"params": ["logs", { "address": addresses }],
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		let subscription_id = loop {
			let Some(msg) = ws_receiver.next().await else {
				return Err(ListenerError::SubscriptionClosed);
			};
			let Message::Text(text) = msg? else {
				continue;
			};
			let parsed: serde_json::Value = serde_json::from_str(&text)?;
			if parsed.get("id").and_then(|id| id.as_u64()) != Some(SUBSCRIBE_REQUEST_ID) {
				continue;
			}
			if let Some(error) = parsed.get("error") {
				return Err(ListenerError::Subscription(error.to_string()));
			}
			break parsed
				.get("result")
				.and_then(|r| r.as_str())
				.ok_or(ListenerError::NoData)?
				.to_string();
		};
		info!("Subscribed to live logs, subscription id {}", subscription_id);

		let stream = ws_receiver.filter_map(move |msg| {
			let result = match msg {
				Ok(Message::Text(text)) => parse_notification(&text, &subscription_id),
				Ok(Message::Close(frame)) => {
					debug!("WebSocket closed by server: {:?}", frame);
					None
				}
				Ok(_) => None,
				Err(e) => Some(Err(ListenerError::WebSocket(e))),
			};
			future::ready(result)
		});

		Ok(Box::pin(stream))
	}

	/// Historic logs in `from..=head`, fetched one block range at a time.
	fn backfill(&self, from: u64, head: u64, addresses: Vec<Address>) -> LogStream {
		let client = self.clone();
		let pages = stream::unfold(Some(from), move |next| {
			let client = client.clone();
			let addresses = addresses.clone();
			async move {
				let (start, end) = page_range(next?, head, client.block_range)?;
				match client.get_logs(start, end, &addresses).await {
					Ok(logs) => {
						debug!("Fetched {} logs in blocks {}..={}", logs.len(), start, end);
						let next = if end < head { Some(end + 1) } else { None };
						Some((Ok(logs), next))
					}
					Err(e) => {
						error!("eth_getLogs for blocks {}..={} failed: {}", start, end, e);
						Some((Err(e), None))
					}
				}
			}
		});

		pages
			.flat_map(|page| match page {
				Ok(logs) => stream::iter(logs.into_iter().map(Ok)).left_stream(),
				Err(e) => stream::once(future::ready(Err(e))).right_stream(),
			})
			.boxed()
	}
}

#[async_trait]
impl LogSubscriber for RpcLogSubscriber {
	async fn subscribe(&self, filter: &LogFilter) -> Result<LogStream, ListenerError> {
		let live = self.subscribe_live(&filter.addresses).await?;
		let head = self.block_number().await?;
		info!(
			"Backfilling logs from block {} to chain head {}",
			filter.from_block, head
		);

		let backfill = self.backfill(filter.from_block, head, filter.addresses.clone());
		Ok(splice(backfill, live, filter.from_block, head))
	}

	fn name(&self) -> &'static str {
		"json-rpc"
	}
}

/// Highest block already covered once backfill of `from_block..=head` is done.
fn live_floor(from_block: u64, head: u64) -> u64 {
	head.max(from_block.saturating_sub(1))
}

/// Backfill followed by the live logs it did not already cover.
///
/// Live errors always pass through.
fn splice(backfill: LogStream, live: LogStream, from_block: u64, head: u64) -> LogStream {
	let floor = live_floor(from_block, head);
	let live = live.filter(move |item| {
		future::ready(match item {
			Ok(log) => log.block_number > floor,
			Err(_) => true,
		})
	});
	backfill.chain(live).boxed()
}

/// Block range of the page starting at `start`, or `None` once past `head`.
fn page_range(start: u64, head: u64, block_range: u64) -> Option<(u64, u64)> {
	if start > head {
		return None;
	}
	let end = start.saturating_add(block_range.saturating_sub(1)).min(head);
	Some((start, end))
}

/// Extract the log from an `eth_subscription` notification for `subscription_id`.
///
/// Returns `None` for messages that belong to other subscriptions or carry no log.
fn parse_notification(text: &str, subscription_id: &str) -> Option<Result<Log, ListenerError>> {
	let parsed: serde_json::Value = match serde_json::from_str(text) {
		Ok(parsed) => parsed,
		Err(e) => return Some(Err(ListenerError::Json(e))),
	};

	if let Some(error) = parsed.get("error") {
		return Some(Err(ListenerError::Subscription(error.to_string())));
	}

	if parsed.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
		debug!("Ignoring message: {}", text);
		return None;
	}
	let params = parsed.get("params")?;
	if params.get("subscription").and_then(|s| s.as_str()) != Some(subscription_id) {
		return None;
	}

	match params.get("result") {
		Some(result) => Some(serde_json::from_value(result.clone()).map_err(|e| {
			error!("Failed to deserialize log notification: {}", e);
			ListenerError::Json(e)
		})),
		None => Some(Err(ListenerError::NoData)),
	}
}
