use crate::postage::decoder::{DecodeError, decode_log};
use crate::postage::events::Event;
use crate::postage::listener::{ListenerError, Log, LogFilter, LogSubscriber};
use crate::postage::types::{Address, BlockEvent};

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Turns a raw log into a ledger event.
pub type DecodeFn = fn(&Log) -> Result<Event, DecodeError>;

/// Resolves once `stop` reads `true` or its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
	loop {
		if *stop.borrow_and_update() {
			return;
		}
		if stop.changed().await.is_err() {
			return;
		}
	}
}

/// Bridges a [`LogSubscriber`] to the batch store's dispatcher.
///
/// The listener does not reorder or buffer: each decoded log is sent to the dispatcher
/// before the next one is read from the subscription.
pub struct Listener<L> {
	subscriber: L,
	decode: DecodeFn,
}

impl<L: LogSubscriber> Listener<L> {
	/// Listener decoding postage contract logs.
	pub fn new(subscriber: L) -> Self {
		Self::with_decoder(subscriber, decode_log)
	}

	pub fn with_decoder(subscriber: L, decode: DecodeFn) -> Self {
		Self { subscriber, decode }
	}

	pub fn subscriber(&self) -> &L {
		&self.subscriber
	}

	/// Subscribe to `addresses` from block `from` and forward decoded events to `events`.
	///
	/// Returns `Ok(())` once `stop` flips to `true` (or its sender goes away). Returns an
	/// error when the subscription fails or ends, a log cannot be decoded, a log was removed
	/// by a reorg, or the dispatcher hung up. The subscription is dropped on every path.
	pub async fn listen(
		&self,
		from: u64,
		mut stop: watch::Receiver<bool>,
		events: mpsc::Sender<BlockEvent>,
		addresses: &[Address],
	) -> Result<(), ListenerError> {
		let filter = LogFilter {
			from_block: from,
			addresses: addresses.to_vec(),
		};
		let mut logs = self.subscriber.subscribe(&filter).await?;
		info!(
			"Listening for postage events from block {} via {}",
			from,
			self.subscriber.name()
		);

		loop {
			let log = tokio::select! {
				biased;
				_ = stopped(&mut stop) => {
					info!("Stop signal received, closing log subscription");
					return Ok(());
				}
				_ = events.closed() => {
					return Err(ListenerError::DispatcherClosed);
				}
				next = logs.next() => match next {
					Some(Ok(log)) => log,
					Some(Err(e)) => {
						error!("Error in log subscription: {}", e);
						return Err(e);
					}
					None => {
						warn!("Log subscription ended unexpectedly");
						return Err(ListenerError::SubscriptionClosed);
					}
				},
			};

			if log.removed {
				warn!(
					"Log at block {} was removed by a reorganization",
					log.block_number
				);
				return Err(ListenerError::Reorg(log.block_number));
			}

			let event = (self.decode)(&log).inspect_err(|e| {
				error!(
					"Failed to decode log at block {} (tx {:?}): {}",
					log.block_number, log.transaction_hash, e
				);
			})?;
			debug!("Received {} event at block {}", event.kind(), log.block_number);

			let message = BlockEvent {
				block: log.block_number,
				event,
			};
			tokio::select! {
				biased;
				_ = stopped(&mut stop) => {
					info!("Stop signal received, closing log subscription");
					return Ok(());
				}
				sent = events.send(message) => {
					if sent.is_err() {
						return Err(ListenerError::DispatcherClosed);
					}
				}
			}
		}
	}
}
