//! Event dispatcher and sync lifecycle.
//!
//! A sync session runs the [`Listener`] and a dispatcher concurrently. The listener sends
//! `(block, event)` messages over a bounded channel; the dispatcher applies them to the
//! store one at a time, in arrival order. The channel is the only handoff between the two:
//! the store is never touched by the listener.
//!
//! The session ends when the stop signal fires, when the listener fails, or when an event
//! fails to apply. In the last case the dispatcher drops its end of the channel, which
//! makes the listener close its subscription and return.

use crate::postage::batchstore::progress::{DEFAULT_PROGRESS_INTERVAL, SyncProgressTracker, SyncStats};
use crate::postage::batchstore::{BatchStoreError, Store};
use crate::postage::listener::{Listener, ListenerError, LogSubscriber};
use crate::postage::types::{Address, BlockEvent};
use crate::storage::StateStore;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

/// Configuration for a sync session
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Block a fresh ledger starts from, usually the contract deployment block.
	pub start_block: u64,
	/// Postage contract addresses to follow.
	pub addresses: Vec<Address>,
	/// Events the listener may run ahead of the dispatcher.
	pub event_buffer: usize,
	/// Blocks between progress log lines.
	pub progress_interval: u64,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			start_block: 0,
			addresses: Vec::new(),
			event_buffer: 1,
			progress_interval: DEFAULT_PROGRESS_INTERVAL,
		}
	}
}

/// Why a sync session ended other than by being stopped.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("failed to apply event: {0}")]
	Store(#[from] BatchStoreError),

	#[error("listener failed: {0}")]
	Listener(#[from] ListenerError),

	#[error("sync task failed: {0}")]
	Join(#[from] JoinError),
}

impl<S: StateStore> Store<S> {
	/// Follow the chain until `stop` fires or something fails.
	///
	/// Resumes right after the checkpoint (or at `config.start_block` for a fresh ledger).
	/// Returns the session statistics once stopped. When both sides fail, the apply error
	/// is reported, since the listener then only saw the dispatcher go away.
	pub async fn sync<L: LogSubscriber>(
		&self,
		listener: &Listener<L>,
		stop: watch::Receiver<bool>,
		config: &SyncConfig,
	) -> Result<SyncStats, SyncError> {
		let from = self.resume_from(config.start_block)?;
		let (tx, mut rx) = mpsc::channel::<BlockEvent>(config.event_buffer.max(1));
		info!("Starting batch store sync from block {}", from);

		let listen = listener.listen(from, stop, tx, &config.addresses);
		let dispatch = async move {
			let mut progress = SyncProgressTracker::new(from, config.progress_interval);
			while let Some(BlockEvent { block, event }) = rx.recv().await {
				let kind = event.kind();
				let batch = event.batch_id().map(hex::encode);
				if let Err(e) = self.update(block, event) {
					match batch {
						Some(id) => error!(
							"Failed to apply {} event for batch {} at block {}: {}",
							kind, id, block, e
						),
						None => error!("Failed to apply {} event at block {}: {}", kind, block, e),
					}
					return (progress, Err(e));
				}
				progress.record(block, kind);
				progress.log_progress(false);
			}
			(progress, Ok(()))
		};

		let (listened, (mut progress, dispatched)) = tokio::join!(listen, dispatch);
		progress.log_progress(true);
		let stats = progress.get_stats();
		info!("{}", stats.summary());

		dispatched?;
		listened?;
		Ok(stats)
	}
}

impl<S: StateStore + 'static> Store<S> {
	/// Run [`Store::sync`] on its own task.
	pub fn start_sync<L>(self: &Arc<Self>, listener: Listener<L>, config: SyncConfig) -> SyncHandle<S>
	where
		L: LogSubscriber + 'static,
	{
		let (stop_tx, stop_rx) = watch::channel(false);
		let store = Arc::clone(self);
		let task = tokio::spawn(async move { store.sync(&listener, stop_rx, &config).await });
		SyncHandle {
			store: Arc::clone(self),
			stop: stop_tx,
			task,
		}
	}
}

/// A running sync session.
pub struct SyncHandle<S> {
	store: Arc<Store<S>>,
	stop: watch::Sender<bool>,
	task: JoinHandle<Result<SyncStats, SyncError>>,
}

impl<S: StateStore> SyncHandle<S> {
	/// Resolves once the listener has returned, whether stopped or failed.
	pub async fn exited(&self) {
		self.stop.closed().await
	}

	/// Stop the session, wait for it to wind down and close the store.
	///
	/// The store is closed only after the listener and dispatcher have both returned, so
	/// no event can be applied to a closed store.
	pub async fn shutdown(self) -> Result<SyncStats, SyncError> {
		self.stop.send_replace(true);
		let result = match self.task.await {
			Ok(result) => result,
			Err(e) => Err(e.into()),
		};
		let closed = self.store.close();
		if let (Err(e), Err(_)) = (&closed, &result) {
			warn!("Failed to close batch store after sync error: {}", e);
		}
		let stats = result?;
		closed?;
		Ok(stats)
	}
}
