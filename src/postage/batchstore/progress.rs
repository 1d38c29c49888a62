//! Progress tracking for a batch store sync session.
//!
//! The dispatcher records every applied event here. The tracker counts events per kind,
//! remembers the highest block applied and logs a progress line whenever the sync has
//! advanced a configurable number of blocks since the last one.

use crate::postage::events::EventKind;
use tracing::info;

/// Blocks between two progress lines when no interval is configured.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// Counters for one sync session
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
	/// Block the session resumed from
	start_block: u64,
	/// The highest block we've applied an event for
	highest_block: u64,
	/// Track if we've applied any event
	has_processed_events: bool,
	created: usize,
	topped_up: usize,
	depth_updates: usize,
	price_updates: usize,
	/// Blocks between progress lines
	interval: u64,
	/// Last block at which we logged progress
	last_logged_block: u64,
}

impl SyncProgressTracker {
	/// Create a new progress tracker starting from the given block.
	pub fn new(start_block: u64, interval: u64) -> Self {
		Self {
			start_block,
			highest_block: start_block,
			has_processed_events: false,
			created: 0,
			topped_up: 0,
			depth_updates: 0,
			price_updates: 0,
			interval: interval.max(1),
			last_logged_block: start_block,
		}
	}

	/// Record an event applied at `block`.
	pub fn record(&mut self, block: u64, kind: EventKind) {
		self.highest_block = self.highest_block.max(block);
		self.has_processed_events = true;
		match kind {
			EventKind::Create => self.created += 1,
			EventKind::TopUp => self.topped_up += 1,
			EventKind::UpdateDepth => self.depth_updates += 1,
			EventKind::UpdatePrice => self.price_updates += 1,
		}
	}

	/// Log progress at regular intervals or when forced
	///
	/// Returns whether a line was logged.
	pub fn log_progress(&mut self, force: bool) -> bool {
		let blocks_since_last_log = self.highest_block.saturating_sub(self.last_logged_block);
		let should_log = force || blocks_since_last_log >= self.interval;

		if should_log && self.has_processed_events {
			info!(
				"Sync progress: {} events applied up to block {}",
				self.events_processed(),
				self.highest_block
			);
			self.last_logged_block = self.highest_block;
			return true;
		}
		false
	}

	fn events_processed(&self) -> usize {
		self.created + self.topped_up + self.depth_updates + self.price_updates
	}

	/// Get sync statistics as a SyncStats struct
	pub fn get_stats(&self) -> SyncStats {
		SyncStats {
			start_block: self.start_block,
			highest_block: self.highest_block,
			has_processed_events: self.has_processed_events,
			events_processed: self.events_processed(),
			created: self.created,
			topped_up: self.topped_up,
			depth_updates: self.depth_updates,
			price_updates: self.price_updates,
		}
	}
}

/// Statistics about a sync session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
	pub start_block: u64,
	pub highest_block: u64,
	pub has_processed_events: bool,
	pub events_processed: usize,
	pub created: usize,
	pub topped_up: usize,
	pub depth_updates: usize,
	pub price_updates: usize,
}

impl SyncStats {
	/// Get a human-readable summary of the sync statistics
	pub fn summary(&self) -> String {
		format!(
			"Sync from block {} to {}: {} events ({} created, {} top-ups, {} depth updates, {} price updates)",
			self.start_block,
			self.highest_block,
			self.events_processed,
			self.created,
			self.topped_up,
			self.depth_updates,
			self.price_updates,
		)
	}
}
