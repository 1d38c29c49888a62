//! Ledger events.
//!
//! Every postage contract event maps onto exactly one batch store mutation:
//!
//! | contract event       | [`Event`] variant | [`BatchUpdater`] call |
//! |----------------------|-------------------|-----------------------|
//! | `BatchCreated`       | `Create`          | `create`              |
//! | `BatchTopUp`         | `TopUp`           | `top_up`              |
//! | `BatchDepthIncrease` | `UpdateDepth`     | `update_depth`        |
//! | `PriceUpdate`        | `UpdatePrice`     | `update_price`        |

use crate::postage::batchstore::BatchStoreError;
use primitive_types::U256;
use std::fmt;

/// A decoded postage contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
	/// A new batch was bought.
	Create {
		id: Vec<u8>,
		owner: Vec<u8>,
		/// Per-chunk amount paid.
		amount: U256,
		depth: u8,
	},
	/// More per-chunk balance was added to a batch.
	TopUp { id: Vec<u8>, amount: U256 },
	/// The batch was diluted to a new depth.
	UpdateDepth { id: Vec<u8>, depth: u8 },
	/// The storage price per chunk per block changed.
	UpdatePrice { price: U256 },
}

/// Discriminant of [`Event`], used for logging and progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Create,
	TopUp,
	UpdateDepth,
	UpdatePrice,
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			EventKind::Create => "create",
			EventKind::TopUp => "top-up",
			EventKind::UpdateDepth => "update-depth",
			EventKind::UpdatePrice => "update-price",
		};
		f.write_str(name)
	}
}

/// The mutations a ledger event can trigger.
///
/// Implemented by the batch store's apply transaction. Each call happens inside the
/// store's apply critical section, after settlement for the event's block.
pub trait BatchUpdater {
	fn create(
		&mut self,
		id: Vec<u8>,
		owner: Vec<u8>,
		amount: U256,
		depth: u8,
	) -> Result<(), BatchStoreError>;

	fn top_up(&mut self, id: &[u8], amount: U256) -> Result<(), BatchStoreError>;

	fn update_depth(&mut self, id: &[u8], depth: u8) -> Result<(), BatchStoreError>;

	fn update_price(&mut self, price: U256) -> Result<(), BatchStoreError>;
}

impl Event {
	pub fn kind(&self) -> EventKind {
		match self {
			Event::Create { .. } => EventKind::Create,
			Event::TopUp { .. } => EventKind::TopUp,
			Event::UpdateDepth { .. } => EventKind::UpdateDepth,
			Event::UpdatePrice { .. } => EventKind::UpdatePrice,
		}
	}

	/// Batch the event refers to, if any.
	pub fn batch_id(&self) -> Option<&[u8]> {
		match self {
			Event::Create { id, .. } | Event::TopUp { id, .. } | Event::UpdateDepth { id, .. } => {
				Some(id)
			}
			Event::UpdatePrice { .. } => None,
		}
	}

	/// Apply the event to `store`, dispatching to exactly one mutation.
	pub fn apply<U: BatchUpdater + ?Sized>(self, store: &mut U) -> Result<(), BatchStoreError> {
		match self {
			Event::Create {
				id,
				owner,
				amount,
				depth,
			} => store.create(id, owner, amount, depth),
			Event::TopUp { id, amount } => store.top_up(&id, amount),
			Event::UpdateDepth { id, depth } => store.update_depth(&id, depth),
			Event::UpdatePrice { price } => store.update_price(price),
		}
	}
}
