//! Postage batch ledger.
//!
//! Keeps a local, persisted copy of the postage contract's batches in lockstep with the chain:
//!
//! - `listener`: subscribes to contract logs and turns them into `(block, Event)` messages.
//! - `decoder`: decodes raw postage contract logs into [`Event`]s.
//! - `events`: the closed set of ledger events and the [`BatchUpdater`] they are applied to.
//! - `batchstore`: the store owning the checkpoint, the identity index and the value index.

/// Batch store, ledger checkpoint and sync dispatcher
pub mod batchstore;
/// Postage contract log decoding
pub mod decoder;
/// Ledger events
pub mod events;
/// Log subscription and the listen loop
pub mod listener;
/// Shared postage types
pub mod types;

pub use batchstore::{BatchStoreError, LedgerState, Store, SyncConfig, SyncError, SyncHandle};
pub use events::{BatchUpdater, Event, EventKind};
pub use listener::{Listener, ListenerError, Log, LogFilter, LogSubscriber};
pub use types::*;
