//! Local postage batch ledger kept in sync with the postage contract.
//!
//! The [`postage::Listener`] follows the contract's logs and feeds them to the
//! [`postage::Store`], which persists batches and the ledger checkpoint through a
//! [`storage::StateStore`].

/// Service configuration
pub mod config;
/// Postage listener, decoder and batch store
pub mod postage;
/// Key/value state store abstraction and backends
pub mod storage;
