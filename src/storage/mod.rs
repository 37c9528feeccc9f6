//! Wallet State Storage Module
//!
//! This module keeps the chain and wallet state of a wallet library in memory and persists it
//! through a pluggable adapter. It is composed of several submodules:
//!
//! - `orchestrator`: The `Storage` entry point. Owns the stores, rehydrates and saves them.
//! - `chain_store`: Per-network blockchain state (headers, transactions, instant locks, addresses).
//! - `wallet_store`: Per-wallet derivation paths and the identity index.
//! - `adapters`: The `StorageAdapter` trait with in-memory and file implementations.
//! - `events`: Lifecycle and chain events, published over a broadcast channel.
//! - `config`: Orchestrator configuration.
//! - `worker`: The periodic autosave task.
//!
//! Every store exports a plain JSON snapshot and imports it back through the typed rehydrator,
//! so persisted state is validated against the store's schema before it is used.

/// Persistence backends
pub mod adapters;
/// Per-network chain state
pub mod chain_store;
/// Orchestrator configuration
pub mod config;
/// Storage and chain events
pub mod events;
/// Owner of all stores and their persistence
pub mod orchestrator;
mod types;
/// Per-wallet state
pub mod wallet_store;
mod worker;

pub use adapters::{FileAdapter, InMemoryAdapter, StorageAdapter};
pub use chain_store::*;
pub use config::*;
pub use events::*;
pub use orchestrator::*;
pub use types::*;
pub use wallet_store::*;
