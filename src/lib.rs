//! In-memory wallet state with snapshot persistence.
//!
//! - [`primitives`]: chain value types with a canonical string form.
//! - [`rehydrate`]: schema-driven conversion of persisted JSON back into typed state.
//! - [`storage`]: chain and wallet stores, persistence adapters and the [`storage::Storage`]
//!   orchestrator with its autosave worker.

pub mod primitives;
pub mod rehydrate;
pub mod storage;

pub use storage::{Storage, StorageConfig, StorageError, StorageEvent};
