use crate::primitives::ParseError;
use crate::rehydrate::RehydrateError;

use serde::{Deserialize, Serialize};

/// Version tag written into every per-wallet save payload.
pub const STATE_VERSION: u32 = 1;

/// Errors surfaced by the stores, the adapters and the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("Schema mismatch: {0}")]
	SchemaMismatch(#[from] RehydrateError),

	#[error("Adapter failure: {0}")]
	AdapterFailure(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Invalid chain value: {0}")]
	InvalidValue(#[from] ParseError),

	#[error("Inconsistent index: {0}")]
	InconsistentIndex(String),
}

/// Options that change where synchronization starts and are carried into every save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsafeOptions {
	/// Never synchronize blocks below this height.
	#[serde(default)]
	pub skip_synchronization_before_height: Option<u64>,
}

/// Which part of a snapshot is dropped when an entry fails to rehydrate
/// and purging is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PurgeScope {
	/// Drop only the failing network or wallet entry.
	#[default]
	Entry,
	/// Drop the whole collection the failing entry belongs to.
	Collection,
}
