use crate::storage::{PurgeScope, StorageError, UnsafeOptions};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_NETWORK: &str = "testnet";

/// Configuration for the storage orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
	/// Load persisted state on configure
	pub rehydrate: bool,
	/// Start the autosave worker on configure
	pub autosave: bool,
	pub autosave_interval_ms: u64,
	/// Drop corrupted snapshot entries instead of failing startup
	pub purge_on_error: bool,
	pub purge_scope: PurgeScope,
	/// Directory for the file adapter; in-memory only when unset
	pub data_dir: Option<PathBuf>,
	pub network: String,
	pub wallet_id: Option<String>,
	pub unsafe_options: UnsafeOptions,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			rehydrate: true,
			autosave: true,
			autosave_interval_ms: 10_000,
			purge_on_error: false,
			purge_scope: PurgeScope::Entry,
			data_dir: None,
			network: DEFAULT_NETWORK.to_string(),
			wallet_id: None,
			unsafe_options: UnsafeOptions::default(),
		}
	}
}

impl StorageConfig {
	pub fn autosave_interval(&self) -> Duration {
		Duration::from_millis(self.autosave_interval_ms.max(1))
	}

	/// Load a configuration from a JSON file. Missing fields take their defaults.
	pub async fn from_json_file(path: &Path) -> Result<Self, StorageError> {
		let content = tokio::fs::read_to_string(path).await?;
		let config: Self = serde_json::from_str(&content)?;
		info!("Loaded storage configuration from {:?}", path);
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_partial_config_uses_defaults() {
		let config: StorageConfig = serde_json::from_str(
			r#"{ "autosave": false, "purgeOnError": true, "purgeScope": "collection",
			     "unsafeOptions": { "skipSynchronizationBeforeHeight": 1300 } }"#,
		)
		.expect("parses");

		assert!(config.rehydrate);
		assert!(!config.autosave);
		assert!(config.purge_on_error);
		assert_eq!(config.purge_scope, PurgeScope::Collection);
		assert_eq!(config.network, DEFAULT_NETWORK);
		assert_eq!(config.autosave_interval(), Duration::from_secs(10));
		assert_eq!(
			config.unsafe_options.skip_synchronization_before_height,
			Some(1300)
		);
	}

	#[tokio::test]
	async fn test_from_json_file() {
		let dir = tempfile::tempdir().expect("temp dir");
		let path = dir.path().join("storage.json");
		tokio::fs::write(&path, r#"{ "network": "mainnet", "autosaveIntervalMs": 500 }"#)
			.await
			.expect("write");

		let config = StorageConfig::from_json_file(&path).await.expect("loads");
		assert_eq!(config.network, "mainnet");
		assert_eq!(config.autosave_interval(), Duration::from_millis(500));

		assert!(
			StorageConfig::from_json_file(&dir.path().join("missing.json"))
				.await
				.is_err()
		);
	}
}
