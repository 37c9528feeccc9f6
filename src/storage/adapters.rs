use crate::storage::StorageError;

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Key/value persistence backend the orchestrator snapshots into
#[async_trait::async_trait]
pub trait StorageAdapter: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
	async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// Adapter keeping everything in process memory.
///
/// Used when no durable backend is configured, and as the test double: it counts reads
/// and writes.
#[derive(Default)]
pub struct InMemoryAdapter {
	entries: Mutex<HashMap<String, Value>>,
	gets: AtomicUsize,
	sets: AtomicUsize,
}

impl InMemoryAdapter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adapter pre-populated with `entries`.
	pub fn with_entries<I>(entries: I) -> Self
	where
		I: IntoIterator<Item = (String, Value)>,
	{
		Self {
			entries: Mutex::new(entries.into_iter().collect()),
			..Self::default()
		}
	}

	pub fn get_count(&self) -> usize {
		self.gets.load(Ordering::SeqCst)
	}

	pub fn set_count(&self) -> usize {
		self.sets.load(Ordering::SeqCst)
	}

	/// Current value under `key`, without counting a read.
	pub fn peek(&self, key: &str) -> Option<Value> {
		self.lock().get(key).cloned()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
		self.entries
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
	}
}

#[async_trait::async_trait]
impl StorageAdapter for InMemoryAdapter {
	async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
		self.gets.fetch_add(1, Ordering::SeqCst);
		Ok(self.lock().get(key).cloned())
	}

	async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
		self.sets.fetch_add(1, Ordering::SeqCst);
		self.lock().insert(key.to_string(), value);
		Ok(())
	}
}

/// File-based adapter: one JSON document per key inside a data directory.
///
/// Each `<key>.json` has a `<key>.meta.json` sidecar recording when it was written.
pub struct FileAdapter {
	data_dir: PathBuf,
}

impl FileAdapter {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}

	fn get_filename(&self, key: &str) -> PathBuf {
		self.data_dir.join(format!("{}.json", file_stem(key)))
	}

	fn get_metadata_filename(&self, key: &str) -> PathBuf {
		self.data_dir.join(format!("{}.meta.json", file_stem(key)))
	}
}

/// Keys made of safe characters map to themselves; anything else is hex encoded.
fn file_stem(key: &str) -> String {
	let safe = !key.is_empty()
		&& key
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
	if safe {
		key.to_string()
	} else {
		format!("key-{}", hex::encode(key.as_bytes()))
	}
}

#[async_trait::async_trait]
impl StorageAdapter for FileAdapter {
	async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
		let filename = self.get_filename(key);

		// Check if file exists
		if !tokio::fs::try_exists(&filename).await? {
			debug!("No stored value for {} at {:?}", key, filename);
			return Ok(None);
		}

		let content = tokio::fs::read_to_string(&filename).await.map_err(|e| {
			StorageError::AdapterFailure(format!("Failed to read {:?}: {}", filename, e))
		})?;

		let value = serde_json::from_str(&content).map_err(|e| {
			StorageError::AdapterFailure(format!("Failed to parse {:?}: {}", filename, e))
		})?;

		debug!("Loaded {} from {:?}", key, filename);
		Ok(Some(value))
	}

	async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
		tokio::fs::create_dir_all(&self.data_dir)
			.await
			.map_err(|e| {
				StorageError::AdapterFailure(format!(
					"Failed to create data directory {:?}: {}",
					self.data_dir, e
				))
			})?;

		// Create metadata
		let metadata = serde_json::json!({
			"key": key,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});

		let metadata_filename = self.get_metadata_filename(key);
		tokio::fs::write(&metadata_filename, serde_json::to_string_pretty(&metadata)?)
			.await
			.map_err(|e| {
				StorageError::AdapterFailure(format!("Failed to write metadata for {}: {}", key, e))
			})?;

		let filename = self.get_filename(key);
		tokio::fs::write(&filename, serde_json::to_string_pretty(&value)?)
			.await
			.map_err(|e| {
				StorageError::AdapterFailure(format!("Failed to write {:?}: {}", filename, e))
			})?;

		info!("Saved {} to {:?}", key, filename);
		Ok(())
	}
}
