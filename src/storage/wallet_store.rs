use crate::rehydrate::{SchemaNode, rehydrate_into};
use crate::storage::StorageError;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Random identifier for a new wallet.
pub fn generate_wallet_id() -> String {
	let mut id = [0u8; 5];
	rand::rng().fill(&mut id);
	hex::encode(id)
}

/// Addresses derived under one HD path, keyed by their relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathState {
	pub path: String,
	pub addresses: BTreeMap<String, String>,
}

/// Exported shape of a wallet store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
	pub wallet_id: String,
	pub paths: BTreeMap<String, PathState>,
	/// Identity ids by index. Serialized with decimal string keys.
	pub identity_ids: BTreeMap<u32, String>,
}

/// Bidirectional identity index <-> id mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IdentityIndex {
	by_index: BTreeMap<u32, String>,
	by_id: HashMap<String, u32>,
}

impl IdentityIndex {
	fn insert(&mut self, id: &str, index: u32) {
		if let Some(previous) = self.by_index.insert(index, id.to_string()) {
			if previous != id {
				self.by_id.remove(&previous);
			}
		}
		if let Some(old_index) = self.by_id.insert(id.to_string(), index) {
			if old_index != index {
				self.by_index.remove(&old_index);
			}
		}
		debug_assert!(self.is_consistent(), "identity index out of sync");
	}

	fn remove_by_id(&mut self, id: &str) -> Option<u32> {
		let index = self.by_id.remove(id)?;
		self.by_index.remove(&index);
		Some(index)
	}

	fn is_consistent(&self) -> bool {
		self.by_index.len() == self.by_id.len()
			&& self
				.by_index
				.iter()
				.all(|(index, id)| self.by_id.get(id) == Some(index))
	}

	fn to_slots(&self) -> Vec<Option<String>> {
		let len = self
			.by_index
			.keys()
			.next_back()
			.map(|last| *last as usize + 1)
			.unwrap_or(0);
		let mut slots = vec![None; len];
		for (index, id) in &self.by_index {
			slots[*index as usize] = Some(id.clone());
		}
		slots
	}

	fn from_map(entries: &BTreeMap<u32, String>) -> Result<Self, StorageError> {
		let mut index = Self::default();
		for (position, id) in entries {
			if let Some(existing) = index.by_id.get(id) {
				return Err(StorageError::InconsistentIndex(format!(
					"identity {} stored at indexes {} and {}",
					id, existing, position
				)));
			}
			index.insert(id, *position);
		}
		Ok(index)
	}
}

pub struct WalletStore {
	wallet_id: String,
	paths: BTreeMap<String, PathState>,
	identities: IdentityIndex,
}

impl WalletStore {
	pub fn new(wallet_id: impl Into<String>) -> Self {
		Self {
			wallet_id: wallet_id.into(),
			paths: BTreeMap::new(),
			identities: IdentityIndex::default(),
		}
	}

	pub fn wallet_id(&self) -> &str {
		&self.wallet_id
	}

	/// Register `path` with no addresses. No-op when it already exists.
	pub fn create_path_state(&mut self, path: &str) {
		self.paths
			.entry(path.to_string())
			.or_insert_with(|| PathState {
				path: path.to_string(),
				addresses: BTreeMap::new(),
			});
	}

	pub fn get_path_state(&self, path: &str) -> Option<&PathState> {
		self.paths.get(path)
	}

	/// Record an address derived under `path`, creating the path state if needed.
	pub fn insert_path_address(&mut self, path: &str, relative_path: &str, address: &str) {
		self.create_path_state(path);
		if let Some(state) = self.paths.get_mut(path) {
			state
				.addresses
				.insert(relative_path.to_string(), address.to_string());
		}
	}

	pub fn paths(&self) -> impl Iterator<Item = &PathState> {
		self.paths.values()
	}

	/// Map `index` to `id` in both directions, dropping any mapping either side had before.
	pub fn insert_identity_id_at_index(&mut self, id: &str, index: u32) {
		self.identities.insert(id, index);
	}

	pub fn get_identity_id_by_index(&self, index: u32) -> Option<&str> {
		self.identities.by_index.get(&index).map(String::as_str)
	}

	pub fn get_index_by_identity_id(&self, id: &str) -> Option<u32> {
		self.identities.by_id.get(id).copied()
	}

	/// Identity ids ordered by index, with `None` in unused slots.
	///
	/// Allocates one slot per index up to the highest one in use. Prefer
	/// [`WalletStore::identity_ids`] when indexes can be sparse.
	pub fn get_indexed_identity_ids(&self) -> Vec<Option<String>> {
		self.identities.to_slots()
	}

	/// `(index, id)` pairs in index order.
	pub fn identity_ids(&self) -> impl Iterator<Item = (u32, &str)> {
		self.identities
			.by_index
			.iter()
			.map(|(index, id)| (*index, id.as_str()))
	}

	pub fn remove_identity_by_id(&mut self, id: &str) -> Option<u32> {
		self.identities.remove_by_id(id)
	}

	pub fn verify_indexes(&self) -> Result<(), StorageError> {
		if self.identities.is_consistent() {
			Ok(())
		} else {
			Err(StorageError::InconsistentIndex(format!(
				"identity index of wallet {} is out of sync",
				self.wallet_id
			)))
		}
	}

	/// Shape of an exported wallet store.
	pub fn schema() -> SchemaNode {
		SchemaNode::object([
			("walletId", SchemaNode::string()),
			(
				"paths",
				SchemaNode::map(SchemaNode::object([
					("path", SchemaNode::string()),
					("addresses", SchemaNode::map(SchemaNode::string())),
				])),
			),
			(
				"identityIds",
				SchemaNode::index_map(u64::from(u32::MAX), SchemaNode::string()),
			),
		])
	}

	pub fn export_state(&self) -> Result<Value, StorageError> {
		let state = WalletState {
			wallet_id: self.wallet_id.clone(),
			paths: self.paths.clone(),
			identity_ids: self.identities.by_index.clone(),
		};
		Ok(serde_json::to_value(state)?)
	}

	/// Replace paths and identities with a previously exported snapshot.
	///
	/// Nothing changes unless the whole snapshot is valid.
	pub fn import_state(&mut self, blob: &Value) -> Result<(), StorageError> {
		let state: WalletState = rehydrate_into(blob, &Self::schema())?;
		let identities = IdentityIndex::from_map(&state.identity_ids)?;

		debug!(
			"Imported wallet state for {}: {} paths, {} identities",
			self.wallet_id,
			state.paths.len(),
			identities.by_id.len()
		);
		self.paths = state.paths;
		self.identities = identities;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_generate_wallet_id() {
		let id = generate_wallet_id();
		assert_eq!(id.len(), 10);
		assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(id, generate_wallet_id());
	}

	#[test]
	fn test_create_path_state_is_idempotent() {
		let mut store = WalletStore::new("w1");
		store.create_path_state("m/44'/1'/0'");
		store.insert_path_address("m/44'/1'/0'", "0/0", "yaddr0");
		store.create_path_state("m/44'/1'/0'");

		let state = store.get_path_state("m/44'/1'/0'").expect("path exists");
		assert_eq!(state.addresses.get("0/0").map(String::as_str), Some("yaddr0"));
		assert!(store.get_path_state("m/44'/1'/1'").is_none());
	}

	#[test]
	fn test_identity_index_symmetry() {
		let mut store = WalletStore::new("w1");
		store.insert_identity_id_at_index("id-a", 0);
		assert_eq!(store.get_identity_id_by_index(0), Some("id-a"));
		assert_eq!(store.get_index_by_identity_id("id-a"), Some(0));

		store.insert_identity_id_at_index("id-b", 0);
		assert_eq!(store.get_identity_id_by_index(0), Some("id-b"));
		assert_eq!(store.get_index_by_identity_id("id-a"), None);
		store.verify_indexes().expect("consistent");
	}

	#[test]
	fn test_identity_moving_to_new_index() {
		let mut store = WalletStore::new("w1");
		store.insert_identity_id_at_index("id-a", 1);
		store.insert_identity_id_at_index("id-a", 4);
		assert_eq!(store.get_identity_id_by_index(1), None);
		assert_eq!(store.get_index_by_identity_id("id-a"), Some(4));
		store.verify_indexes().expect("consistent");
	}

	#[test]
	fn test_indexed_identity_ids_keep_gaps() {
		let mut store = WalletStore::new("w1");
		store.insert_identity_id_at_index("id-c", 2);
		store.insert_identity_id_at_index("id-a", 0);
		assert_eq!(
			store.get_indexed_identity_ids(),
			vec![Some("id-a".to_string()), None, Some("id-c".to_string())]
		);

		assert_eq!(store.remove_identity_by_id("id-c"), Some(2));
		assert_eq!(store.get_indexed_identity_ids(), vec![Some("id-a".to_string())]);
		assert_eq!(store.remove_identity_by_id("id-c"), None);
	}

	#[test]
	fn test_round_trip() {
		let mut store = WalletStore::new("w1");
		store.insert_path_address("m/44'/1'/0'", "0/0", "yaddr0");
		store.insert_path_address("m/44'/1'/0'", "1/0", "yaddr1");
		store.create_path_state("m/9'/1'/5'");
		store.insert_identity_id_at_index("id-a", 0);
		store.insert_identity_id_at_index("id-d", 3);

		let exported = store.export_state().expect("exports");
		let mut restored = WalletStore::new("w1");
		restored.import_state(&exported).expect("imports");

		assert_eq!(restored.get_path_state("m/44'/1'/0'"), store.get_path_state("m/44'/1'/0'"));
		assert_eq!(restored.get_path_state("m/9'/1'/5'"), store.get_path_state("m/9'/1'/5'"));
		assert_eq!(restored.get_identity_id_by_index(3), Some("id-d"));
		assert_eq!(restored.get_index_by_identity_id("id-a"), Some(0));
		assert_eq!(restored.get_indexed_identity_ids(), store.get_indexed_identity_ids());
		assert_eq!(restored.export_state().expect("exports"), exported);
	}

	#[test]
	fn test_sparse_identity_indexes_round_trip() {
		let high = u32::MAX / 2;
		let mut store = WalletStore::new("w1");
		store.insert_identity_id_at_index("id-a", 1);
		store.insert_identity_id_at_index("id-z", high);

		let exported = store.export_state().expect("exports");
		let ids = exported["identityIds"].as_object().expect("sparse map");
		assert_eq!(ids.len(), 2);
		assert_eq!(ids["1"], json!("id-a"));
		assert_eq!(ids[high.to_string().as_str()], json!("id-z"));

		let mut restored = WalletStore::new("w1");
		restored.import_state(&exported).expect("imports");
		assert_eq!(restored.get_identity_id_by_index(high), Some("id-z"));
		assert_eq!(restored.get_index_by_identity_id("id-a"), Some(1));
		assert_eq!(
			restored.identity_ids().collect::<Vec<_>>(),
			vec![(1, "id-a"), (high, "id-z")]
		);
	}

	#[test]
	fn test_import_rejects_bad_identity_keys() {
		let mut store = WalletStore::new("w1");
		for key in ["first", "4294967296"] {
			let mut ids = serde_json::Map::new();
			ids.insert(key.to_string(), json!("id-x"));
			let snapshot = json!({ "walletId": "w1", "paths": {}, "identityIds": ids });
			match store.import_state(&snapshot) {
				Err(StorageError::SchemaMismatch(e)) => {
					assert_eq!(e.path(), Some(format!("$.identityIds.{}", key).as_str()))
				}
				other => panic!("unexpected result: {:?}", other),
			}
		}
	}

	#[test]
	fn test_import_rejects_bad_snapshots() {
		let mut store = WalletStore::new("w1");
		store.insert_identity_id_at_index("id-a", 0);

		let missing = json!({ "walletId": "w1", "paths": {} });
		let err = store.import_state(&missing).unwrap_err();
		match err {
			StorageError::SchemaMismatch(e) => assert_eq!(e.path(), Some("$.identityIds")),
			other => panic!("unexpected error: {:?}", other),
		}

		let duplicated = json!({
			"walletId": "w1",
			"paths": {},
			"identityIds": { "0": "id-x", "2": "id-x" }
		});
		assert!(matches!(
			store.import_state(&duplicated),
			Err(StorageError::InconsistentIndex(_))
		));

		assert_eq!(store.get_identity_id_by_index(0), Some("id-a"));
	}
}
