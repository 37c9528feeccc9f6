//! Per-network cache of chain data.
//!
//! A `ChainStore` holds everything the wallet knows about one network: block headers indexed
//! both by hash and by height, transactions with their confirmation metadata, instant locks,
//! watched addresses, fee state and the sync cursors. All mutation happens through `import_*`
//! and `update_*` methods that run to completion without yielding; persistence is the
//! orchestrator's business and the store never touches an adapter.

use crate::primitives::{BlockHeader, InstantLock, Transaction};
use crate::rehydrate::{SchemaNode, rehydrate_into};
use crate::storage::StorageError;
use crate::storage::events::{ChainEvent, ChainEventSink};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DisplayFromStr, serde_as};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Confirmation metadata of a stored transaction. Unknown fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
	pub block_hash: Option<String>,
	pub height: Option<u64>,
	pub is_instant_locked: Option<bool>,
	pub is_chain_locked: Option<bool>,
}

impl TransactionMetadata {
	/// Overwrite the fields the update provides and keep the rest.
	pub fn merge(&mut self, update: &TransactionMetadata) {
		if let Some(block_hash) = &update.block_hash {
			self.block_hash = Some(block_hash.clone());
		}
		if let Some(height) = update.height {
			self.height = Some(height);
		}
		if let Some(locked) = update.is_instant_locked {
			self.is_instant_locked = Some(locked);
		}
		if let Some(locked) = update.is_chain_locked {
			self.is_chain_locked = Some(locked);
		}
	}
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
	#[serde_as(as = "DisplayFromStr")]
	pub transaction: Transaction,
	pub metadata: TransactionMetadata,
}

/// Bookkeeping attached to a watched address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
	pub address: String,
	/// Derivation path the address was generated from, when known.
	pub path: Option<String>,
	pub used: bool,
	pub balance_sat: u64,
	/// Ids of the transactions touching this address.
	pub transactions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fees {
	pub min_relay: u64,
}

/// Height and timestamp of a header that is known but not yet synced past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMetadata {
	pub height: u64,
	pub time: u64,
}

/// Exported shape of a chain store.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainState {
	pub network: String,
	pub block_height: u64,
	pub last_synced_block_height: Option<u64>,
	pub last_synced_header_height: Option<u64>,
	pub fees: Fees,
	#[serde_as(as = "BTreeMap<_, DisplayFromStr>")]
	pub block_headers: BTreeMap<String, BlockHeader>,
	pub hashes_by_height: BTreeMap<u64, String>,
	pub headers_metadata: BTreeMap<String, HeaderMetadata>,
	pub transactions: BTreeMap<String, TransactionRecord>,
	#[serde_as(as = "BTreeMap<_, DisplayFromStr>")]
	pub instant_locks: BTreeMap<String, InstantLock>,
	pub addresses: BTreeMap<String, AddressRecord>,
}

impl ChainState {
	/// Check that every map is keyed by its values' ids and that headers and the height
	/// index mirror each other.
	pub fn verify_indexes(&self) -> Result<(), StorageError> {
		check_keys("block header", &self.block_headers, BlockHeader::hash)?;
		check_keys("transaction", &self.transactions, |record| {
			record.transaction.txid()
		})?;
		check_keys("instant lock", &self.instant_locks, |lock| {
			lock.txid().to_string()
		})?;
		check_keys("address", &self.addresses, |record| record.address.clone())?;

		for (height, hash) in &self.hashes_by_height {
			match self.block_headers.get(hash) {
				Some(header) if header.height() == *height => {}
				Some(header) => {
					return Err(StorageError::InconsistentIndex(format!(
						"height {} points to header {} stored at height {}",
						height,
						hash,
						header.height()
					)));
				}
				None => {
					return Err(StorageError::InconsistentIndex(format!(
						"height {} points to unknown header {}",
						height, hash
					)));
				}
			}
		}
		for (hash, header) in &self.block_headers {
			if self.hashes_by_height.get(&header.height()) != Some(hash) {
				return Err(StorageError::InconsistentIndex(format!(
					"header {} is missing from the height index",
					hash
				)));
			}
		}
		Ok(())
	}
}

fn check_keys<V>(
	kind: &str,
	entries: &BTreeMap<String, V>,
	id_of: impl Fn(&V) -> String,
) -> Result<(), StorageError> {
	for (key, value) in entries {
		let id = id_of(value);
		if *key != id {
			return Err(StorageError::InconsistentIndex(format!(
				"{} {} stored under key {}",
				kind, id, key
			)));
		}
	}
	Ok(())
}

/// Decides whether a stored transaction concerns the owner of the store.
pub trait TransactionFilter: Send + Sync {
	fn is_relevant(&self, store: &ChainStore, txid: &str) -> bool;
}

impl<T: TransactionFilter + ?Sized> TransactionFilter for std::sync::Arc<T> {
	fn is_relevant(&self, store: &ChainStore, txid: &str) -> bool {
		(**self).is_relevant(store, txid)
	}
}

/// Relevant when any watched address lists the transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchedAddressFilter;

impl TransactionFilter for WatchedAddressFilter {
	fn is_relevant(&self, store: &ChainStore, txid: &str) -> bool {
		store
			.addresses()
			.any(|record| record.transactions.iter().any(|id| id == txid))
	}
}

pub struct ChainStore {
	state: ChainState,
	filter: Box<dyn TransactionFilter>,
	sink: Option<ChainEventSink>,
	/// Transactions already reported as relevant
	notified: HashSet<String>,
	/// Transactions already reported as confirmed
	notified_confirmed: HashSet<String>,
}

impl ChainStore {
	pub fn new(network: impl Into<String>) -> Self {
		Self {
			state: ChainState {
				network: network.into(),
				..ChainState::default()
			},
			filter: Box::new(WatchedAddressFilter),
			sink: None,
			notified: HashSet::new(),
			notified_confirmed: HashSet::new(),
		}
	}

	/// Route this store's events to `sink`.
	pub fn with_event_sink(mut self, sink: ChainEventSink) -> Self {
		self.sink = Some(sink);
		self
	}

	/// Replace the relevance predicate used by [`ChainStore::consider_transaction`].
	pub fn with_filter(mut self, filter: Box<dyn TransactionFilter>) -> Self {
		self.filter = filter;
		self
	}

	pub fn set_filter(&mut self, filter: Box<dyn TransactionFilter>) {
		self.filter = filter;
	}

	pub fn network(&self) -> &str {
		&self.state.network
	}

	pub fn state(&self) -> &ChainState {
		&self.state
	}

	pub fn block_height(&self) -> u64 {
		self.state.block_height
	}

	pub fn last_synced_block_height(&self) -> Option<u64> {
		self.state.last_synced_block_height
	}

	pub fn last_synced_header_height(&self) -> Option<u64> {
		self.state.last_synced_header_height
	}

	pub fn fees(&self) -> Fees {
		self.state.fees
	}

	pub fn update_fees(&mut self, min_relay: u64) {
		self.state.fees.min_relay = min_relay;
	}

	pub fn update_chain_height(&mut self, height: u64) {
		self.state.block_height = height;
	}

	pub fn update_last_synced_block_height(&mut self, height: u64) {
		self.state.last_synced_block_height = Some(height);
	}

	pub fn update_last_synced_header_height(&mut self, height: u64) {
		self.state.last_synced_header_height = Some(height);
	}

	/// Store a header under its hash and index it by height.
	///
	/// A different header already indexed at the same height is replaced, and a header
	/// re-imported at another height moves, so both maps keep mirroring each other.
	pub fn import_block_header(&mut self, header: BlockHeader) {
		let hash = header.hash();
		let height = header.height();

		if let Some(previous) = self.state.hashes_by_height.get(&height) {
			if *previous != hash {
				debug!(
					"Replacing header {} at height {} with {}",
					previous, height, hash
				);
				let previous = previous.clone();
				self.state.block_headers.remove(&previous);
			}
		}
		if let Some(existing) = self.state.block_headers.get(&hash) {
			if existing.height() != height {
				let stale_height = existing.height();
				self.state.hashes_by_height.remove(&stale_height);
			}
		}

		self.state.block_headers.insert(hash.clone(), header);
		self.state.hashes_by_height.insert(height, hash.clone());
		if height > self.state.block_height {
			self.state.block_height = height;
		}

		debug_assert_eq!(
			self.state.hashes_by_height.get(&height),
			Some(&hash),
			"height index out of sync"
		);
	}

	/// Store or merge a transaction. Metadata fields present in `metadata` overwrite the
	/// stored ones; absent fields keep whatever was known before.
	pub fn import_transaction(
		&mut self,
		transaction: Transaction,
		metadata: Option<TransactionMetadata>,
	) -> &TransactionRecord {
		let txid = transaction.txid();
		let record = self
			.state
			.transactions
			.entry(txid)
			.or_insert_with(|| TransactionRecord {
				transaction,
				metadata: TransactionMetadata::default(),
			});
		if let Some(update) = metadata {
			record.metadata.merge(&update);
		}
		record
	}

	/// Import a batch of transactions and report the relevant ones.
	///
	/// Returns the ids of the transactions the filter considers relevant.
	pub fn import_transactions<I>(&mut self, transactions: I) -> Vec<String>
	where
		I: IntoIterator<Item = (Transaction, Option<TransactionMetadata>)>,
	{
		let mut relevant = Vec::new();
		for (transaction, metadata) in transactions {
			let txid = transaction.txid();
			self.import_transaction(transaction, metadata);
			if self.consider_transaction(&txid) {
				relevant.push(txid);
			}
		}
		relevant
	}

	pub fn import_instant_lock(&mut self, lock: InstantLock) {
		self.state.instant_locks.insert(lock.txid().to_string(), lock);
	}

	pub fn import_address(&mut self, record: AddressRecord) {
		self.state.addresses.insert(record.address.clone(), record);
	}

	pub fn remove_address(&mut self, address: &str) -> Option<AddressRecord> {
		self.state.addresses.remove(address)
	}

	pub fn update_headers_metadata<I>(&mut self, entries: I)
	where
		I: IntoIterator<Item = (String, HeaderMetadata)>,
	{
		self.state.headers_metadata.extend(entries);
	}

	/// Drop header metadata below `height`.
	pub fn prune_headers_metadata(&mut self, height: u64) {
		self.state
			.headers_metadata
			.retain(|_, metadata| metadata.height >= height);
	}

	/// Report whether a stored transaction is relevant, notifying once per transaction.
	///
	/// Unknown transactions are never relevant.
	pub fn consider_transaction(&mut self, txid: &str) -> bool {
		let height = match self.state.transactions.get(txid) {
			Some(record) => record.metadata.height,
			None => return false,
		};
		if !self.filter.is_relevant(self, txid) {
			return false;
		}

		if self.notified.insert(txid.to_string()) {
			self.emit(ChainEvent::RelevantTransaction {
				txid: txid.to_string(),
				confirmed: height.is_some(),
			});
		}
		if let Some(height) = height {
			if self.notified_confirmed.insert(txid.to_string()) {
				self.emit(ChainEvent::ConfirmedTransaction {
					txid: txid.to_string(),
					height,
				});
			}
		}
		true
	}

	pub fn get_address(&self, address: &str) -> Option<&AddressRecord> {
		self.state.addresses.get(address)
	}

	pub fn get_block_header(&self, hash: &str) -> Option<&BlockHeader> {
		self.state.block_headers.get(hash)
	}

	pub fn get_block_hash_by_height(&self, height: u64) -> Option<&str> {
		self.state.hashes_by_height.get(&height).map(String::as_str)
	}

	pub fn get_header_metadata(&self, hash: &str) -> Option<&HeaderMetadata> {
		self.state.headers_metadata.get(hash)
	}

	pub fn get_instant_lock(&self, txid: &str) -> Option<&InstantLock> {
		self.state.instant_locks.get(txid)
	}

	pub fn get_transaction(&self, txid: &str) -> Option<&TransactionRecord> {
		self.state.transactions.get(txid)
	}

	pub fn addresses(&self) -> impl Iterator<Item = &AddressRecord> {
		self.state.addresses.values()
	}

	pub fn transactions(&self) -> impl Iterator<Item = &TransactionRecord> {
		self.state.transactions.values()
	}

	pub fn verify_indexes(&self) -> Result<(), StorageError> {
		self.state.verify_indexes()
	}

	/// Shape of an exported chain store.
	pub fn schema() -> SchemaNode {
		SchemaNode::object([
			("network", SchemaNode::string()),
			("blockHeight", SchemaNode::unsigned()),
			(
				"lastSyncedBlockHeight",
				SchemaNode::nullable(SchemaNode::unsigned()),
			),
			(
				"lastSyncedHeaderHeight",
				SchemaNode::nullable(SchemaNode::unsigned()),
			),
			(
				"fees",
				SchemaNode::object([("minRelay", SchemaNode::unsigned())]),
			),
			(
				"blockHeaders",
				SchemaNode::map(SchemaNode::factory::<BlockHeader>("BlockHeader")),
			),
			(
				"hashesByHeight",
				SchemaNode::index_map(u64::MAX, SchemaNode::string()),
			),
			(
				"headersMetadata",
				SchemaNode::map(SchemaNode::object([
					("height", SchemaNode::unsigned()),
					("time", SchemaNode::unsigned()),
				])),
			),
			(
				"transactions",
				SchemaNode::map(SchemaNode::object([
					(
						"transaction",
						SchemaNode::factory::<Transaction>("Transaction"),
					),
					(
						"metadata",
						SchemaNode::object([
							("blockHash", SchemaNode::nullable(SchemaNode::string())),
							("height", SchemaNode::nullable(SchemaNode::unsigned())),
							(
								"isInstantLocked",
								SchemaNode::nullable(SchemaNode::boolean()),
							),
							(
								"isChainLocked",
								SchemaNode::nullable(SchemaNode::boolean()),
							),
						]),
					),
				])),
			),
			(
				"instantLocks",
				SchemaNode::map(SchemaNode::factory::<InstantLock>("InstantLock")),
			),
			(
				"addresses",
				SchemaNode::map(SchemaNode::object([
					("address", SchemaNode::string()),
					("path", SchemaNode::nullable(SchemaNode::string())),
					("used", SchemaNode::boolean()),
					("balanceSat", SchemaNode::unsigned()),
					("transactions", SchemaNode::array(SchemaNode::string())),
				])),
			),
		])
	}

	/// Export the store as plain JSON, domain values in their canonical string form.
	pub fn export_state(&self) -> Result<Value, StorageError> {
		Ok(serde_json::to_value(&self.state)?)
	}

	/// Validate an exported snapshot and convert it into typed state.
	pub fn parse_state(blob: &Value) -> Result<ChainState, StorageError> {
		let state: ChainState = rehydrate_into(blob, &Self::schema())?;
		state.verify_indexes()?;
		Ok(state)
	}

	/// Replace the store's content with a previously exported snapshot.
	///
	/// The snapshot is fully validated before anything is replaced, so a rejected snapshot
	/// leaves the store untouched. The store keeps its own network identifier.
	pub fn import_state(&mut self, blob: &Value) -> Result<(), StorageError> {
		let state = Self::parse_state(blob)?;
		self.replace_state(state);
		Ok(())
	}

	/// Swap in state produced by [`ChainStore::parse_state`].
	pub fn replace_state(&mut self, mut state: ChainState) {
		if state.network != self.state.network {
			warn!(
				"Importing chain state of network {} into store for {}",
				state.network, self.state.network
			);
			state.network = self.state.network.clone();
		}

		debug!(
			"Imported chain state for {}: {} headers, {} transactions, {} addresses",
			state.network,
			state.block_headers.len(),
			state.transactions.len(),
			state.addresses.len()
		);
		self.state = state;
		self.notified.clear();
		self.notified_confirmed.clear();
	}

	fn emit(&self, event: ChainEvent) {
		if let Some(sink) = &self.sink {
			sink(event);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::primitives::HEADER_SIZE;
	use crate::rehydrate::RehydrateError;
	use serde_json::json;
	use std::sync::{Arc, Mutex};

	fn header(height: u64, fill: u8) -> BlockHeader {
		BlockHeader::new(height, vec![fill; HEADER_SIZE]).expect("valid header")
	}

	fn tx(fill: u8) -> Transaction {
		Transaction::new(vec![fill; 40]).expect("valid tx")
	}

	fn recording_store() -> (ChainStore, Arc<Mutex<Vec<ChainEvent>>>) {
		let events = Arc::new(Mutex::new(Vec::new()));
		let captured = events.clone();
		let store = ChainStore::new("testnet").with_event_sink(Arc::new(move |event| {
			captured.lock().unwrap().push(event);
		}));
		(store, events)
	}

	fn populated_store() -> ChainStore {
		let mut store = ChainStore::new("testnet");
		store.import_block_header(header(5000, 1));
		store.import_block_header(header(5001, 2));
		let transaction = tx(7);
		let txid = transaction.txid();
		store.import_transaction(
			transaction,
			Some(TransactionMetadata {
				height: Some(5000),
				block_hash: Some(header(5000, 1).hash()),
				..TransactionMetadata::default()
			}),
		);
		store.import_transaction(tx(8), None);
		store.import_instant_lock(InstantLock::new(txid.clone(), vec![5u8; 16]).expect("lock"));
		store.import_address(AddressRecord {
			address: "yNPbcFfabtNmmxKdGwhHomdYfVs6gikbPf".to_string(),
			path: Some("m/44'/1'/0'/0/0".to_string()),
			used: true,
			balance_sat: 150_000,
			transactions: vec![txid],
		});
		store.update_fees(1000);
		store.update_last_synced_block_height(5001);
		store.update_headers_metadata([(
			header(5001, 2).hash(),
			HeaderMetadata {
				height: 5001,
				time: 1_700_000_000,
			},
		)]);
		store
	}

	#[test]
	fn test_metadata_merge_is_non_destructive() {
		let mut store = ChainStore::new("testnet");
		let transaction = tx(1);
		let txid = transaction.txid();

		store.import_transaction(
			transaction.clone(),
			Some(TransactionMetadata {
				height: Some(100),
				..TransactionMetadata::default()
			}),
		);
		let record = store.import_transaction(
			transaction,
			Some(TransactionMetadata {
				is_instant_locked: Some(true),
				..TransactionMetadata::default()
			}),
		);

		assert_eq!(record.metadata.height, Some(100));
		assert_eq!(record.metadata.is_instant_locked, Some(true));
		assert_eq!(record.metadata.block_hash, None);
		assert_eq!(record.metadata.is_chain_locked, None);
		assert_eq!(store.transactions().count(), 1);
		assert!(store.get_transaction(&txid).is_some());
	}

	#[test]
	fn test_explicit_metadata_overwrites() {
		let mut store = ChainStore::new("testnet");
		let update = |height| TransactionMetadata {
			height: Some(height),
			block_hash: Some(format!("hash-{}", height)),
			..TransactionMetadata::default()
		};
		store.import_transaction(tx(2), Some(update(10)));
		let record = store.import_transaction(tx(2), Some(update(11)));
		assert_eq!(record.metadata.height, Some(11));
		assert_eq!(record.metadata.block_hash.as_deref(), Some("hash-11"));
	}

	#[test]
	fn test_height_hash_symmetry() {
		let mut store = ChainStore::new("testnet");
		let first = header(10, 1);
		store.import_block_header(first.clone());
		store.import_block_header(first.clone());
		assert_eq!(store.get_block_hash_by_height(10), Some(first.hash().as_str()));

		// a competing header at the same height replaces the old one
		let competing = header(10, 9);
		store.import_block_header(competing.clone());
		assert!(store.get_block_header(&first.hash()).is_none());
		assert_eq!(
			store.get_block_hash_by_height(10),
			Some(competing.hash().as_str())
		);

		// the same header re-imported at another height moves
		let moved = BlockHeader::new(11, competing.raw().to_vec()).expect("valid header");
		store.import_block_header(moved);
		assert_eq!(store.get_block_hash_by_height(10), None);
		assert_eq!(
			store.get_block_hash_by_height(11),
			Some(competing.hash().as_str())
		);
		store.verify_indexes().expect("indexes consistent");
		assert_eq!(store.block_height(), 11);
	}

	#[test]
	fn test_round_trip() {
		let store = populated_store();
		let exported = store.export_state().expect("exports");

		let mut restored = ChainStore::new("testnet");
		restored.import_state(&exported).expect("imports");

		assert_eq!(restored.state(), store.state());
		for record in store.transactions() {
			let txid = record.transaction.txid();
			let restored_record = restored.get_transaction(&txid).expect("tx restored");
			assert_eq!(
				restored_record.transaction.to_string(),
				record.transaction.to_string()
			);
			assert_eq!(restored_record.metadata, record.metadata);
		}
		assert_eq!(restored.export_state().expect("exports"), exported);
	}

	#[test]
	fn test_header_round_trip_scenario() {
		let mut store = ChainStore::new("testnet");
		let h1 = header(5000, 42);
		store.import_block_header(h1.clone());

		let exported = store.export_state().expect("exports");
		let mut fresh = ChainStore::new("testnet");
		fresh.import_state(&exported).expect("imports");

		let restored = fresh.get_block_header(&h1.hash()).expect("header restored");
		assert_eq!(restored.to_string(), h1.to_string());
		assert_eq!(fresh.get_block_hash_by_height(5000), Some(h1.hash().as_str()));
	}

	#[test]
	fn test_rejected_snapshot_leaves_store_untouched() {
		let mut store = populated_store();
		let before = store.state().clone();

		let mut snapshot = store.export_state().expect("exports");
		let txid = tx(7).txid();
		snapshot["transactions"][txid.as_str()]["metadata"]
			.as_object_mut()
			.expect("metadata object")
			.remove("height");

		match store.import_state(&snapshot) {
			Err(StorageError::SchemaMismatch(RehydrateError::MissingField { path })) => {
				assert_eq!(path, format!("$.transactions.{}.metadata.height", txid));
			}
			other => panic!("unexpected result: {:?}", other),
		}
		assert_eq!(store.state(), &before);
	}

	#[test]
	fn test_inconsistent_snapshot_is_rejected() {
		let store = populated_store();
		let mut snapshot = store.export_state().expect("exports");
		snapshot["hashesByHeight"]["7"] = json!("deadbeef");

		let mut target = ChainStore::new("testnet");
		let err = target.import_state(&snapshot).unwrap_err();
		assert!(matches!(err, StorageError::InconsistentIndex(_)));
		assert!(target.state().block_headers.is_empty());
	}

	fn rekey(snapshot: &mut Value, map: &str, from: &str, to: &str) {
		let entries = snapshot[map].as_object_mut().expect("map object");
		let value = entries.remove(from).expect("entry present");
		entries.insert(to.to_string(), value);
	}

	#[test]
	fn test_entries_under_foreign_keys_are_rejected() {
		let store = populated_store();
		let exported = store.export_state().expect("exports");
		let hash = header(5000, 1).hash();
		let txid = tx(7).txid();

		let mut moved_header = exported.clone();
		rekey(&mut moved_header, "blockHeaders", &hash, "abc");
		moved_header["hashesByHeight"]["5000"] = json!("abc");

		let mut moved_transaction = exported.clone();
		rekey(&mut moved_transaction, "transactions", &txid, "abc");

		let mut moved_lock = exported.clone();
		rekey(&mut moved_lock, "instantLocks", &txid, &tx(8).txid());

		let mut moved_address = exported.clone();
		rekey(
			&mut moved_address,
			"addresses",
			"yNPbcFfabtNmmxKdGwhHomdYfVs6gikbPf",
			"yOther",
		);

		for snapshot in [moved_header, moved_transaction, moved_lock, moved_address] {
			let mut target = ChainStore::new("testnet");
			assert!(matches!(
				target.import_state(&snapshot),
				Err(StorageError::InconsistentIndex(_))
			));
			assert!(target.state().block_headers.is_empty());
		}
	}

	#[test]
	fn test_out_of_range_numbers_report_path() {
		let store = populated_store();
		let exported = store.export_state().expect("exports");

		let mut negative = exported.clone();
		negative["blockHeight"] = json!(-1);
		let mut fractional = exported.clone();
		fractional["fees"]["minRelay"] = json!(1.5);
		let mut bad_height_key = exported.clone();
		rekey(&mut bad_height_key, "hashesByHeight", "5000", "five");

		let expected = [
			(negative, "$.blockHeight"),
			(fractional, "$.fees.minRelay"),
			(bad_height_key, "$.hashesByHeight.five"),
		];
		for (snapshot, path) in expected {
			match ChainStore::parse_state(&snapshot) {
				Err(StorageError::SchemaMismatch(e)) => assert_eq!(e.path(), Some(path)),
				other => panic!("unexpected result for {}: {:?}", path, other),
			}
		}
	}

	#[test]
	fn test_import_keeps_own_network() {
		let store = populated_store();
		let snapshot = store.export_state().expect("exports");
		let mut mainnet = ChainStore::new("mainnet");
		mainnet.import_state(&snapshot).expect("imports");
		assert_eq!(mainnet.network(), "mainnet");
		assert_eq!(mainnet.state().transactions.len(), 2);
	}

	#[test]
	fn test_consider_transaction_notifies_once() {
		let (mut store, events) = recording_store();
		let watched = tx(3);
		let unrelated = tx(4);
		store.import_address(AddressRecord {
			address: "yaddr".to_string(),
			transactions: vec![watched.txid()],
			..AddressRecord::default()
		});

		let relevant = store.import_transactions(vec![
			(watched.clone(), None),
			(unrelated.clone(), None),
		]);
		assert_eq!(relevant, vec![watched.txid()]);
		assert!(!store.consider_transaction("missing"));

		// confirmation arrives later
		store.import_transaction(
			watched.clone(),
			Some(TransactionMetadata {
				height: Some(77),
				..TransactionMetadata::default()
			}),
		);
		assert!(store.consider_transaction(&watched.txid()));
		assert!(store.consider_transaction(&watched.txid()));

		let events = events.lock().unwrap();
		assert_eq!(
			*events,
			vec![
				ChainEvent::RelevantTransaction {
					txid: watched.txid(),
					confirmed: false,
				},
				ChainEvent::ConfirmedTransaction {
					txid: watched.txid(),
					height: 77,
				},
			]
		);
	}

	#[test]
	fn test_custom_filter() {
		struct Everything;
		impl TransactionFilter for Everything {
			fn is_relevant(&self, _store: &ChainStore, _txid: &str) -> bool {
				true
			}
		}

		let mut store = ChainStore::new("testnet").with_filter(Box::new(Everything));
		let relevant = store.import_transactions(vec![(tx(5), None), (tx(6), None)]);
		assert_eq!(relevant.len(), 2);
	}

	#[test]
	fn test_prune_headers_metadata() {
		let mut store = ChainStore::new("testnet");
		store.update_headers_metadata((1..=5).map(|height| {
			(
				format!("hash-{}", height),
				HeaderMetadata {
					height,
					time: 1_700_000_000 + height,
				},
			)
		}));
		store.prune_headers_metadata(4);
		assert!(store.get_header_metadata("hash-3").is_none());
		assert!(store.get_header_metadata("hash-4").is_some());
		assert!(store.get_header_metadata("hash-5").is_some());
	}

	#[test]
	fn test_lookups_of_unknown_keys() {
		let store = ChainStore::new("testnet");
		assert!(store.get_address("nope").is_none());
		assert!(store.get_block_header("nope").is_none());
		assert!(store.get_instant_lock("nope").is_none());
		assert!(store.get_transaction("nope").is_none());
	}
}
