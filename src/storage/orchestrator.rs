//! Storage orchestrator and integration point for the chain and wallet stores.
//!
//! This module defines [`Storage`], which owns one [`ChainStore`] per network and one
//! [`WalletStore`] per wallet, connects them to a persistence adapter and keeps the persisted
//! snapshot up to date.
//!
//! The orchestrator is responsible for:
//! - Resolving the adapter on `configure` and rehydrating persisted state at most once
//! - Creating stores lazily, with their events routed through the shared [`EventDispatcher`]
//! - Recording modifications and letting the autosave worker write only when something changed
//! - Applying the purge policy when a persisted entry fails to rehydrate
//!
//! Stores are reached through closures (`with_chain_store`, `with_wallet_store`) so no caller
//! keeps a store handle across a [`Storage::reset`]. The closures run under the orchestrator's
//! lock and must not call back into the same `Storage`.
//!
//! Persisted keys:
//! - `chains`: network -> exported chain store
//! - `wallets`: wallet id -> exported wallet store
//! - `wallet_<id>`: `{ version, chains, wallet, unsafeOptions }` for the current wallet

use crate::rehydrate::{RehydrateError, ROOT_PATH, SchemaNode, kind_of, rehydrate};
use crate::storage::{
    adapters::{FileAdapter, InMemoryAdapter, StorageAdapter},
    chain_store::{ChainState, ChainStore, TransactionFilter},
    config::StorageConfig,
    events::{EventDispatcher, StorageEvent},
    types::{PurgeScope, STATE_VERSION, StorageError, UnsafeOptions},
    wallet_store::WalletStore,
    worker::AutosaveWorker,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const CHAINS_KEY: &str = "chains";
pub const WALLETS_KEY: &str = "wallets";

/// Adapter key of the per-wallet payload.
pub fn wallet_key(wallet_id: &str) -> String {
    format!("wallet_{}", wallet_id)
}

/// Payload written under [`wallet_key`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletPayload {
    version: u32,
    #[serde(default)]
    chains: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wallet: Option<Value>,
    #[serde(default)]
    unsafe_options: UnsafeOptions,
}

/// Validated state read from the adapter, not yet applied to the stores.
#[derive(Default)]
struct Snapshot {
    chains: Vec<(String, ChainState)>,
    wallets: Vec<(String, WalletStore)>,
    unsafe_options: Option<UnsafeOptions>,
}

struct StorageState {
    config: StorageConfig,
    adapter: Option<Arc<dyn StorageAdapter>>,
    configured: bool,
    chains: HashMap<String, ChainStore>,
    wallets: HashMap<String, WalletStore>,
    current_network: String,
    current_wallet_id: Option<String>,
    transaction_filter: Option<Arc<dyn TransactionFilter>>,
    last_rehydrate: Option<Instant>,
    last_save: Option<Instant>,
    last_modified: Option<Instant>,
}

impl StorageState {
    fn new(config: StorageConfig) -> Self {
        Self {
            current_network: config.network.clone(),
            current_wallet_id: config.wallet_id.clone(),
            config,
            adapter: None,
            configured: false,
            chains: HashMap::new(),
            wallets: HashMap::new(),
            transaction_filter: None,
            last_rehydrate: None,
            last_save: None,
            last_modified: None,
        }
    }

    fn chain_store_mut(&mut self, network: &str, events: &EventDispatcher) -> &mut ChainStore {
        let filter = self.transaction_filter.clone();
        self.chains.entry(network.to_string()).or_insert_with(|| {
            debug!("Creating chain store for {}", network);
            let store = ChainStore::new(network).with_event_sink(events.chain_sink(network));
            match filter {
                Some(filter) => store.with_filter(Box::new(filter)),
                None => store,
            }
        })
    }

    fn wallet_store_mut(&mut self, wallet_id: &str) -> &mut WalletStore {
        self.wallets
            .entry(wallet_id.to_string())
            .or_insert_with(|| {
                debug!("Creating wallet store for {}", wallet_id);
                WalletStore::new(wallet_id)
            })
    }

    fn needs_save(&self) -> bool {
        match (self.last_modified, self.last_save) {
            (Some(modified), Some(saved)) => modified > saved,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

pub(crate) struct StorageInner {
    state: Mutex<StorageState>,
    events: EventDispatcher,
    /// Serializes rehydration so it runs at most once.
    rehydration: tokio::sync::Mutex<()>,
    worker: Mutex<Option<AutosaveWorker>>,
}

/// Owner of all chain and wallet stores, and of their persistence.
///
/// Cloning is cheap; clones share the same stores.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                state: Mutex::new(StorageState::new(config)),
                events: EventDispatcher::new(),
                rehydration: tokio::sync::Mutex::new(()),
                worker: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn upgrade(inner: &Weak<StorageInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn lock(&self) -> MutexGuard<'_, StorageState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<AutosaveWorker>> {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach an adapter, rehydrate and start autosaving, as the configuration asks.
    ///
    /// Without an explicit adapter, a [`FileAdapter`] is used when `dataDir` is set and an
    /// [`InMemoryAdapter`] otherwise. Only the first successful call has any effect; later
    /// calls return `Ok(false)`.
    pub async fn configure(
        &self,
        adapter: Option<Arc<dyn StorageAdapter>>,
    ) -> Result<bool, StorageError> {
        let (rehydrate, autosave) = {
            let mut state = self.lock();
            if state.configured {
                debug!("Storage already configured, ignoring");
                return Ok(false);
            }
            state.configured = true;
            let adapter = adapter.unwrap_or_else(|| default_adapter(&state.config));
            state.adapter = Some(adapter);
            (state.config.rehydrate, state.config.autosave)
        };

        if rehydrate {
            if let Err(e) = self.rehydrate_state().await {
                let mut state = self.lock();
                state.configured = false;
                state.adapter = None;
                return Err(e);
            }
        }

        if autosave {
            self.start_worker();
        }

        info!("Storage configured");
        self.inner.events.dispatch(StorageEvent::Configured);
        Ok(true)
    }

    pub fn is_configured(&self) -> bool {
        self.lock().configured
    }

    pub fn adapter(&self) -> Option<Arc<dyn StorageAdapter>> {
        self.lock().adapter.clone()
    }

    pub fn config(&self) -> StorageConfig {
        self.lock().config.clone()
    }

    /// Subscribe to lifecycle and chain events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.events.subscribe()
    }

    pub fn current_network(&self) -> String {
        self.lock().current_network.clone()
    }

    pub fn set_current_network(&self, network: impl Into<String>) {
        self.lock().current_network = network.into();
    }

    pub fn current_wallet_id(&self) -> Option<String> {
        self.lock().current_wallet_id.clone()
    }

    pub fn set_current_wallet_id(&self, wallet_id: Option<String>) {
        self.lock().current_wallet_id = wallet_id;
    }

    /// Install the relevance predicate on every chain store, present and future.
    pub fn set_transaction_filter(&self, filter: Arc<dyn TransactionFilter>) {
        let mut state = self.lock();
        for store in state.chains.values_mut() {
            store.set_filter(Box::new(filter.clone()));
        }
        state.transaction_filter = Some(filter);
    }

    /// Run `f` on the chain store of `network`, creating the store if needed.
    pub fn with_chain_store<R>(&self, network: &str, f: impl FnOnce(&mut ChainStore) -> R) -> R {
        let mut state = self.lock();
        f(state.chain_store_mut(network, &self.inner.events))
    }

    /// Run `f` on the chain store of the current network.
    pub fn with_default_chain_store<R>(&self, f: impl FnOnce(&mut ChainStore) -> R) -> R {
        let mut state = self.lock();
        let network = state.current_network.clone();
        f(state.chain_store_mut(&network, &self.inner.events))
    }

    /// Run `f` on the wallet store of `wallet_id`, creating the store if needed.
    pub fn with_wallet_store<R>(&self, wallet_id: &str, f: impl FnOnce(&mut WalletStore) -> R) -> R {
        let mut state = self.lock();
        f(state.wallet_store_mut(wallet_id))
    }

    /// Run `f` on the current wallet's store. `None` when no wallet is selected.
    pub fn with_current_wallet_store<R>(&self, f: impl FnOnce(&mut WalletStore) -> R) -> Option<R> {
        let mut state = self.lock();
        let wallet_id = state.current_wallet_id.clone()?;
        Some(f(state.wallet_store_mut(&wallet_id)))
    }

    pub fn has_chain_store(&self, network: &str) -> bool {
        self.lock().chains.contains_key(network)
    }

    pub fn has_wallet_store(&self, wallet_id: &str) -> bool {
        self.lock().wallets.contains_key(wallet_id)
    }

    pub fn networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.lock().chains.keys().cloned().collect();
        networks.sort();
        networks
    }

    pub fn wallet_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().wallets.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Height the next block synchronization of the current network starts from.
    ///
    /// With `skip_synchronization` the chain tip is returned. Otherwise the higher of the
    /// `skipSynchronizationBeforeHeight` option and the last synced block, falling back to 1.
    pub fn start_block_height(&self, skip_synchronization: bool) -> u64 {
        let state = self.lock();
        let chain = state.chains.get(&state.current_network);
        if skip_synchronization {
            return chain.map(ChainStore::block_height).unwrap_or(0);
        }

        let last_synced = chain.and_then(ChainStore::last_synced_block_height);
        let skip_before = state
            .config
            .unsafe_options
            .skip_synchronization_before_height;
        match (skip_before, last_synced) {
            (Some(skip_before), Some(last_synced)) => skip_before.max(last_synced),
            (Some(skip_before), None) => skip_before,
            (None, Some(last_synced)) => last_synced,
            (None, None) => 1,
        }
    }

    /// Record that the stores changed and the next autosave tick must persist them.
    pub fn schedule_state_save(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        // A change stamped at the instant of the last snapshot must still compare as newer.
        let stamp = match state.last_save {
            Some(saved) if now <= saved => saved + Duration::from_nanos(1),
            _ => now,
        };
        state.last_modified = Some(stamp);
    }

    pub fn last_rehydrate(&self) -> Option<Instant> {
        self.lock().last_rehydrate
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.lock().last_save
    }

    pub fn last_modified(&self) -> Option<Instant> {
        self.lock().last_modified
    }

    /// Load persisted state into the stores.
    ///
    /// Runs at most once: later and concurrent calls return `Ok(false)` without touching the
    /// adapter. Also a no-op when no adapter is configured. Entries are validated before any
    /// store is changed, so a fatal failure leaves every store as it was.
    pub async fn rehydrate_state(&self) -> Result<bool, StorageError> {
        let _guard = self.inner.rehydration.lock().await;

        let (adapter, wallet_id, purge) = {
            let state = self.lock();
            if state.last_rehydrate.is_some() {
                debug!("State already rehydrated");
                return Ok(false);
            }
            let Some(adapter) = state.adapter.clone() else {
                debug!("No storage adapter configured, skipping rehydration");
                return Ok(false);
            };
            let purge = state
                .config
                .purge_on_error
                .then_some(state.config.purge_scope);
            (adapter, state.current_wallet_id.clone(), purge)
        };

        match load_snapshot(adapter.as_ref(), wallet_id.as_deref(), purge).await {
            Ok(snapshot) => {
                let (networks, wallets) = self.commit_snapshot(snapshot);
                info!(
                    "Rehydrated state: {} networks, {} wallets",
                    networks, wallets
                );
                self.inner.events.dispatch(StorageEvent::RehydrateStateSuccess);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to rehydrate state: {}", e);
                self.inner.events.dispatch(StorageEvent::RehydrateStateFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn commit_snapshot(&self, snapshot: Snapshot) -> (usize, usize) {
        let mut state = self.lock();
        let counts = (snapshot.chains.len(), snapshot.wallets.len());

        for (network, chain_state) in snapshot.chains {
            state
                .chain_store_mut(&network, &self.inner.events)
                .replace_state(chain_state);
        }
        for (wallet_id, store) in snapshot.wallets {
            state.wallets.insert(wallet_id, store);
        }
        if let Some(options) = snapshot.unsafe_options {
            if state.config.unsafe_options == UnsafeOptions::default() {
                state.config.unsafe_options = options;
            }
        }

        state.last_rehydrate = Some(Instant::now());
        counts
    }

    /// Write the stores to the adapter.
    ///
    /// With a current wallet this is a single write of its `wallet_<id>` payload, otherwise the
    /// `chains` and `wallets` collections are written. Returns `Ok(false)` when no adapter is
    /// configured.
    pub async fn save_state(&self) -> Result<bool, StorageError> {
        let Some(adapter) = self.adapter() else {
            debug!("No storage adapter configured, skipping save");
            return Ok(false);
        };

        match self.write_snapshot(adapter.as_ref()).await {
            Ok(snapshot_at) => {
                {
                    let mut state = self.lock();
                    if state.last_save.is_none_or(|saved| saved < snapshot_at) {
                        state.last_save = Some(snapshot_at);
                    }
                }
                debug!("State saved");
                self.inner.events.dispatch(StorageEvent::SaveStateSuccess);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to save state: {}", e);
                self.inner.events.dispatch(StorageEvent::SaveStateFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Returns the instant the written snapshot was taken.
    async fn write_snapshot(&self, adapter: &dyn StorageAdapter) -> Result<Instant, StorageError> {
        let (writes, snapshot_at) = self.export_snapshot()?;
        for (key, value) in writes {
            adapter.set(&key, value).await?;
        }
        Ok(snapshot_at)
    }

    fn export_snapshot(&self) -> Result<(Vec<(String, Value)>, Instant), StorageError> {
        let state = self.lock();
        let snapshot_at = Instant::now();

        let chains = state
            .chains
            .iter()
            .map(|(network, store)| Ok((network.clone(), store.export_state()?)))
            .collect::<Result<Map<String, Value>, StorageError>>()?;

        let writes = match &state.current_wallet_id {
            Some(wallet_id) => {
                let wallet = state
                    .wallets
                    .get(wallet_id)
                    .map(WalletStore::export_state)
                    .transpose()?;
                let payload = WalletPayload {
                    version: STATE_VERSION,
                    chains,
                    wallet,
                    unsafe_options: state.config.unsafe_options.clone(),
                };
                vec![(wallet_key(wallet_id), serde_json::to_value(payload)?)]
            }
            None => {
                let wallets = state
                    .wallets
                    .iter()
                    .map(|(wallet_id, store)| Ok((wallet_id.clone(), store.export_state()?)))
                    .collect::<Result<Map<String, Value>, StorageError>>()?;
                vec![
                    (CHAINS_KEY.to_string(), Value::Object(chains)),
                    (WALLETS_KEY.to_string(), Value::Object(wallets)),
                ]
            }
        };

        Ok((writes, snapshot_at))
    }

    /// Save if anything changed since the last save. Called on every autosave tick.
    pub async fn autosave_tick(&self) -> Result<bool, StorageError> {
        let needs_save = self.lock().needs_save();
        if !needs_save {
            return Ok(false);
        }
        self.save_state().await
    }

    /// Arm the autosave timer. Returns `false` if it was already running or no Tokio runtime
    /// is available.
    pub fn start_worker(&self) -> bool {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|running| !running.is_finished()) {
            debug!("Autosave worker already running");
            return false;
        }

        let period = self.lock().config.autosave_interval();
        match AutosaveWorker::spawn(Arc::downgrade(&self.inner), period) {
            Some(started) => {
                *worker = Some(started);
                true
            }
            None => false,
        }
    }

    /// Cancel the autosave timer. Safe to call when it is not running.
    pub fn stop_worker(&self) -> bool {
        match self.lock_worker().take() {
            Some(worker) => {
                worker.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_worker_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stop autosaving and drop every store, the adapter and all timestamps.
    ///
    /// A later `configure` starts from scratch, rehydration included.
    pub fn reset(&self) {
        self.stop_worker();
        let mut state = self.lock();
        state.chains.clear();
        state.wallets.clear();
        state.adapter = None;
        state.configured = false;
        state.last_rehydrate = None;
        state.last_save = None;
        state.last_modified = None;
        info!("Storage reset");
    }
}

fn default_adapter(config: &StorageConfig) -> Arc<dyn StorageAdapter> {
    match &config.data_dir {
        Some(data_dir) => {
            info!("Using file storage in {:?}", data_dir);
            Arc::new(FileAdapter::new(data_dir.clone()))
        }
        None => {
            warn!("No data directory configured, state is kept in memory only");
            Arc::new(InMemoryAdapter::new())
        }
    }
}

async fn load_snapshot(
    adapter: &dyn StorageAdapter,
    wallet_id: Option<&str>,
    purge: Option<PurgeScope>,
) -> Result<Snapshot, StorageError> {
    let mut snapshot = Snapshot::default();

    let wallets = read_entries(adapter, WALLETS_KEY, purge).await?;
    snapshot.wallets = stage_entries(WALLETS_KEY, wallets, purge, parse_wallet)?;

    let mut chains = read_entries(adapter, CHAINS_KEY, purge).await?;

    if let Some(wallet_id) = wallet_id {
        let key = wallet_key(wallet_id);
        if let Some(payload) = read_wallet_payload(adapter, &key, purge).await? {
            // Per-wallet chains are newer than the bulk collection.
            chains.extend(payload.chains);
            if let Some(wallet) = payload.wallet {
                let entry = Map::from_iter([(wallet_id.to_string(), wallet)]);
                let staged = stage_entries(&key, entry, purge, parse_wallet)?;
                snapshot.wallets.retain(|(id, _)| id != wallet_id);
                snapshot.wallets.extend(staged);
            }
            snapshot.unsafe_options = Some(payload.unsafe_options);
        }
    }

    snapshot.chains = stage_entries(CHAINS_KEY, chains, purge, |_, blob| {
        ChainStore::parse_state(blob)
    })?;
    Ok(snapshot)
}

fn parse_wallet(wallet_id: &str, blob: &Value) -> Result<WalletStore, StorageError> {
    let mut store = WalletStore::new(wallet_id);
    store.import_state(blob)?;
    Ok(store)
}

async fn read_key(
    adapter: &dyn StorageAdapter,
    key: &str,
    purge: Option<PurgeScope>,
) -> Result<Option<Value>, StorageError> {
    match adapter.get(key).await {
        Ok(value) => Ok(value),
        Err(e) if purge.is_some() => {
            warn!("Purging unreadable {}: {}", key, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn read_entries(
    adapter: &dyn StorageAdapter,
    key: &str,
    purge: Option<PurgeScope>,
) -> Result<Map<String, Value>, StorageError> {
    match read_key(adapter, key, purge).await? {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(entries)) => Ok(entries),
        Some(other) => {
            let e = StorageError::SchemaMismatch(RehydrateError::TypeMismatch {
                path: ROOT_PATH.to_string(),
                expected: "object".to_string(),
                found: kind_of(&other),
            });
            if purge.is_some() {
                warn!("Purging {} collection: {}", key, e);
                Ok(Map::new())
            } else {
                Err(e)
            }
        }
    }
}

async fn read_wallet_payload(
    adapter: &dyn StorageAdapter,
    key: &str,
    purge: Option<PurgeScope>,
) -> Result<Option<WalletPayload>, StorageError> {
    let Some(value) = read_key(adapter, key, purge).await? else {
        return Ok(None);
    };

    // Only a well-formed payload from another state version is skipped.
    let envelope = SchemaNode::object([("version", SchemaNode::number())]);
    let value = match rehydrate(&value, &envelope) {
        Ok(value) => value,
        Err(e) => return purge_or_fail(key, e.into(), purge),
    };

    let version = value["version"].as_u64();
    if version != Some(u64::from(STATE_VERSION)) {
        warn!(
            "Ignoring {} saved with state version {}, expected {}",
            key, value["version"], STATE_VERSION
        );
        return Ok(None);
    }

    match serde_json::from_value::<WalletPayload>(value) {
        Ok(payload) => Ok(Some(payload)),
        Err(e) => purge_or_fail(key, e.into(), purge),
    }
}

fn purge_or_fail<T>(
    key: &str,
    e: StorageError,
    purge: Option<PurgeScope>,
) -> Result<Option<T>, StorageError> {
    if purge.is_some() {
        warn!("Purging malformed {}: {}", key, e);
        Ok(None)
    } else {
        error!("Malformed {}: {}", key, e);
        Err(e)
    }
}

/// Parse every entry of a collection, applying the purge policy to the ones that fail.
fn stage_entries<T>(
    collection: &str,
    entries: Map<String, Value>,
    purge: Option<PurgeScope>,
    parse: impl Fn(&str, &Value) -> Result<T, StorageError>,
) -> Result<Vec<(String, T)>, StorageError> {
    let mut staged = Vec::with_capacity(entries.len());
    for (id, blob) in entries {
        match parse(&id, &blob) {
            Ok(value) => staged.push((id, value)),
            Err(e) => match purge {
                None => {
                    error!("Failed to rehydrate {} entry {}: {}", collection, id, e);
                    return Err(e);
                }
                Some(PurgeScope::Entry) => {
                    warn!("Purging {} entry {}: {}", collection, id, e);
                }
                Some(PurgeScope::Collection) => {
                    warn!(
                        "Purging {} collection, entry {} failed: {}",
                        collection, id, e
                    );
                    return Ok(Vec::new());
                }
            },
        }
    }
    Ok(staged)
}
