use std::path::PathBuf;
use tracing::{error, info, warn};

use wallet_state_store::primitives::{BlockHeader, HEADER_SIZE, Transaction};
use wallet_state_store::storage::{AddressRecord, TransactionMetadata, generate_wallet_id};
use wallet_state_store::{Storage, StorageConfig, StorageError, StorageEvent};

/// Environment variable pointing at a JSON storage configuration
const CONFIG_ENV: &str = "WALLET_STATE_CONFIG";

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let mut filter = tracing_subscriber::EnvFilter::from_default_env()
		.add_directive(tracing::Level::INFO.into());
	match "wallet_state_store=debug".parse() {
		Ok(directive) => filter = filter.add_directive(directive),
		Err(e) => eprintln!("Invalid log directive: {}", e),
	}

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting wallet state store");

	if let Err(e) = run().await {
		error!("Wallet state store failed: {}", e);
		std::process::exit(1);
	}
}

async fn load_config() -> Result<StorageConfig, StorageError> {
	let mut config = match std::env::var(CONFIG_ENV) {
		Ok(path) => StorageConfig::from_json_file(&PathBuf::from(path)).await?,
		Err(_) => {
			info!("{} not set, using default configuration", CONFIG_ENV);
			StorageConfig {
				data_dir: Some(PathBuf::from("wallet_state")),
				..StorageConfig::default()
			}
		}
	};

	if config.wallet_id.is_none() {
		let wallet_id = generate_wallet_id();
		info!("No wallet id configured, generated {}", wallet_id);
		config.wallet_id = Some(wallet_id);
	}
	Ok(config)
}

/// Header whose raw bytes start with the little-endian height, so every height hashes apart.
fn sample_header(height: u64) -> Result<BlockHeader, StorageError> {
	let mut raw = vec![0u8; HEADER_SIZE];
	raw[..8].copy_from_slice(&height.to_le_bytes());
	Ok(BlockHeader::new(height, raw)?)
}

fn sample_transaction(height: u64) -> Result<Transaction, StorageError> {
	let mut raw = vec![0x01, 0x02, 0x03];
	raw.extend_from_slice(&height.to_le_bytes());
	Ok(Transaction::new(raw)?)
}

async fn run() -> Result<(), StorageError> {
	let config = load_config().await?;
	let storage = Storage::new(config);

	let mut events = storage.subscribe();
	tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			match &event {
				StorageEvent::SaveStateFailed { error } => warn!("Save failed: {}", error),
				StorageEvent::Chain { network, event } => info!("[{}] {:?}", network, event),
				other => info!("Storage event: {}", other.name()),
			}
		}
	});

	storage.configure(None).await?;

	let start = storage.start_block_height(false);
	info!(
		"Network {}: synchronization starts at block {}",
		storage.current_network(),
		start
	);

	// Sample data standing in for what the transport layer would deliver.
	let header = sample_header(start)?;
	let transaction = sample_transaction(start)?;
	let txid = transaction.txid();

	storage.with_default_chain_store(|chain| {
		let hash = header.hash();
		chain.import_block_header(header);
		chain.import_address(AddressRecord {
			address: "yWatchedAddress".to_string(),
			path: Some("m/44'/1'/0'/0/0".to_string()),
			used: true,
			balance_sat: 0,
			transactions: vec![txid.clone()],
		});
		chain.import_transactions([(
			transaction,
			Some(TransactionMetadata {
				block_hash: Some(hash),
				height: Some(start),
				..TransactionMetadata::default()
			}),
		)]);
		chain.update_last_synced_block_height(start);
	});
	storage.with_current_wallet_store(|wallet| {
		wallet.insert_path_address("m/44'/1'/0'", "0/0", "yWatchedAddress");
	});
	storage.schedule_state_save();

	if storage.save_state().await? {
		info!("State saved");
	}
	storage.stop_worker();
	// Let the event logger drain.
	tokio::task::yield_now().await;

	info!("Wallet state store finished");
	Ok(())
}
