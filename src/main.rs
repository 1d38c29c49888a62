use postage_batchstore::config::Config;
use postage_batchstore::postage::batchstore::SyncStats;
use postage_batchstore::postage::listener::{ReplaySubscriber, RpcLogSubscriber};
use postage_batchstore::postage::{BatchStoreError, Listener, LogSubscriber, Store, SyncError};
use postage_batchstore::storage::FileStateStore;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	// Config file from the first argument or BATCHSTORE_CONFIG
	let config_path = std::env::args()
		.nth(1)
		.or_else(|| std::env::var("BATCHSTORE_CONFIG").ok())
		.map(PathBuf::from);

	let config = match Config::load(config_path.as_deref()) {
		Ok(config) => config,
		Err(e) => {
			error!("Failed to load configuration: {}", e);
			std::process::exit(1);
		}
	};

	info!("Starting postage batch store in {}", config.data_dir.display());

	match start(&config).await {
		Ok(stats) => info!("Batch store stopped. {}", stats.summary()),
		Err(e) => {
			error!("Batch store sync failed: {}", e);
			std::process::exit(1);
		}
	}
}

/// Open the store and follow the configured log source until Ctrl-C or failure.
async fn start(config: &Config) -> Result<SyncStats, SyncError> {
	let storage = FileStateStore::open(config.data_dir.clone()).map_err(BatchStoreError::from)?;
	let store = Arc::new(Store::new(storage)?);

	let checkpoint = store.checkpoint()?;
	info!(
		"Ledger at block {} (price {}, total {})",
		checkpoint.block, checkpoint.price, checkpoint.total
	);

	match &config.replay_file {
		Some(path) => {
			info!("Replaying logs from {}", path.display());
			run(store, ReplaySubscriber::from_file(path)?, config).await
		}
		None => {
			let subscriber = RpcLogSubscriber::new(config.rpc_url.clone(), config.ws_url.clone())?
				.with_block_range(config.backfill_block_range);
			info!("Following chain via {} and {}", config.rpc_url, config.ws_url);
			run(store, subscriber, config).await
		}
	}
}

async fn run<L: LogSubscriber + 'static>(
	store: Arc<Store<FileStateStore>>,
	subscriber: L,
	config: &Config,
) -> Result<SyncStats, SyncError> {
	let handle = store.start_sync(Listener::new(subscriber), config.sync_config());

	tokio::select! {
		_ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
		_ = handle.exited() => info!("Listener exited"),
	}

	handle.shutdown().await
}
