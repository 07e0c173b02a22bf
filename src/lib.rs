pub mod change_checker;
pub mod config;
pub mod health;
pub mod observability;
pub mod state;
pub mod storage;
pub mod sync;
pub mod todo;
pub mod transport;
pub mod value;

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::config::Settings;
use crate::observability::MetricsRegistry;
use crate::state::AppState;
use crate::storage::ChangeLog;
use crate::sync::{ChangeLogSyncStore, SyncEngine, Tables, VersionedChangesSyncStore};
use crate::transport::{HttpSyncStoreClient, SyncStoreServer};

/// Open the replica database and enable tracking for the configured tables.
pub async fn open_store(
	settings: &Settings,
	metrics: Arc<MetricsRegistry>,
) -> anyhow::Result<ChangeLogSyncStore> {
	let log = ChangeLog::open(&settings.database_url).await?;
	let store = ChangeLogSyncStore::new(log).with_metrics(metrics);
	if !settings.tracked_tables.is_empty() {
		store
			.setup_table_change_tracking(&Tables::new(settings.tracked_tables.iter().cloned()))
			.await?;
	}
	Ok(store)
}

/// Serve the replica over HTTP until `shutdown` resolves.
pub async fn serve<F>(settings: &Settings, metrics: Arc<MetricsRegistry>, shutdown: F) -> anyhow::Result<()>
where
	F: std::future::Future<Output = ()>,
{
	let store = open_store(settings, metrics.clone()).await?;
	info!("Serving site {} as '{}'", store.change_log().site_id(), settings.name);

	let state = AppState::new(settings.name.clone(), Arc::new(store), metrics)
		.with_body_limit(settings.max_body_bytes);
	let server = SyncStoreServer::start((settings.host.as_str(), settings.port), state).await?;
	info!("Accepting request bodies up to {} bytes on {}", settings.max_body_bytes, server.local_addr());
	shutdown.await;
	server.stop().await;
	Ok(())
}

/// Build an engine syncing the local replica with `settings.remote_url`.
pub async fn engine(settings: &Settings, metrics: Arc<MetricsRegistry>) -> anyhow::Result<SyncEngine> {
	let local = open_store(settings, metrics.clone()).await?;
	let remote = match &settings.remote_url {
		Some(url) => {
			let client = HttpSyncStoreClient::new(
				url.as_str(),
				Duration::from_secs(settings.request_timeout_secs),
			)?;
			Some(Arc::new(client) as Arc<dyn VersionedChangesSyncStore>)
		}
		None => None,
	};
	Ok(SyncEngine::new(settings.name.clone(), Arc::new(local), remote).with_metrics(metrics))
}
